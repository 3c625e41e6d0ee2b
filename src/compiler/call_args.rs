//! Binary contract between the generated kernel and its caller.
//!
//! The emitter reads fields at the offsets below; the driver fills the same
//! `#[repr(C)]` struct. Both sides take the offsets from this one definition.

use std::mem::offset_of;

/// Per-call arguments, passed by pointer as the kernel's only argument.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ConvCallArgs {
    /// First input pixel of the row, already shifted past top overflow.
    pub src: *const u8,
    pub dst: *mut u8,
    /// Weights of the first oc/ch block of the call.
    pub filt: *const u8,
    pub bias: *const u8,
    /// Adjusted scales of the first output channel of the call.
    pub scales: *const f32,
    /// Index of the first oc block (regular) or ch block (depthwise).
    pub oc_blocks: usize,
    /// Kernel rows that touch real input.
    pub kh_padding: usize,
    pub t_overflow: usize,
    pub b_overflow: usize,
    /// Index of the ow block within the row.
    pub owb: usize,
}

impl Default for ConvCallArgs {
    fn default() -> Self {
        ConvCallArgs {
            src: std::ptr::null(),
            dst: std::ptr::null_mut(),
            filt: std::ptr::null(),
            bias: std::ptr::null(),
            scales: std::ptr::null(),
            oc_blocks: 0,
            kh_padding: 0,
            t_overflow: 0,
            b_overflow: 0,
            owb: 0,
        }
    }
}

/// Byte offsets of `ConvCallArgs` fields as `i32` displacements.
pub mod off {
    use super::*;

    pub const SRC: i32 = offset_of!(ConvCallArgs, src) as i32;
    pub const DST: i32 = offset_of!(ConvCallArgs, dst) as i32;
    pub const FILT: i32 = offset_of!(ConvCallArgs, filt) as i32;
    pub const BIAS: i32 = offset_of!(ConvCallArgs, bias) as i32;
    pub const SCALES: i32 = offset_of!(ConvCallArgs, scales) as i32;
    pub const OC_BLOCKS: i32 = offset_of!(ConvCallArgs, oc_blocks) as i32;
    pub const KH_PADDING: i32 = offset_of!(ConvCallArgs, kh_padding) as i32;
    pub const T_OVERFLOW: i32 = offset_of!(ConvCallArgs, t_overflow) as i32;
    pub const B_OVERFLOW: i32 = offset_of!(ConvCallArgs, b_overflow) as i32;
    pub const OWB: i32 = offset_of!(ConvCallArgs, owb) as i32;
}
