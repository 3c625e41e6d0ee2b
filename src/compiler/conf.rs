//! Problem descriptor: the immutable, fully derived kernel configuration.
//!
//! Produced once by the planner and read by the emitter, the scratchpad
//! registrar and the forward driver. Nothing here changes after planning.

use crate::attr::RoundMode;
use crate::compiler::codegen::regs::{RegBudget, VecWidth};
use crate::compiler::post_ops::FusedPostOps;
use crate::dispatch::IsaLevel;
use crate::types::{DataType, MemoryFormat};

/// Order in which the driver walks `(n, g, oc-chunk, oh, ow-block)` work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopOrder {
    /// oc-chunk → ow-block → g → n → oh
    Cwgn,
    /// n → g → oc-chunk → ow-block → oh
    Ngcw,
    /// n → ow-block → oc-chunk → g (1-D)
    Nwcg,
    /// n → oh → ow-block → oc-chunk → g
    Nhwcg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvConf {
    pub isa: IsaLevel,
    pub vec_width: VecWidth,
    pub ndims: usize,
    pub mb: usize,
    pub ngroups: usize,

    // ── Channels (per group) ──
    /// Padded up to `ic_block` for ungrouped convolutions.
    pub ic: usize,
    pub oc: usize,
    pub ic_without_padding: usize,
    pub oc_without_padding: usize,

    // ── Spatial ──
    pub ih: usize,
    pub iw: usize,
    pub oh: usize,
    pub ow: usize,
    pub kh: usize,
    pub kw: usize,
    pub t_pad: usize,
    /// May be negative when the last rows of the input are never read.
    pub b_pad: isize,
    pub l_pad: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilate_h: usize,
    pub dilate_w: usize,

    // ── Blocking ──
    pub ch_block: usize,
    pub ic_block: usize,
    pub oc_block: usize,
    pub nb_ch: usize,
    pub nb_ic: usize,
    pub nb_oc: usize,
    pub nb_ch_blocking: usize,
    pub nb_oc_blocking: usize,
    pub nb_oc_blocking_thr_chunk: usize,
    pub max_regs_ur: usize,
    pub ur_w: usize,
    pub ur_w_tail: usize,
    pub ow_block: usize,
    pub nb_ow: usize,
    pub loop_order: LoopOrder,

    // ── Flags ──
    pub is_depthwise: bool,
    pub signed_input: bool,
    pub is_resrc_depthwise: bool,
    pub is_oc_scale: bool,
    pub with_bias: bool,

    // ── Data types ──
    pub src_dt: DataType,
    pub wei_dt: DataType,
    pub dst_dt: DataType,
    pub bia_dt: Option<DataType>,
    pub typesize_in: usize,
    pub typesize_wei: usize,
    pub typesize_out: usize,
    pub typesize_bia: usize,

    // ── Formats chosen by the planner ──
    pub src_fmt: MemoryFormat,
    pub wei_fmt: MemoryFormat,
    pub dst_fmt: MemoryFormat,
    pub bias_fmt: MemoryFormat,

    // ── Output stage ──
    pub round_mode: RoundMode,
    pub post_ops: FusedPostOps,
}

/// Input columns read past the right edge when computing the first
/// `ow_covered` output pixels of a row, clamped at 0.
pub fn right_pad_without_tail(
    ow_covered: usize,
    iw: usize,
    kw: usize,
    l_pad: usize,
    stride_w: usize,
    dilate_w: usize,
) -> isize {
    let span_w = ((kw - 1) * (dilate_w + 1)) as isize;
    ((ow_covered as isize - 1) * stride_w as isize + span_w - (iw + l_pad - 1) as isize).max(0)
}

impl ConvConf {
    /// Integer path: bytes widened to 32-bit lanes, exact `s32` accumulation.
    #[inline]
    pub fn int_path(&self) -> bool {
        self.src_dt.is_int8()
    }

    /// Channel blocks processed per kernel call.
    #[inline]
    pub fn nb_blocking(&self) -> usize {
        if self.is_depthwise { self.nb_ch_blocking } else { self.nb_oc_blocking }
    }

    /// Output channels held by one vector.
    #[inline]
    pub fn out_block(&self) -> usize {
        if self.is_depthwise { self.ch_block } else { self.oc_block }
    }

    /// Valid lanes in the last channel block, 0 when every block is full.
    pub fn channel_tail(&self) -> usize {
        if self.is_depthwise {
            self.ngroups % self.ch_block
        } else {
            self.oc_without_padding % self.oc_block
        }
    }

    /// The last output block is partial and needs masked loads/stores.
    #[inline]
    pub fn has_channel_tail(&self) -> bool {
        self.ngroups % self.ch_block != 0 || self.oc_without_padding != self.oc
    }

    /// The last input-channel block is partial.
    #[inline]
    pub fn has_ic_tail(&self) -> bool {
        self.ngroups % self.ch_block != 0 || self.ic_without_padding != self.ic
    }

    /// Elements between consecutive pixels of the source tensor.
    #[inline]
    pub fn src_pixel_stride(&self) -> usize {
        self.ic_without_padding * self.ngroups
    }

    #[inline]
    pub fn dst_pixel_stride(&self) -> usize {
        self.oc_without_padding * self.ngroups
    }

    /// Right padding of the whole row as seen by the kernel (may be negative).
    pub fn r_pad(&self) -> isize {
        let span = ((self.kw - 1) * (self.dilate_w + 1)) as isize;
        ((self.ow as isize - 1) * self.stride_w as isize + span - (self.iw + self.l_pad - 1) as isize).max(0)
    }

    /// Right padding seen by the last full `ur_w` block; the tail block
    /// handles the rest. Never exceeds `ur_w` for a planned configuration.
    pub fn r_pad_no_tail(&self) -> isize {
        right_pad_without_tail(self.ow - self.ur_w_tail, self.iw, self.kw, self.l_pad, self.stride_w, self.dilate_w)
    }

    /// Elements of the blocked weight tensor.
    pub fn weights_len(&self) -> usize {
        if self.is_depthwise {
            self.nb_ch * self.kh * self.kw * self.ch_block
        } else {
            self.ngroups * self.nb_oc * self.nb_ic * self.kh * self.kw * self.ic_block * self.oc_block
        }
    }

    /// Weight elements of one kernel row (`kw` taps of one channel block).
    #[inline]
    pub fn weights_row_len(&self) -> usize {
        self.kw * self.ch_block * self.ic_block * self.oc_block
    }

    pub fn src_len(&self) -> usize {
        self.mb * self.ih * self.iw * self.src_pixel_stride()
    }

    pub fn dst_len(&self) -> usize {
        self.mb * self.oh * self.ow * self.dst_pixel_stride()
    }

    /// Vector register budget the planner sized `ur_w` against.
    pub fn reg_budget(&self) -> RegBudget {
        let mask_vec = !self.isa.has_opmask() && self.has_channel_tail();
        RegBudget::new(self.isa, self.is_depthwise, self.is_resrc_depthwise, self.int_path(), mask_vec)
    }

    /// Length of the per-channel scale array the kernel reads with full
    /// vector loads.
    pub fn adjusted_scales_len(&self) -> usize {
        let channels = if self.is_depthwise { self.nb_ch * self.ch_block } else { self.ngroups * self.oc };
        channels.max(self.vec_width.lanes())
    }
}
