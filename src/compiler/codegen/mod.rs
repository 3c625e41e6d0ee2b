//! x86-64 code generation for convolution kernels.
//!
//! `generate` turns a planned `ConvConf` into raw machine code. The bytes are
//! position independent (the only data reference is RIP-relative) and are
//! installed into executable memory by `compiler::executable`.

pub mod conv;
pub mod eltwise;
pub mod regs;
pub mod vec_ops;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter, Mnemonic};
use log::{info, log_enabled, trace, Level};

use crate::compiler::conf::ConvConf;
use crate::error::ConvResult;

pub use conv::ConvKernelEmitter;

/// Emit machine code for `conf`.
pub fn generate(conf: &ConvConf) -> ConvResult<Vec<u8>> {
    let code = ConvKernelEmitter::new(conf)?.generate()?;
    info!(
        "conv kernel generated: {} bytes, isa={:?} width={:?} depthwise={} ur_w={}",
        code.len(),
        conf.isa,
        conf.vec_width,
        conf.is_depthwise,
        conf.ur_w
    );
    if log_enabled!(Level::Trace) {
        trace_disassembly(&code);
    }
    Ok(code)
}

/// Decode `code` up to and including the final `ret`.
///
/// Anything after the last `ret` is the constant pool and is not decoded.
pub fn decode_instructions(code: &[u8]) -> Vec<Instruction> {
    let mut decoder = Decoder::new(64, code, DecoderOptions::NONE);
    let mut out = Vec::new();
    let mut instr = Instruction::default();
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        out.push(instr);
    }
    if let Some(last_ret) = out.iter().rposition(|i| i.mnemonic() == Mnemonic::Ret) {
        out.truncate(last_ret + 1);
    }
    out
}

fn trace_disassembly(code: &[u8]) {
    let mut formatter = IntelFormatter::new();
    let mut text = String::new();
    for instr in decode_instructions(code) {
        text.clear();
        formatter.format(&instr, &mut text);
        trace!("{:6x}  {}", instr.ip(), text);
    }
}
