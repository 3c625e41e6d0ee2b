//! Eltwise activation emission over a group of accumulators.
//!
//! Constants are broadcast once into scratch registers and reused for every
//! accumulator of the group, so the scratch set must not alias `accs`.

use crate::attr::{Eltwise, EltwiseAlg};
use crate::compiler::codegen::regs::VReg;
use crate::compiler::codegen::vec_ops::VecAsm;
use crate::error::ConvResult;

/// Scratch registers an eltwise entry may clobber.
pub const ELTWISE_TEMPS: usize = 4;

const ABS_MASK: u32 = 0x7fff_ffff;

/// Emit `acc = scale * alg(acc)` for every register in `accs`.
pub fn emit_eltwise(v: &mut VecAsm, e: &Eltwise, accs: &[VReg], t: &[VReg; ELTWISE_TEMPS]) -> ConvResult<()> {
    debug_assert!(accs.iter().all(|a| !t.contains(a)));
    match e.alg {
        EltwiseAlg::Relu if e.alpha == 0.0 => {
            v.zero(t[0])?;
            for &a in accs {
                v.vmaxps(a, a, t[0])?;
            }
        }
        EltwiseAlg::Relu => {
            // max(x, 0) + alpha * min(x, 0)
            v.zero(t[0])?;
            v.broadcast_f32(t[1], e.alpha)?;
            for &a in accs {
                v.vminps(t[2], a, t[0])?;
                v.vmaxps(a, a, t[0])?;
                v.vfmadd231ps(a, t[2], t[1])?;
            }
        }
        EltwiseAlg::Linear => {
            v.broadcast_f32(t[0], e.alpha)?;
            v.broadcast_f32(t[1], e.beta)?;
            for &a in accs {
                v.vfmadd213ps(a, t[0], t[1])?;
            }
        }
        EltwiseAlg::BoundedRelu => {
            v.zero(t[0])?;
            v.broadcast_f32(t[1], e.alpha)?;
            for &a in accs {
                v.vmaxps(a, a, t[0])?;
                v.vminps(a, a, t[1])?;
            }
        }
        EltwiseAlg::Clip => {
            v.broadcast_f32(t[0], e.alpha)?;
            v.broadcast_f32(t[1], e.beta)?;
            for &a in accs {
                v.vmaxps(a, a, t[0])?;
                v.vminps(a, a, t[1])?;
            }
        }
        EltwiseAlg::Abs => {
            v.broadcast_bits(t[0], ABS_MASK)?;
            for &a in accs {
                v.and(a, a, t[0])?;
            }
        }
        EltwiseAlg::Square => {
            for &a in accs {
                v.vmulps(a, a, a)?;
            }
        }
        EltwiseAlg::Sqrt => {
            for &a in accs {
                v.vsqrtps(a, a)?;
            }
        }
    }
    if e.scale != 1.0 {
        v.broadcast_f32(t[3], e.scale)?;
        for &a in accs {
            v.vmulps(a, a, t[3])?;
        }
    }
    Ok(())
}
