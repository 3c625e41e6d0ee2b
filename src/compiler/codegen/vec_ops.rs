//! Width-generic vector instruction layer.
//!
//! `VecAsm` wraps the iced-x86 `CodeAssembler` together with the kernel's
//! vector width and ISA level, so the convolution emitter is written once
//! over logical `VReg` slots. Each helper picks the xmm/ymm/zmm register
//! table and the matching memory operand size; helpers whose encoding
//! differs between AVX2 and AVX-512 also pick the instruction.

use iced_x86::code_asm::*;

use crate::attr::RoundMode;
use crate::compiler::codegen::regs::{VReg, VecWidth, REG_TMP32, XMM, YMM, ZMM};
use crate::dispatch::IsaLevel;
use crate::error::ConvResult;
use crate::types::DataType;

/// Run `$body` with `$r` bound to the register table of the kernel width.
macro_rules! dispatch {
    ($self:ident, $r:ident => $body:expr) => {
        match $self.width {
            VecWidth::Xmm => {
                let $r = &XMM;
                $body
            }
            VecWidth::Ymm => {
                let $r = &YMM;
                $body
            }
            VecWidth::Zmm => {
                let $r = &ZMM;
                $body
            }
        }
    };
}

/// Same as `dispatch!` for VEX-only instructions (no zmm form).
macro_rules! dispatch_vex {
    ($self:ident, $r:ident => $body:expr) => {
        match $self.width {
            VecWidth::Xmm => {
                let $r = &XMM;
                $body
            }
            VecWidth::Ymm => {
                let $r = &YMM;
                $body
            }
            VecWidth::Zmm => panic!("VEX-only instruction in a zmm kernel"),
        }
    };
}

macro_rules! vec_op3 {
    ($($(#[$m:meta])* $name:ident),* $(,)?) => {$(
        $(#[$m])*
        pub fn $name(&mut self, dst: VReg, a: VReg, b: VReg) -> ConvResult<()> {
            let (d, a, b) = (dst.idx(), a.idx(), b.idx());
            dispatch!(self, r => self.asm.$name(r[d], r[a], r[b])?);
            Ok(())
        }
    )*};
}

macro_rules! vec_op2 {
    ($($name:ident),* $(,)?) => {$(
        pub fn $name(&mut self, dst: VReg, src: VReg) -> ConvResult<()> {
            let (d, s) = (dst.idx(), src.idx());
            dispatch!(self, r => self.asm.$name(r[d], r[s])?);
            Ok(())
        }
    )*};
}

/// How the partial last channel block is masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailMask {
    /// `k1` holds the low `tail` bits.
    Opmask { tail: usize },
    /// `reg` holds all-ones in the low `tail` lanes.
    Vector { reg: VReg, tail: usize },
}

impl TailMask {
    pub fn tail(&self) -> usize {
        match *self {
            TailMask::Opmask { tail } | TailMask::Vector { tail, .. } => tail,
        }
    }
}

pub struct VecAsm {
    pub asm: CodeAssembler,
    width: VecWidth,
    isa: IsaLevel,
    mask: Option<TailMask>,
}

impl VecAsm {
    pub fn new(width: VecWidth, isa: IsaLevel) -> ConvResult<Self> {
        let mut asm = CodeAssembler::new(64)?;
        if isa == IsaLevel::Avx512 {
            asm.set_prefer_vex(false);
        }
        Ok(VecAsm { asm, width, isa, mask: None })
    }

    pub fn set_tail_mask(&mut self, mask: TailMask) {
        assert!(mask.tail() > 0 && mask.tail() < self.width.lanes(), "bad tail {mask:?}");
        self.mask = Some(mask);
    }

    /// Load `k1` with the low `tail` bits set.
    pub fn init_opmask(&mut self, tail: usize) -> ConvResult<()> {
        self.asm.mov(REG_TMP32, ((1u32 << tail) - 1) as i32)?;
        self.asm.kmovw(k1, REG_TMP32)?;
        self.set_tail_mask(TailMask::Opmask { tail });
        Ok(())
    }

    pub fn assemble(mut self) -> ConvResult<Vec<u8>> {
        Ok(self.asm.assemble(0)?)
    }

    fn tail(&self, masked: bool) -> Option<TailMask> {
        if !masked {
            return None;
        }
        assert!(self.mask.is_some(), "masked access without a tail mask");
        self.mask
    }

    /// Memory operand covering one full vector of 32-bit elements.
    fn vmem(&self, addr: AsmMemoryOperand) -> AsmMemoryOperand {
        match self.width {
            VecWidth::Xmm => xmmword_ptr(addr),
            VecWidth::Ymm => ymmword_ptr(addr),
            VecWidth::Zmm => zmmword_ptr(addr),
        }
    }

    /// Memory operand covering one byte per lane.
    fn bmem(&self, addr: AsmMemoryOperand) -> AsmMemoryOperand {
        match self.width {
            VecWidth::Xmm => dword_ptr(addr),
            VecWidth::Ymm => qword_ptr(addr),
            VecWidth::Zmm => xmmword_ptr(addr),
        }
    }

    vec_op3!(vaddps, vmulps, vminps, vmaxps, vpaddd, vpmulld);
    vec_op3!(
        /// `dst += a * b`
        vfmadd231ps,
        /// `dst = dst * a + b`
        vfmadd213ps,
    );
    vec_op2!(vsqrtps, vcvtdq2ps, vcvttps2dq);

    pub fn zero(&mut self, dst: VReg) -> ConvResult<()> {
        let d = dst.idx();
        match self.isa {
            IsaLevel::Avx512 => dispatch!(self, r => self.asm.vpxord(r[d], r[d], r[d])?),
            IsaLevel::Avx2 => dispatch_vex!(self, r => self.asm.vxorps(r[d], r[d], r[d])?),
        }
        Ok(())
    }

    pub fn and(&mut self, dst: VReg, a: VReg, b: VReg) -> ConvResult<()> {
        let (d, a, b) = (dst.idx(), a.idx(), b.idx());
        match self.isa {
            IsaLevel::Avx512 => dispatch!(self, r => self.asm.vpandd(r[d], r[a], r[b])?),
            IsaLevel::Avx2 => dispatch_vex!(self, r => self.asm.vandps(r[d], r[a], r[b])?),
        }
        Ok(())
    }

    /// Round in place to an integral value.
    pub fn round(&mut self, dst: VReg, mode: RoundMode) -> ConvResult<()> {
        let d = dst.idx();
        // bit 3 suppresses the precision exception
        let imm = match mode {
            RoundMode::Nearest => 0x08,
            RoundMode::Down => 0x09,
        };
        match self.isa {
            IsaLevel::Avx512 => dispatch!(self, r => self.asm.vrndscaleps(r[d], r[d], imm)?),
            IsaLevel::Avx2 => dispatch_vex!(self, r => self.asm.vroundps(r[d], r[d], imm)?),
        }
        Ok(())
    }

    /// Broadcast a 32-bit immediate into every lane.
    pub fn broadcast_bits(&mut self, dst: VReg, bits: u32) -> ConvResult<()> {
        let d = dst.idx();
        self.asm.mov(REG_TMP32, bits as i32)?;
        self.asm.vmovd(XMM[d], REG_TMP32)?;
        dispatch!(self, r => self.asm.vbroadcastss(r[d], XMM[d])?);
        Ok(())
    }

    #[inline]
    pub fn broadcast_f32(&mut self, dst: VReg, value: f32) -> ConvResult<()> {
        self.broadcast_bits(dst, value.to_bits())
    }

    pub fn broadcast_mem_f32(&mut self, dst: VReg, addr: AsmMemoryOperand) -> ConvResult<()> {
        let d = dst.idx();
        dispatch!(self, r => self.asm.vbroadcastss(r[d], dword_ptr(addr))?);
        Ok(())
    }

    /// Broadcast one widened byte into every 32-bit lane.
    pub fn broadcast_mem_byte(&mut self, dst: VReg, addr: AsmMemoryOperand, signed: bool) -> ConvResult<()> {
        let d = dst.idx();
        if signed {
            self.asm.movsx(REG_TMP32, byte_ptr(addr))?;
        } else {
            self.asm.movzx(REG_TMP32, byte_ptr(addr))?;
        }
        self.asm.vmovd(XMM[d], REG_TMP32)?;
        dispatch!(self, r => self.asm.vpbroadcastd(r[d], XMM[d])?);
        Ok(())
    }

    /// Load a vector of 32-bit elements, masked to the channel tail.
    pub fn load(&mut self, dst: VReg, addr: AsmMemoryOperand, masked: bool) -> ConvResult<()> {
        let d = dst.idx();
        let m = self.vmem(addr);
        match self.tail(masked) {
            None => dispatch!(self, r => self.asm.vmovups(r[d], m)?),
            Some(TailMask::Opmask { .. }) => dispatch!(self, r => self.asm.vmovups(r[d].k1().z(), m)?),
            Some(TailMask::Vector { reg, .. }) => {
                let k = reg.idx();
                dispatch_vex!(self, r => self.asm.vmaskmovps(r[d], r[k], m)?)
            }
        }
        Ok(())
    }

    /// Store a vector of 32-bit elements, leaving lanes past the tail untouched.
    pub fn store(&mut self, addr: AsmMemoryOperand, src: VReg, masked: bool) -> ConvResult<()> {
        let s = src.idx();
        let m = self.vmem(addr);
        match self.tail(masked) {
            None => dispatch!(self, r => self.asm.vmovups(m, r[s])?),
            Some(TailMask::Opmask { .. }) => dispatch!(self, r => self.asm.vmovups(m.k1(), r[s])?),
            Some(TailMask::Vector { reg, .. }) => {
                let k = reg.idx();
                dispatch_vex!(self, r => self.asm.vmaskmovps(m, r[k], r[s])?)
            }
        }
        Ok(())
    }

    /// Load one byte per lane, sign- or zero-extended to 32 bits.
    pub fn load_bytes(&mut self, dst: VReg, addr: AsmMemoryOperand, signed: bool, masked: bool) -> ConvResult<()> {
        let d = dst.idx();
        let m = self.bmem(addr);
        match self.tail(masked) {
            None => dispatch!(self, r => if signed {
                self.asm.vpmovsxbd(r[d], m)?
            } else {
                self.asm.vpmovzxbd(r[d], m)?
            }),
            Some(TailMask::Opmask { .. }) => dispatch!(self, r => if signed {
                self.asm.vpmovsxbd(r[d].k1().z(), m)?
            } else {
                self.asm.vpmovzxbd(r[d].k1().z(), m)?
            }),
            Some(TailMask::Vector { tail, .. }) => {
                let x = XMM[d];
                self.asm.vpxor(x, x, x)?;
                for i in 0..tail {
                    self.asm.vpinsrb(x, x, byte_ptr(addr + i as i32), i as i32)?;
                }
                dispatch_vex!(self, r => if signed {
                    self.asm.vpmovsxbd(r[d], x)?
                } else {
                    self.asm.vpmovzxbd(r[d], x)?
                })
            }
        }
        Ok(())
    }

    /// Load elements of type `dt` and convert them to f32 lanes.
    pub fn load_as_f32(&mut self, dst: VReg, addr: AsmMemoryOperand, dt: DataType, masked: bool) -> ConvResult<()> {
        match dt {
            DataType::F32 => return self.load(dst, addr, masked),
            DataType::S32 => self.load(dst, addr, masked)?,
            DataType::S8 | DataType::U8 => self.load_bytes(dst, addr, dt == DataType::S8, masked)?,
        }
        self.vcvtdq2ps(dst, dst)
    }

    /// Narrow s32 lanes (already clamped to the byte range) and store one
    /// byte per lane. Destroys `src`; `tmp` is scratch on AVX2.
    pub fn store_bytes(
        &mut self,
        addr: AsmMemoryOperand,
        src: VReg,
        signed: bool,
        masked: bool,
        tmp: VReg,
    ) -> ConvResult<()> {
        let s = src.idx();
        let tail = self.tail(masked);
        match self.isa {
            IsaLevel::Avx512 => {
                let m = self.bmem(addr);
                let m = if tail.is_some() { m.k1() } else { m };
                dispatch!(self, r => if signed {
                    self.asm.vpmovsdb(m, r[s])?
                } else {
                    self.asm.vpmovusdb(m, r[s])?
                });
            }
            IsaLevel::Avx2 => {
                let xs = XMM[s];
                match self.width {
                    VecWidth::Ymm => {
                        let xt = XMM[tmp.idx()];
                        self.asm.vextracti128(xt, YMM[s], 1)?;
                        self.asm.vpackssdw(xs, xs, xt)?;
                    }
                    VecWidth::Xmm => self.asm.vpackssdw(xs, xs, xs)?,
                    VecWidth::Zmm => panic!("zmm kernel on AVX2"),
                }
                if signed {
                    self.asm.vpacksswb(xs, xs, xs)?;
                } else {
                    self.asm.vpackuswb(xs, xs, xs)?;
                }
                match tail {
                    None if self.width == VecWidth::Ymm => self.asm.vmovq(qword_ptr(addr), xs)?,
                    None => self.asm.vmovd(dword_ptr(addr), xs)?,
                    Some(t) => {
                        for i in 0..t.tail() {
                            self.asm.vpextrb(byte_ptr(addr + i as i32), xs, i as i32)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn vzeroupper(&mut self) -> ConvResult<()> {
        self.asm.vzeroupper()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::regs::REG_OUT;

    fn assembles(width: VecWidth, isa: IsaLevel, f: impl FnOnce(&mut VecAsm) -> ConvResult<()>) -> Vec<u8> {
        let mut v = VecAsm::new(width, isa).unwrap();
        f(&mut v).unwrap();
        v.asm.ret().unwrap();
        v.assemble().unwrap()
    }

    #[test]
    fn test_zmm_masked_paths_encode() {
        let code = assembles(VecWidth::Zmm, IsaLevel::Avx512, |v| {
            v.init_opmask(1)?;
            v.load(VReg(20), ptr(REG_OUT + 64), true)?;
            v.load_bytes(VReg(3), ptr(REG_OUT), false, true)?;
            v.round(VReg(20), RoundMode::Down)?;
            v.store_bytes(ptr(REG_OUT), VReg(20), true, true, VReg(0))?;
            v.store(ptr(REG_OUT), VReg(31), true)
        });
        assert!(!code.is_empty());
    }

    #[test]
    fn test_ymm_vector_mask_paths_encode() {
        let code = assembles(VecWidth::Ymm, IsaLevel::Avx2, |v| {
            v.set_tail_mask(TailMask::Vector { reg: VReg(15), tail: 3 });
            v.load_as_f32(VReg(1), ptr(REG_OUT), DataType::S32, true)?;
            v.load_bytes(VReg(2), ptr(REG_OUT), true, true)?;
            v.store_bytes(ptr(REG_OUT), VReg(2), false, true, VReg(14))?;
            v.store_bytes(ptr(REG_OUT), VReg(1), true, false, VReg(14))?;
            v.broadcast_mem_byte(VReg(4), ptr(REG_OUT + 3), true)?;
            v.zero(VReg(5))
        });
        assert!(!code.is_empty());
    }

    #[test]
    #[should_panic(expected = "without a tail mask")]
    fn test_masked_access_requires_mask() {
        let mut v = VecAsm::new(VecWidth::Ymm, IsaLevel::Avx2).unwrap();
        let _ = v.load(VReg(0), ptr(REG_OUT), true);
    }
}
