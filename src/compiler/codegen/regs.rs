//! Register assignment for the convolution kernel.
//!
//! General-purpose registers have fixed roles for the whole kernel. Vector
//! registers are handed out by `VRegMap`, which maps every logical role
//! (accumulator, input, weight, scratch, tail mask, store temporaries) to a
//! physical slot and checks in one place that the slots never collide.

use iced_x86::code_asm::*;

use crate::dispatch::IsaLevel;

// ── General-purpose register roles ──────────────────────────────────────

/// Pointer to `ConvCallArgs` (System V first argument).
pub const PARAM: AsmRegister64 = rdi;
pub const REG_INP: AsmRegister64 = r8;
pub const REG_KER: AsmRegister64 = r9;
pub const REG_OUT: AsmRegister64 = r10;
pub const AUX_INP: AsmRegister64 = r11;
pub const AUX_KER: AsmRegister64 = r12;
pub const REG_ICB: AsmRegister64 = rsi;
pub const REG_KJ: AsmRegister64 = rdx;
pub const REG_OVERFLOW: AsmRegister64 = rcx;
pub const REG_OC_BLOCKS: AsmRegister64 = r13;
pub const REG_OWB: AsmRegister64 = r14;
pub const REG_BIAS: AsmRegister64 = r15;
pub const REG_OI: AsmRegister64 = rbx;
pub const REG_SCALES: AsmRegister64 = rbp;
/// Free scratch for immediates and address computation.
pub const REG_TMP: AsmRegister64 = rax;
pub const REG_TMP32: AsmRegister32 = eax;

/// Callee-saved registers the kernel clobbers, in push order.
pub const CALLEE_SAVED: [AsmRegister64; 6] = [rbx, rbp, r12, r13, r14, r15];

// ── Vector registers ────────────────────────────────────────────────────

/// Vector register slot, independent of width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u8);

impl VReg {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Vector width a kernel is specialized for, chosen from the channel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecWidth {
    Xmm,
    Ymm,
    Zmm,
}

impl VecWidth {
    /// Width holding `block` 32-bit lanes.
    pub fn for_block(block: usize) -> Option<Self> {
        match block {
            4 => Some(VecWidth::Xmm),
            8 => Some(VecWidth::Ymm),
            16 => Some(VecWidth::Zmm),
            _ => None,
        }
    }

    #[inline]
    pub const fn lanes(self) -> usize {
        match self {
            VecWidth::Xmm => 4,
            VecWidth::Ymm => 8,
            VecWidth::Zmm => 16,
        }
    }
}

pub const XMM: [AsmRegisterXmm; 32] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
    xmm16, xmm17, xmm18, xmm19, xmm20, xmm21, xmm22, xmm23, xmm24, xmm25, xmm26, xmm27, xmm28, xmm29, xmm30,
    xmm31,
];

pub const YMM: [AsmRegisterYmm; 32] = [
    ymm0, ymm1, ymm2, ymm3, ymm4, ymm5, ymm6, ymm7, ymm8, ymm9, ymm10, ymm11, ymm12, ymm13, ymm14, ymm15,
    ymm16, ymm17, ymm18, ymm19, ymm20, ymm21, ymm22, ymm23, ymm24, ymm25, ymm26, ymm27, ymm28, ymm29, ymm30,
    ymm31,
];

pub const ZMM: [AsmRegisterZmm; 32] = [
    zmm0, zmm1, zmm2, zmm3, zmm4, zmm5, zmm6, zmm7, zmm8, zmm9, zmm10, zmm11, zmm12, zmm13, zmm14, zmm15,
    zmm16, zmm17, zmm18, zmm19, zmm20, zmm21, zmm22, zmm23, zmm24, zmm25, zmm26, zmm27, zmm28, zmm29, zmm30,
    zmm31,
];

/// Temporaries the store phase needs outside the accumulator block.
pub const STORE_TEMPS: usize = 5;

/// Vector register budget for one kernel flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegBudget {
    pub total: usize,
    /// Live for the whole kernel (AVX2 tail mask).
    pub permanent: usize,
    /// Weight/source/product registers of the inner compute step.
    pub compute: usize,
    /// Temporaries of the store phase.
    pub store: usize,
}

impl RegBudget {
    pub fn new(isa: IsaLevel, depthwise: bool, resrc_depthwise: bool, int_path: bool, mask_vec: bool) -> Self {
        let compute = if depthwise {
            1 + usize::from(!resrc_depthwise) + usize::from(int_path)
        } else {
            // two weight registers for double buffering
            2 + usize::from(int_path)
        };
        RegBudget {
            total: isa.vec_regs(),
            permanent: usize::from(mask_vec),
            compute,
            store: STORE_TEMPS,
        }
    }

    /// Registers left for accumulators and input registers.
    pub fn max_regs_ur(&self) -> usize {
        self.total - self.permanent - self.compute.max(self.store)
    }
}

/// Logical role → physical slot map for one generated kernel.
///
/// Low slots hold the accumulator block `[nb][ur_w]` followed by input
/// registers; the top of the file holds the permanent mask, then the
/// compute registers, which alias the store temporaries (the two phases
/// never overlap).
#[derive(Debug, Clone)]
pub struct VRegMap {
    ur_w: usize,
    nb: usize,
    n_inp: usize,
    top: usize,
    mask: Option<VReg>,
}

impl VRegMap {
    /// `n_inp` input registers follow `nb * ur_w` accumulators.
    ///
    /// Panics when the layout does not fit the budget: the planner derived
    /// `ur_w` from this same budget, so a failure is a planner bug.
    pub fn new(budget: RegBudget, ur_w: usize, nb: usize, n_inp: usize) -> Self {
        let low = nb * ur_w + n_inp;
        assert!(
            low <= budget.max_regs_ur(),
            "register overflow: {nb}x{ur_w} accumulators + {n_inp} inputs > {} slots",
            budget.max_regs_ur()
        );
        let top = budget.total - budget.permanent;
        let mask = (budget.permanent > 0).then(|| VReg((budget.total - 1) as u8));
        VRegMap { ur_w, nb, n_inp, top, mask }
    }

    /// Accumulator for output pixel `j` of channel block `k`.
    #[inline]
    pub fn acc(&self, j: usize, k: usize) -> VReg {
        debug_assert!(j < self.ur_w && k < self.nb);
        VReg((k * self.ur_w + j) as u8)
    }

    #[inline]
    pub fn inp(&self, i: usize) -> VReg {
        assert!(i < self.n_inp, "input register {i} outside {} reserved", self.n_inp);
        VReg((self.nb * self.ur_w + i) as u8)
    }

    /// `i`-th register counted down from the top of the allocatable file.
    #[inline]
    fn top_slot(&self, i: usize) -> VReg {
        VReg((self.top - 1 - i) as u8)
    }

    pub fn wei(&self) -> VReg {
        self.top_slot(0)
    }

    /// Second weight register (double buffering on the regular path).
    pub fn wei_alt(&self) -> VReg {
        self.top_slot(1)
    }

    /// Depthwise source register when inputs are not cached.
    pub fn dw_src(&self) -> VReg {
        self.top_slot(1)
    }

    /// Product scratch for the widened integer multiply.
    pub fn prod(&self) -> VReg {
        self.top_slot(2)
    }

    /// AVX2 tail mask vector.
    pub fn mask(&self) -> Option<VReg> {
        self.mask
    }

    /// Store-phase temporary `i` in `0..STORE_TEMPS`.
    pub fn store_tmp(&self, i: usize) -> VReg {
        assert!(i < STORE_TEMPS);
        self.top_slot(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_avx512_regular() {
        let b = RegBudget::new(IsaLevel::Avx512, false, false, false, false);
        assert_eq!(b.compute, 2);
        assert_eq!(b.max_regs_ur(), 32 - STORE_TEMPS);
    }

    #[test]
    fn test_budget_avx2_with_mask() {
        let b = RegBudget::new(IsaLevel::Avx2, true, false, true, true);
        assert_eq!(b.compute, 3);
        assert_eq!(b.max_regs_ur(), 16 - 1 - STORE_TEMPS);
    }

    #[test]
    fn test_map_layout_disjoint() {
        let b = RegBudget::new(IsaLevel::Avx2, false, false, true, true);
        let ur_w = b.max_regs_ur() / 3;
        let map = VRegMap::new(b, ur_w, 2, ur_w);
        let low_end = map.inp(ur_w - 1).idx();
        assert!(low_end < map.prod().idx());
        assert!(map.prod().idx() < map.wei_alt().idx());
        assert!(map.wei().idx() < map.mask().unwrap().idx());
        assert_eq!(map.mask(), Some(VReg(15)));
        assert_eq!(map.acc(1, 1), VReg((ur_w + 1) as u8));
        assert!(map.store_tmp(STORE_TEMPS - 1).idx() > low_end);
    }

    #[test]
    #[should_panic(expected = "register overflow")]
    fn test_map_overflow_panics() {
        let b = RegBudget::new(IsaLevel::Avx2, false, false, false, false);
        VRegMap::new(b, 8, 2, 8);
    }

    #[test]
    fn test_width_for_block() {
        assert_eq!(VecWidth::for_block(16), Some(VecWidth::Zmm));
        assert_eq!(VecWidth::for_block(8).map(VecWidth::lanes), Some(8));
        assert_eq!(VecWidth::for_block(3), None);
    }
}
