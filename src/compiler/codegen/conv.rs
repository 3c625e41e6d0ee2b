//! Direct convolution kernel emitter.
//!
//! One generated function computes one output row segment: `nb_oc_blocking`
//! oc blocks (or `nb_ch_blocking` channel blocks for depthwise) times the
//! pixels of one ow block. Loop structure, outermost first:
//!
//! ```text
//! ow block (owb from ConvCallArgs)
//!   ur_w sub-block          left-pad / steady / right-pad / tail variants
//!     ic block (icb loop)   regular only
//!       kh rows             trip count from ConvCallArgs
//!         kw taps           fully unrolled, padded taps skipped
//! ```
//!
//! Padding variants are chosen while generating; only the kh trip counts and
//! the ow block index are read at run time.

use iced_x86::code_asm::*;

use crate::compiler::call_args::off;
use crate::compiler::codegen::eltwise::{emit_eltwise, ELTWISE_TEMPS};
use crate::compiler::codegen::regs::*;
use crate::compiler::codegen::vec_ops::{TailMask, VecAsm};
use crate::compiler::conf::ConvConf;
use crate::dispatch::IsaLevel;
use crate::error::ConvResult;
use crate::types::DataType;

/// Dwords of all-ones (then as many zeros) in the AVX2 tail mask table.
const MASK_TABLE_LANES: usize = 8;

/// `ceil(a / b)` for a possibly negative numerator, floored at zero.
#[inline]
fn div_up_pos(a: isize, b: usize) -> usize {
    if a <= 0 {
        0
    } else {
        (a as usize + b - 1) / b
    }
}

/// Padding past the input end when `dst` outputs are computed.
fn end_padding(start_pad: usize, dst: usize, src: usize, stride: usize, ext_kernel: usize) -> isize {
    (dst as isize - 1) * stride as isize + ext_kernel as isize - (src + start_pad) as isize
}

/// Representable range of an integer destination, in the f32 domain.
fn saturation_bounds(dt: DataType) -> Option<(f32, f32)> {
    match dt {
        DataType::F32 => None,
        // largest f32 below 2^31
        DataType::S32 => Some((-2_147_483_648.0, 2_147_483_520.0)),
        DataType::S8 => Some((-128.0, 127.0)),
        DataType::U8 => Some((0.0, 255.0)),
    }
}

pub struct ConvKernelEmitter<'a> {
    jcp: &'a ConvConf,
    v: VecAsm,
    regs: VRegMap,
    mask_table: Option<CodeLabel>,
}

impl<'a> ConvKernelEmitter<'a> {
    pub fn new(jcp: &'a ConvConf) -> ConvResult<Self> {
        let budget = jcp.reg_budget();
        assert_eq!(budget.max_regs_ur(), jcp.max_regs_ur, "register budget disagrees with the plan");
        let n_inp = if jcp.is_resrc_depthwise {
            (jcp.ur_w - 1) * jcp.stride_w + jcp.kw
        } else if jcp.is_depthwise {
            0
        } else {
            jcp.ur_w
        };
        let regs = VRegMap::new(budget, jcp.ur_w, jcp.nb_blocking(), n_inp);
        let v = VecAsm::new(jcp.vec_width, jcp.isa)?;
        Ok(ConvKernelEmitter { jcp, v, regs, mask_table: None })
    }

    /// Emit the whole kernel and assemble it.
    pub fn generate(mut self) -> ConvResult<Vec<u8>> {
        self.preamble()?;
        self.load_tail_mask()?;
        self.ow_loop()?;
        self.postamble()?;
        self.emit_data()?;
        self.v.assemble()
    }

    // ── Prologue / epilogue ─────────────────────────────────────────────

    fn preamble(&mut self) -> ConvResult<()> {
        let a = &mut self.v.asm;
        for r in CALLEE_SAVED {
            a.push(r)?;
        }
        a.mov(REG_INP, qword_ptr(PARAM + off::SRC))?;
        a.mov(REG_OUT, qword_ptr(PARAM + off::DST))?;
        a.mov(REG_KER, qword_ptr(PARAM + off::FILT))?;
        if self.jcp.with_bias {
            a.mov(REG_BIAS, qword_ptr(PARAM + off::BIAS))?;
        }
        a.mov(REG_SCALES, qword_ptr(PARAM + off::SCALES))?;
        a.mov(REG_OC_BLOCKS, qword_ptr(PARAM + off::OC_BLOCKS))?;
        Ok(())
    }

    fn postamble(&mut self) -> ConvResult<()> {
        self.v.vzeroupper()?;
        for r in CALLEE_SAVED.iter().rev() {
            self.v.asm.pop(*r)?;
        }
        self.v.asm.ret()?;
        Ok(())
    }

    fn load_tail_mask(&mut self) -> ConvResult<()> {
        let jcp = self.jcp;
        if !jcp.has_channel_tail() {
            return Ok(());
        }
        let tail = jcp.channel_tail();
        match jcp.isa {
            IsaLevel::Avx512 => self.v.init_opmask(tail)?,
            IsaLevel::Avx2 => {
                let Some(reg) = self.regs.mask() else {
                    panic!("AVX2 channel tail without a mask register");
                };
                let table = self.v.asm.create_label();
                self.v.asm.lea(REG_TMP, ptr(table))?;
                let skip = ((MASK_TABLE_LANES - tail) * 4) as i32;
                self.v.load(reg, ptr(REG_TMP + skip), false)?;
                self.v.set_tail_mask(TailMask::Vector { reg, tail });
                self.mask_table = Some(table);
            }
        }
        Ok(())
    }

    fn emit_data(&mut self) -> ConvResult<()> {
        if let Some(mut table) = self.mask_table {
            let mut words = [0u32; 2 * MASK_TABLE_LANES];
            words[..MASK_TABLE_LANES].fill(u32::MAX);
            self.v.asm.set_label(&mut table)?;
            self.v.asm.dd(&words)?;
        }
        Ok(())
    }

    /// Bind `label` to the current position. Two labels may land on the
    /// same address, so each gets its own empty anchor instruction.
    fn bind(&mut self, label: &mut CodeLabel) -> ConvResult<()> {
        self.v.asm.set_label(label)?;
        self.v.asm.zero_bytes()?;
        Ok(())
    }

    fn advance(&mut self, inp_shift: i32, out_shift: i32) -> ConvResult<()> {
        self.v.asm.add(REG_INP, inp_shift)?;
        self.v.asm.add(REG_OUT, out_shift)?;
        Ok(())
    }

    // ── ow loop ─────────────────────────────────────────────────────────

    fn ow_loop(&mut self) -> ConvResult<()> {
        let jcp = self.jcp;
        let tin = jcp.typesize_in as isize;
        let in_stride = jcp.src_pixel_stride() as isize;
        let (ur_w, sw, l_pad) = (jcp.ur_w as isize, jcp.stride_w as isize, jcp.l_pad as isize);

        let inp_shift_pad = (tin * (ur_w * sw - l_pad) * in_stride) as i32;
        let inp_shift_pad_second_block = (-tin * l_pad * in_stride) as i32;
        let inp_shift = (tin * ur_w * sw * in_stride) as i32;
        let out_shift = (jcp.typesize_out * jcp.ur_w * jcp.dst_pixel_stride()) as i32;

        let r_pad = jcp.r_pad().max(0) as usize;
        let n_oi = jcp.ow / jcp.ur_w;
        let ext_kw = (jcp.kw - 1) * (jcp.dilate_w + 1) + 1;
        let r_pad1 = end_padding(jcp.l_pad, jcp.ur_w * n_oi, jcp.iw, jcp.stride_w, ext_kw);
        let r_pad1_len = r_pad1.max(0) as usize;

        if jcp.nb_ow == 1 {
            let mut n_oi = n_oi;
            if r_pad1 > 0 || jcp.ur_w_tail == 0 {
                n_oi -= 1;
            }
            self.v.asm.xor(REG_OI, REG_OI)?;
            if jcp.ow == jcp.ur_w {
                self.icb_loop(jcp.ur_w, jcp.l_pad, r_pad)?;
            } else if n_oi == 0 {
                self.icb_loop(jcp.ur_w, jcp.l_pad, r_pad1_len)?;
                self.advance(inp_shift_pad, out_shift)?;
                if jcp.ur_w_tail != 0 {
                    self.icb_loop(jcp.ur_w_tail, 0, r_pad)?;
                }
            } else {
                if jcp.l_pad > 0 {
                    self.icb_loop(jcp.ur_w, jcp.l_pad, 0)?;
                    self.advance(inp_shift_pad, out_shift)?;
                    self.v.asm.inc(REG_OI)?;
                }
                if (jcp.l_pad == 0 && n_oi > 0) || (jcp.l_pad > 0 && n_oi > 1) {
                    let mut ow_label = self.v.asm.create_label();
                    self.bind(&mut ow_label)?;
                    self.icb_loop(jcp.ur_w, 0, 0)?;
                    self.advance(inp_shift, out_shift)?;
                    self.v.asm.inc(REG_OI)?;
                    self.v.asm.cmp(REG_OI, n_oi as i32)?;
                    self.v.asm.jl(ow_label)?;
                }
                if r_pad1 > 0 || jcp.ur_w_tail == 0 {
                    self.icb_loop(jcp.ur_w, 0, r_pad1_len)?;
                    self.advance(inp_shift, out_shift)?;
                }
                if jcp.ur_w_tail != 0 {
                    self.icb_loop(jcp.ur_w_tail, 0, r_pad)?;
                }
            }
            return Ok(());
        }

        // Only one ow block is processed per call; which one decides the
        // padding variants taken.
        assert!(
            jcp.ow_block % jcp.ur_w == 0 && jcp.ow_block / jcp.ur_w > 1,
            "ow_block {} must be a multiple of at least two ur_w {}",
            jcp.ow_block,
            jcp.ur_w
        );
        let n_oi_not_last = jcp.ow_block / jcp.ur_w;
        let mut n_oi_first = n_oi_not_last;
        let mut n_oi_next_last = n_oi_not_last;
        let mut n_oi_last = (jcp.ow - jcp.ow_block * (jcp.nb_ow - 1)) / jcp.ur_w;

        let next_last_padded = r_pad1 > 0 && n_oi_last == 0;
        let first_padded = next_last_padded && jcp.nb_ow == 2;
        let last_padded = (r_pad1 > 0 || jcp.ur_w_tail == 0) && n_oi_last > 0;
        if last_padded {
            n_oi_last -= 1;
        } else if first_padded {
            n_oi_first -= 1;
        } else if next_last_padded {
            n_oi_next_last -= 1;
        }

        let mut end_label = self.v.asm.create_label();
        let mut last_oi_label = self.v.asm.create_label();
        let mut middle_label = self.v.asm.create_label();
        let mut tail_label = self.v.asm.create_label();
        let mut oi_loop_label = self.v.asm.create_label();
        let mut oi_loop_end_label = self.v.asm.create_label();

        self.v.asm.mov(REG_OWB, qword_ptr(PARAM + off::OWB))?;
        self.v.asm.cmp(REG_OWB, 0)?;
        self.v.asm.jg(middle_label)?;

        // first ow block: left padding
        self.v.asm.mov(REG_OI, n_oi_first as i64)?;
        if jcp.l_pad > 0 {
            self.icb_loop(jcp.ur_w, jcp.l_pad, 0)?;
            self.advance(inp_shift_pad, out_shift)?;
            self.v.asm.dec(REG_OI)?;
        }
        self.v.asm.jmp(oi_loop_label)?;

        self.bind(&mut middle_label)?;
        if jcp.l_pad > 0 {
            // the driver points at the block start, which ignores l_pad
            self.v.asm.add(REG_INP, inp_shift_pad_second_block)?;
        }
        if n_oi_last != n_oi_not_last {
            self.v.asm.cmp(REG_OWB, (jcp.nb_ow - 1) as i32)?;
            self.v.asm.mov(REG_OI, n_oi_last as i64)?;
            self.v.asm.je(oi_loop_label)?;
        }
        if n_oi_next_last != n_oi_not_last {
            self.v.asm.cmp(REG_OWB, (jcp.nb_ow - 2) as i32)?;
            self.v.asm.mov(REG_OI, n_oi_next_last as i64)?;
            self.v.asm.je(oi_loop_label)?;
        }
        self.v.asm.mov(REG_OI, n_oi_not_last as i64)?;

        self.bind(&mut oi_loop_label)?;
        self.v.asm.cmp(REG_OI, 0)?;
        self.v.asm.jle(oi_loop_end_label)?;
        self.icb_loop(jcp.ur_w, 0, 0)?;
        self.advance(inp_shift, out_shift)?;
        self.v.asm.dec(REG_OI)?;
        self.v.asm.jmp(oi_loop_label)?;
        self.bind(&mut oi_loop_end_label)?;

        self.v.asm.mov(REG_OWB, qword_ptr(PARAM + off::OWB))?;
        self.v.asm.cmp(REG_OWB, 0)?;
        if first_padded {
            self.v.asm.je(last_oi_label)?;
        } else {
            self.v.asm.je(end_label)?;
        }
        self.v.asm.cmp(REG_OWB, (jcp.nb_ow - 2) as i32)?;
        self.v.asm.jl(end_label)?;
        if next_last_padded {
            self.v.asm.je(last_oi_label)?;
        } else {
            self.v.asm.je(end_label)?;
        }
        if !last_padded {
            self.v.asm.jmp(tail_label)?;
        }

        // last full ur_w block, right padding
        self.bind(&mut last_oi_label)?;
        self.icb_loop(jcp.ur_w, 0, r_pad1_len)?;
        self.advance(inp_shift, out_shift)?;
        self.v.asm.mov(REG_OWB, qword_ptr(PARAM + off::OWB))?;
        self.v.asm.cmp(REG_OWB, (jcp.nb_ow - 1) as i32)?;
        self.v.asm.jl(end_label)?;

        self.bind(&mut tail_label)?;
        if jcp.ur_w_tail != 0 {
            self.icb_loop(jcp.ur_w_tail, 0, r_pad)?;
        }
        self.bind(&mut end_label)?;
        Ok(())
    }

    // ── ic-block loop ───────────────────────────────────────────────────

    fn prepare_output(&mut self, ur_w: usize) -> ConvResult<()> {
        for k in 0..self.jcp.nb_blocking() {
            for j in 0..ur_w {
                let acc = self.regs.acc(j, k);
                self.v.zero(acc)?;
            }
        }
        Ok(())
    }

    fn icb_loop(&mut self, ur_w: usize, pad_l: usize, pad_r: usize) -> ConvResult<()> {
        let jcp = self.jcp;
        self.prepare_output(ur_w)?;

        let do_icb_loop = !jcp.is_depthwise && jcp.nb_ic > 1;
        let mut icb_label = None;
        if do_icb_loop {
            let mut label = self.v.asm.create_label();
            self.v.asm.mov(REG_ICB, jcp.nb_ic as i64)?;
            self.bind(&mut label)?;
            icb_label = Some(label);
        }

        if jcp.has_ic_tail() {
            let branch = if jcp.is_depthwise { jcp.nb_ch > jcp.nb_ch_blocking } else { do_icb_loop };
            if branch {
                let mut common = self.v.asm.create_label();
                let mut end = self.v.asm.create_label();
                if jcp.is_depthwise {
                    self.v.asm.cmp(REG_OC_BLOCKS, (jcp.nb_ch - jcp.nb_ch_blocking) as i32)?;
                } else {
                    // REG_ICB counts down: 1 is the last ic block
                    self.v.asm.cmp(REG_ICB, 1)?;
                }
                self.v.asm.jne(common)?;
                self.kh_loop(ur_w, pad_l, pad_r, true)?;
                self.v.asm.jmp(end)?;
                self.bind(&mut common)?;
                self.kh_loop(ur_w, pad_l, pad_r, false)?;
                self.bind(&mut end)?;
            } else {
                self.kh_loop(ur_w, pad_l, pad_r, true)?;
            }
        } else {
            self.kh_loop(ur_w, pad_l, pad_r, false)?;
        }

        if let Some(label) = icb_label {
            let inp_step = (jcp.typesize_in * jcp.ic_block) as i32;
            let ker_step = (jcp.typesize_wei * jcp.kh * jcp.kw * jcp.oc_block * jcp.ic_block) as i32;
            let a = &mut self.v.asm;
            a.add(REG_INP, inp_step)?;
            a.add(REG_KER, ker_step)?;
            a.dec(REG_ICB)?;
            a.cmp(REG_ICB, 0)?;
            a.jg(label)?;
            a.sub(REG_INP, inp_step * jcp.nb_ic as i32)?;
            a.sub(REG_KER, ker_step * jcp.nb_ic as i32)?;
        }

        if jcp.has_channel_tail() {
            let (last_first_block, several) = if jcp.is_depthwise {
                (jcp.nb_ch - jcp.nb_ch_blocking, jcp.nb_ch > jcp.nb_ch_blocking)
            } else {
                (jcp.nb_oc - jcp.nb_oc_blocking, jcp.nb_oc > jcp.nb_oc_blocking)
            };
            if several {
                let mut common = self.v.asm.create_label();
                let mut end = self.v.asm.create_label();
                self.v.asm.cmp(REG_OC_BLOCKS, last_first_block as i32)?;
                self.v.asm.jne(common)?;
                self.store_output(ur_w, true)?;
                self.v.asm.jmp(end)?;
                self.bind(&mut common)?;
                self.store_output(ur_w, false)?;
                self.bind(&mut end)?;
            } else {
                self.store_output(ur_w, true)?;
            }
        } else {
            self.store_output(ur_w, false)?;
        }
        Ok(())
    }

    // ── kh loop ─────────────────────────────────────────────────────────

    fn kh_loop(&mut self, ur_w: usize, pad_l: usize, pad_r: usize, last_block: bool) -> ConvResult<()> {
        let jcp = self.jcp;
        let shift_kernel = (jcp.typesize_wei * jcp.weights_row_len()) as i32;
        let shift_input = (jcp.typesize_in * (jcp.dilate_h + 1) * jcp.iw * jcp.src_pixel_stride()) as i32;

        self.v.asm.mov(AUX_INP, REG_INP)?;
        self.v.asm.mov(AUX_KER, REG_KER)?;

        if jcp.signed_input && jcp.ndims > 3 {
            // Rows in the top padding contribute nothing: skip their weights.
            self.v.asm.mov(REG_OVERFLOW, qword_ptr(PARAM + off::T_OVERFLOW))?;
            self.v.asm.imul_3(REG_OVERFLOW, REG_OVERFLOW, shift_kernel)?;
            self.v.asm.add(AUX_KER, REG_OVERFLOW)?;
        }

        self.v.asm.mov(REG_KJ, qword_ptr(PARAM + off::KH_PADDING))?;
        let span_h = ((jcp.kh - 1) * (jcp.dilate_h + 1)) as isize;
        let may_be_empty =
            jcp.signed_input || jcp.dilate_h >= jcp.ih || span_h < (jcp.t_pad as isize).max(jcp.b_pad);
        let mut skip_label = None;
        if may_be_empty {
            let label = self.v.asm.create_label();
            self.v.asm.cmp(REG_KJ, 0)?;
            self.v.asm.je(label)?;
            skip_label = Some(label);
        }

        let mut kh_label = self.v.asm.create_label();
        self.bind(&mut kh_label)?;
        if jcp.is_depthwise {
            self.compute_ker_dw(ur_w, pad_l, pad_r, last_block)?;
        } else {
            self.compute_ker(ur_w, pad_l, pad_r, last_block)?;
        }
        self.v.asm.add(AUX_KER, shift_kernel)?;
        self.v.asm.add(AUX_INP, shift_input)?;
        self.v.asm.dec(REG_KJ)?;
        self.v.asm.cmp(REG_KJ, 0)?;
        self.v.asm.jg(kh_label)?;

        if let Some(mut label) = skip_label {
            self.bind(&mut label)?;
        }
        Ok(())
    }

    // ── kw taps ─────────────────────────────────────────────────────────

    /// First output of the block whose tap `ki` reads real input.
    fn ow_start(&self, ki: usize, pad_l: usize) -> usize {
        let reach = (ki * (self.jcp.dilate_w + 1)) as isize;
        div_up_pos(pad_l as isize - reach, self.jcp.stride_w)
    }

    /// One past the last output of the block whose tap `ki` reads real input.
    fn ow_end(&self, ur_w: usize, ki: usize, pad_r: usize) -> usize {
        let reach = ((self.jcp.kw - 1 - ki) * (self.jcp.dilate_w + 1)) as isize;
        ur_w.saturating_sub(div_up_pos(pad_r as isize - reach, self.jcp.stride_w))
    }

    fn accumulate(&mut self, acc: VReg, a: VReg, b: VReg) -> ConvResult<()> {
        if self.jcp.int_path() {
            let prod = self.regs.prod();
            self.v.vpmulld(prod, a, b)?;
            self.v.vpaddd(acc, acc, prod)
        } else {
            self.v.vfmadd231ps(acc, a, b)
        }
    }

    fn load_weights(&mut self, dst: VReg, offset: usize) -> ConvResult<()> {
        let addr = ptr(AUX_KER + offset as i32);
        if self.jcp.int_path() {
            self.v.load_bytes(dst, addr, true, false)
        } else {
            self.v.load(dst, addr, false)
        }
    }

    fn compute_ker(&mut self, ur_w: usize, pad_l: usize, pad_r: usize, last_ic_block: bool) -> ConvResult<()> {
        let jcp = self.jcp;
        let ic_tail = jcp.ic_without_padding % jcp.ic_block;
        let ic_count = if last_ic_block && ic_tail != 0 { ic_tail } else { jcp.ic_block };
        let in_stride = jcp.src_pixel_stride() as isize;
        let tin = jcp.typesize_in as isize;
        let mut use_alt = false;

        for ki in 0..jcp.kw {
            let jj_start = self.ow_start(ki, pad_l);
            let jj_end = self.ow_end(ur_w, ki, pad_r);
            if jj_start >= jj_end {
                continue;
            }
            for ic in 0..ic_count {
                for jj in jj_start..jj_end {
                    let pos = (ki * (jcp.dilate_w + 1) + jj * jcp.stride_w) as isize - pad_l as isize;
                    let addr = ptr(AUX_INP + (tin * (pos * in_stride + ic as isize)) as i32);
                    let inp = self.regs.inp(jj);
                    if jcp.int_path() {
                        self.v.broadcast_mem_byte(inp, addr, jcp.signed_input)?;
                    } else {
                        self.v.broadcast_mem_f32(inp, addr)?;
                    }
                }
                for ii in 0..jcp.nb_oc_blocking {
                    let wei = if use_alt { self.regs.wei_alt() } else { self.regs.wei() };
                    use_alt = !use_alt;
                    let block = (ii * jcp.nb_ic * jcp.kh * jcp.kw + ki) * jcp.ic_block * jcp.oc_block;
                    self.load_weights(wei, jcp.typesize_wei * (block + ic * jcp.oc_block))?;
                    for jj in jj_start..jj_end {
                        let acc = self.regs.acc(jj, ii);
                        let inp = self.regs.inp(jj);
                        self.accumulate(acc, wei, inp)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn load_dw_src(&mut self, dst: VReg, offset: isize, masked: bool) -> ConvResult<()> {
        let addr = ptr(AUX_INP + offset as i32);
        if self.jcp.int_path() {
            self.v.load_bytes(dst, addr, self.jcp.signed_input, masked)
        } else {
            self.v.load(dst, addr, masked)
        }
    }

    fn compute_ker_dw(&mut self, ur_w: usize, pad_l: usize, pad_r: usize, last_ch_block: bool) -> ConvResult<()> {
        let jcp = self.jcp;
        let nb = jcp.nb_ch_blocking;
        let tin = jcp.typesize_in as isize;
        let in_stride = jcp.src_pixel_stride() as isize;
        let ker_offset = |ci: usize, ki: usize| jcp.typesize_wei * ((ci * jcp.kh * jcp.kw + ki) * jcp.ch_block);
        let inp_offset = |pos: isize, ci: usize| tin * (pos * in_stride + (ci * jcp.ch_block) as isize);

        if jcp.is_resrc_depthwise {
            // Each input pixel is loaded once and reused by every tap.
            let n_inp = (ur_w - 1) * jcp.stride_w + jcp.kw;
            let ii_start = pad_l.min(n_inp);
            let ii_end = n_inp.saturating_sub(pad_r).max(ii_start);
            for ci in 0..nb {
                let masked = last_ch_block && ci == nb - 1;
                for ii in ii_start..ii_end {
                    let inp = self.regs.inp(ii);
                    self.load_dw_src(inp, inp_offset(ii as isize - pad_l as isize, ci), masked)?;
                }
                for ki in 0..jcp.kw {
                    let jj_start = self.ow_start(ki, pad_l);
                    let jj_end = self.ow_end(ur_w, ki, pad_r);
                    if jj_start >= jj_end {
                        continue;
                    }
                    let wei = self.regs.wei();
                    self.load_weights(wei, ker_offset(ci, ki))?;
                    for jj in jj_start..jj_end {
                        let acc = self.regs.acc(jj, ci);
                        let inp = self.regs.inp(jj * jcp.stride_w + ki);
                        self.accumulate(acc, inp, wei)?;
                    }
                }
            }
            return Ok(());
        }

        for ki in 0..jcp.kw {
            let jj_start = self.ow_start(ki, pad_l);
            let jj_end = self.ow_end(ur_w, ki, pad_r);
            if jj_start >= jj_end {
                continue;
            }
            for ci in 0..nb {
                let masked = last_ch_block && ci == nb - 1;
                let wei = self.regs.wei();
                let src = self.regs.dw_src();
                self.load_weights(wei, ker_offset(ci, ki))?;
                for jj in jj_start..jj_end {
                    let pos = (jj * jcp.stride_w + ki * (jcp.dilate_w + 1)) as isize - pad_l as isize;
                    self.load_dw_src(src, inp_offset(pos, ci), masked)?;
                    let acc = self.regs.acc(jj, ci);
                    self.accumulate(acc, src, wei)?;
                }
            }
        }
        Ok(())
    }

    // ── Output stage ────────────────────────────────────────────────────

    fn out_offset(&self, j: usize, k: usize) -> i32 {
        let jcp = self.jcp;
        (jcp.typesize_out * (j * jcp.dst_pixel_stride() + k * jcp.out_block())) as i32
    }

    fn store_output(&mut self, ur_w: usize, last_block: bool) -> ConvResult<()> {
        let jcp = self.jcp;
        let nb = jcp.nb_blocking();
        let block = jcp.out_block();
        let s: [VReg; STORE_TEMPS] = std::array::from_fn(|i| self.regs.store_tmp(i));
        let regs = &self.regs;
        let accs: Vec<(usize, usize, VReg)> =
            (0..nb).flat_map(|k| (0..ur_w).map(move |j| (j, k, regs.acc(j, k)))).collect();
        let acc_regs: Vec<VReg> = accs.iter().map(|&(_, _, r)| r).collect();
        let masked = |k: usize| last_block && k == nb - 1;

        // int -> f32, bias, output scale
        for k in 0..nb {
            if let Some(bia_dt) = jcp.bia_dt {
                let off = (jcp.typesize_bia * k * block) as i32;
                self.v.load_as_f32(s[0], ptr(REG_BIAS + off), bia_dt, masked(k))?;
            }
            // the scale table is padded to whole blocks: never masked
            let scale_off = if jcp.is_oc_scale { (4 * k * block) as i32 } else { 0 };
            self.v.load(s[1], ptr(REG_SCALES + scale_off), false)?;
            for j in 0..ur_w {
                let acc = self.regs.acc(j, k);
                if jcp.int_path() {
                    self.v.vcvtdq2ps(acc, acc)?;
                }
                if jcp.with_bias {
                    self.v.vaddps(acc, acc, s[0])?;
                }
                self.v.vmulps(acc, acc, s[1])?;
            }
        }

        let eltwise_temps: [VReg; ELTWISE_TEMPS] = [s[0], s[1], s[2], s[3]];
        if let Some(e) = jcp.post_ops.eltwise_pre_sum {
            emit_eltwise(&mut self.v, &e, &acc_regs, &eltwise_temps)?;
        }
        if let Some(sum_scale) = jcp.post_ops.sum_scale {
            if sum_scale != 1.0 {
                self.v.broadcast_f32(s[3], sum_scale)?;
            }
            for &(j, k, acc) in &accs {
                let addr = ptr(REG_OUT + self.out_offset(j, k));
                self.v.load_as_f32(s[2], addr, jcp.dst_dt, masked(k))?;
                if sum_scale == 1.0 {
                    self.v.vaddps(acc, acc, s[2])?;
                } else {
                    self.v.vfmadd231ps(acc, s[2], s[3])?;
                }
            }
        }
        if let Some(e) = jcp.post_ops.eltwise_post_sum {
            emit_eltwise(&mut self.v, &e, &acc_regs, &eltwise_temps)?;
        }

        if let Some((lo, hi)) = saturation_bounds(jcp.dst_dt) {
            self.v.broadcast_f32(s[0], lo)?;
            self.v.broadcast_f32(s[1], hi)?;
            for &acc in &acc_regs {
                // maxps returns the second operand on NaN: NaN saturates to lo
                self.v.vmaxps(acc, acc, s[0])?;
                self.v.vminps(acc, acc, s[1])?;
                self.v.round(acc, jcp.round_mode)?;
                self.v.vcvttps2dq(acc, acc)?;
            }
        }

        for &(j, k, acc) in &accs {
            let addr = ptr(REG_OUT + self.out_offset(j, k));
            match jcp.dst_dt {
                DataType::F32 | DataType::S32 => self.v.store(addr, acc, masked(k))?,
                DataType::S8 | DataType::U8 => {
                    self.v.store_bytes(addr, acc, jcp.dst_dt == DataType::S8, masked(k), s[2])?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ow_range_helpers() {
        assert_eq!(div_up_pos(-3, 2), 0);
        assert_eq!(div_up_pos(0, 2), 0);
        assert_eq!(div_up_pos(3, 2), 2);
        // 8 outputs, 3 taps, stride 1, pad 1 on each side of an 8-wide row
        assert_eq!(end_padding(1, 8, 8, 1, 3), 1);
        assert_eq!(end_padding(0, 6, 8, 1, 3), 0);
        assert_eq!(end_padding(0, 4, 8, 1, 3), -2);
    }

    #[test]
    fn test_saturation_bounds() {
        assert_eq!(saturation_bounds(DataType::U8), Some((0.0, 255.0)));
        assert_eq!(saturation_bounds(DataType::S8), Some((-128.0, 127.0)));
        assert!(saturation_bounds(DataType::F32).is_none());
        let (_, hi) = saturation_bounds(DataType::S32).unwrap();
        assert!((hi as f64) < 2_147_483_648.0);
    }
}
