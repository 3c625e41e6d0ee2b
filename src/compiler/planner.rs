//! Blocking planner — transforms a `ConvDesc` + `DeviceProfile` into a
//! validated `ConvConf`.
//!
//! Every blocking decision is made here: channel blocks, oc blocking, the
//! unroll width, the ow thread partition and the loop order. Generated code
//! bakes these in as immediates, so a configuration the emitter could not
//! handle is rejected here with `Unimplemented` rather than clamped.

use log::debug;

use crate::attr::PrimitiveAttr;
use crate::compiler::codegen::regs::{RegBudget, VecWidth};
use crate::compiler::conf::{right_pad_without_tail, ConvConf, LoopOrder};
use crate::compiler::post_ops::FusedPostOps;
use crate::dispatch::{device_profile, DeviceProfile, IsaLevel};
use crate::error::{unimplemented_conf, ConvError, ConvResult};
use crate::types::{ConvDesc, DataType, MemoryFormat};

// ── Tunable policy parameters ───────────────────────────────────────────
//
// Empirically tuned on classification networks (googlenet_v3, resnet_50);
// kernel performance depends on these exact values.

/// Default number of oc blocks a thread works on.
pub const MAX_THREADING_NB_OC_CHUNK: usize = 4;
/// Chunk used for mb=1 3x3 stride-1 layers with `ic % 64 == 0`.
pub const SMALL_BATCH_3X3_NB_OC_CHUNK: usize = 2;
/// Output widths at or below this reduce `nb_oc_blocking` for mb=1.
pub const SMALL_OW_NB_OC_BLOCKING_THRESHOLD: usize = 17;
/// `nb_oc_blocking` cap in the small-ow case.
pub const SMALL_OW_MAX_NB_OC_BLOCKING: usize = 2;
/// Upper bound of depthwise channel-block grouping per call.
pub const MAX_NB_CH_BLOCKING: usize = 4;
/// Stop shrinking ow blocks below the oc chunk once efficiency exceeds this.
pub const OW_BLOCK_MIN_EFFICIENCY: f32 = 0.8;
/// Accept the current best and stop searching above this efficiency.
pub const OW_BLOCK_GOOD_EFFICIENCY: f32 = 0.9;
/// A new ow-block candidate must beat the best by this factor.
pub const OW_BLOCK_IMPROVEMENT: f32 = 1.1;

#[inline]
fn div_up(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[inline]
fn rnd_up(a: usize, b: usize) -> usize {
    div_up(a, b) * b
}

/// Plan for the current host.
pub fn plan(desc: &ConvDesc, attr: &PrimitiveAttr, nthreads: usize) -> ConvResult<ConvConf> {
    plan_for_profile(desc, attr, nthreads, device_profile())
}

/// Plan for an explicit ISA level (reproducible across hosts).
pub fn plan_for_isa(desc: &ConvDesc, attr: &PrimitiveAttr, nthreads: usize, isa: IsaLevel) -> ConvResult<ConvConf> {
    let mut profile = DeviceProfile::with_isa(isa, 1);
    profile.cores = device_profile().cores;
    plan_for_profile(desc, attr, nthreads, &profile)
}

/// Plan against an explicit device profile. Pure: identical inputs give
/// identical configurations.
pub fn plan_for_profile(
    desc: &ConvDesc,
    attr: &PrimitiveAttr,
    nthreads: usize,
    profile: &DeviceProfile,
) -> ConvResult<ConvConf> {
    let result = init_conf(desc, attr, nthreads.max(1), profile);
    match &result {
        Ok(c) => debug!(
            "conv plan: isa={:?} width={:?} ur_w={} tail={} nb_oc_blocking={} chunk={} nb_ch_blocking={} \
             ow_block={} nb_ow={} order={:?}",
            c.isa, c.vec_width, c.ur_w, c.ur_w_tail, c.nb_oc_blocking, c.nb_oc_blocking_thr_chunk,
            c.nb_ch_blocking, c.ow_block, c.nb_ow, c.loop_order
        ),
        Err(e) => debug!("conv plan rejected: {e}"),
    }
    result
}

fn data_types_ok(desc: &ConvDesc) -> bool {
    use DataType::*;
    let int_path = matches!(desc.src_dt, U8 | S8) && desc.wei_dt == S8;
    let float_path = desc.src_dt == F32 && desc.wei_dt == F32;
    // dst and bias accept every element type
    int_path || float_path
}

/// Adopt the planner's format when the caller left it open, reject a
/// mismatching explicit one.
fn pick_format(requested: MemoryFormat, chosen: MemoryFormat, what: &str) -> ConvResult<MemoryFormat> {
    match requested {
        MemoryFormat::Any => Ok(chosen),
        f if f == chosen => Ok(f),
        f => unimplemented_conf!("{what} format {f:?} (kernel needs {chosen:?})"),
    }
}

fn pick_loop_order(ngroups: usize, mb: usize, ndims: usize, nthreads: usize) -> LoopOrder {
    if ngroups > 1 {
        if mb < nthreads {
            return if ndims == 3 { LoopOrder::Nwcg } else { LoopOrder::Nhwcg };
        }
        return LoopOrder::Ngcw;
    }
    LoopOrder::Cwgn
}

fn init_conf(desc: &ConvDesc, attr: &PrimitiveAttr, nthreads: usize, profile: &DeviceProfile) -> ConvResult<ConvConf> {
    desc.check_consistency()?;
    let Some(isa) = profile.isa else {
        unimplemented_conf!("host has neither AVX2+FMA nor AVX-512");
    };
    if desc.ndims == 5 {
        unimplemented_conf!("3-D convolution");
    }
    if !data_types_ok(desc) {
        unimplemented_conf!(
            "data types src={:?} wei={:?} dst={:?}",
            desc.src_dt, desc.wei_dt, desc.dst_dt
        );
    }

    let is_1d = desc.is_1d();
    let lanes = isa.lanes();
    let ngroups = desc.ngroups;
    let is_depthwise = desc.is_depthwise();
    let (ih, oh, kh, t_pad, stride_h, dilate_h) = if is_1d {
        (1, 1, 1, 0, 1, 0)
    } else {
        (desc.ih, desc.oh, desc.kh, desc.t_pad, desc.stride_h, desc.dilate_h)
    };
    let (iw, ow, kw, l_pad, stride_w, dilate_w) =
        (desc.iw, desc.ow, desc.kw, desc.l_pad, desc.stride_w, desc.dilate_w);

    // ── Channel blocks ──
    let (ch_block, mut ic_block, mut oc_block);
    let (mut ic, mut oc) = (desc.ic, desc.oc);
    if is_depthwise {
        ch_block = lanes;
        ic_block = 1;
        oc_block = 1;
    } else {
        ch_block = 1;
        ic_block = lanes;
        oc_block = lanes;
        if ngroups == 1 {
            ic = rnd_up(ic, ic_block);
            oc = rnd_up(oc, oc_block);
        } else if !is_1d && ic % ic_block != 0 {
            // grouped channels cannot be padded: narrow the vector instead
            ic_block = if ic % 8 == 0 && lanes > 8 { 8 } else { 4 };
            oc_block = ic_block;
        }
        if ic % ic_block != 0 || oc % oc_block != 0 {
            unimplemented_conf!("channels ic={ic} oc={oc} not divisible by block {ic_block}");
        }
    }
    let block = if is_depthwise { ch_block } else { oc_block };
    let Some(vec_width) = VecWidth::for_block(block) else {
        unimplemented_conf!("channel block {block}");
    };

    let b_pad = ((oh - 1) * stride_h + (kh - 1) * (dilate_h + 1)) as isize - (ih + t_pad - 1) as isize;

    // ── Post-ops and output scales ──
    let Some(fused) = FusedPostOps::extract(&attr.post_ops) else {
        unimplemented_conf!("post-ops pattern {:?}", attr.post_ops.entries());
    };
    let oscales = &attr.output_scales;
    let is_oc_scale = oscales.is_per_oc();
    if !is_oc_scale && oscales.mask != 0 {
        unimplemented_conf!("output scales mask {:#x}", oscales.mask);
    }
    let expected_scales = if is_oc_scale { ngroups * desc.oc } else { 1 };
    if oscales.scales.len() != expected_scales {
        return Err(ConvError::InvalidArguments(format!(
            "expected {expected_scales} output scales, got {}",
            oscales.scales.len()
        )));
    }

    let signed_input = desc.src_dt == DataType::S8;
    let int_path = desc.src_dt.is_int8();
    let is_resrc_depthwise = is_depthwise && stride_w < kw && kw < 4 && dilate_w == 0;

    let has_tail = if is_depthwise { ngroups % ch_block != 0 } else { desc.oc % oc_block != 0 };
    let mask_vec = !isa.has_opmask() && has_tail;
    let budget = RegBudget::new(isa, is_depthwise, is_resrc_depthwise, int_path, mask_vec);
    let max_regs_ur = budget.max_regs_ur();

    // ── Formats ──
    let act_fmt = if is_1d { MemoryFormat::Nwc } else { MemoryFormat::Nhwc };
    let wei_choice = if is_depthwise {
        MemoryFormat::DepthwiseBlocked { ch_block }
    } else {
        MemoryFormat::OIhwBlocked { ic_block, oc_block }
    };
    let src_fmt = pick_format(desc.src_fmt, act_fmt, "src")?;
    let dst_fmt = pick_format(desc.dst_fmt, act_fmt, "dst")?;
    let wei_fmt = pick_format(desc.wei_fmt, wei_choice, "weights")?;
    let bias_fmt = match desc.bias_dt {
        Some(_) => pick_format(desc.bias_fmt, MemoryFormat::X, "bias")?,
        None => MemoryFormat::Any,
    };

    let nb_ch = div_up(ngroups, ch_block);
    let nb_ic = ic / ic_block;
    let nb_oc = oc / oc_block;

    // In-kernel displacements stay inside one image plane or the weights.
    let plane_bytes = (ih * iw * desc.ic * ngroups * desc.src_dt.size_bytes())
        .max(oh * ow * desc.oc * ngroups * desc.dst_dt.size_bytes());
    let weights_bytes = nb_ch * ch_block * oc * ic * kh * kw * desc.wei_dt.size_bytes();
    if plane_bytes.max(weights_bytes) > i32::MAX as usize {
        unimplemented_conf!("tensor extent exceeds 32-bit displacements");
    }

    // ── Depthwise grouping: largest divisor of nb_ch not above the cap ──
    let mut nb_ch_blocking = MAX_NB_CH_BLOCKING;
    while nb_ch_blocking > 1 && nb_ch % nb_ch_blocking != 0 {
        nb_ch_blocking -= 1;
    }
    let nb_ch_blocking = if is_depthwise { nb_ch_blocking } else { 1 };

    // ── oc blocking ──
    let is_oc_blocking_ok = |block: usize| {
        let ur_w = ow.min(max_regs_ur / (block + 1));
        ur_w > 0 && nb_oc % block == 0 && l_pad <= ur_w && ow % ur_w != 1
    };

    let cores_per_socket = profile.cores.per_socket;
    let mut max_threading_nb_oc_chunk = MAX_THREADING_NB_OC_CHUNK;
    if desc.mb == 1 && kh == 3 && kw == 3 && stride_w == 1 && ic % 64 == 0 && nthreads <= cores_per_socket {
        max_threading_nb_oc_chunk = SMALL_BATCH_3X3_NB_OC_CHUNK;
    }
    let mut nb_oc_blocking_thr_chunk = max_threading_nb_oc_chunk.min(nb_oc);
    while nb_oc_blocking_thr_chunk > 1 && !is_oc_blocking_ok(nb_oc_blocking_thr_chunk) {
        nb_oc_blocking_thr_chunk -= 1;
    }

    let mut nb_oc_blocking = nb_oc_blocking_thr_chunk;
    if desc.mb == 1
        && ow <= SMALL_OW_NB_OC_BLOCKING_THRESHOLD
        && stride_w == 1
        && nthreads <= cores_per_socket
        && !(kh == 1 && kw == 3)
        && !(kh >= 7 && oc % 64 == 0)
    {
        nb_oc_blocking = SMALL_OW_MAX_NB_OC_BLOCKING.min(nb_oc);
        while nb_oc_blocking > 1
            && !(nb_oc_blocking_thr_chunk % nb_oc_blocking == 0 && is_oc_blocking_ok(nb_oc_blocking))
        {
            nb_oc_blocking -= 1;
        }
    }

    // ── Unroll width ──
    let mut ur_w = if is_resrc_depthwise {
        (max_regs_ur + stride_w).saturating_sub(kw) / (nb_ch_blocking + stride_w)
    } else if is_depthwise {
        max_regs_ur / nb_ch_blocking
    } else {
        max_regs_ur / (nb_oc_blocking + 1)
    };
    ur_w = ur_w.min(ow);
    if ur_w == 0 {
        unimplemented_conf!("no register room for a single output pixel");
    }
    let ur_w_tail = ow % ur_w;

    // ── ow partition across threads ──
    let mut ow_block = ow;
    let base_work_amount = desc.mb * nb_ch * oh * (nb_oc / nb_oc_blocking_thr_chunk);
    let thr_eff = |work: usize| work as f32 / rnd_up(work, nthreads) as f32;
    let mut best_thr_eff = thr_eff(base_work_amount);
    let max_nb_ow = div_up(ow, 2 * ur_w);
    for nb_ow in 1..=max_nb_ow {
        let candidate = rnd_up(div_up(ow, nb_ow), ur_w).min(ow);
        if candidate < nb_oc_blocking_thr_chunk * oc_block && best_thr_eff > OW_BLOCK_MIN_EFFICIENCY {
            break;
        }
        if div_up(ow, candidate) != nb_ow {
            continue;
        }
        let eff = thr_eff(base_work_amount * nb_ow);
        if candidate >= 2 * ur_w && eff > OW_BLOCK_IMPROVEMENT * best_thr_eff {
            ow_block = candidate;
            best_thr_eff = eff;
        }
        if best_thr_eff > OW_BLOCK_GOOD_EFFICIENCY {
            break;
        }
    }
    let nb_ow = div_up(ow, ow_block);

    // ── Final legality ──
    if oc % oc_block != 0 || ic % ic_block != 0 {
        unimplemented_conf!("channels ic={ic} oc={oc} not multiples of the blocks {ic_block}/{oc_block}");
    }
    if l_pad > ur_w {
        unimplemented_conf!("l_pad={l_pad} exceeds ur_w={ur_w}");
    }
    let r_pad_no_tail = right_pad_without_tail(ow - ur_w_tail, iw, kw, l_pad, stride_w, dilate_w);
    if r_pad_no_tail > ur_w as isize {
        unimplemented_conf!("right padding {r_pad_no_tail} exceeds ur_w={ur_w}");
    }

    let loop_order = pick_loop_order(ngroups, desc.mb, desc.ndims, nthreads);

    Ok(ConvConf {
        isa,
        vec_width,
        ndims: desc.ndims,
        mb: desc.mb,
        ngroups,
        ic,
        oc,
        ic_without_padding: desc.ic,
        oc_without_padding: desc.oc,
        ih,
        iw,
        oh,
        ow,
        kh,
        kw,
        t_pad,
        b_pad,
        l_pad,
        stride_h,
        stride_w,
        dilate_h,
        dilate_w,
        ch_block,
        ic_block,
        oc_block,
        nb_ch,
        nb_ic,
        nb_oc,
        nb_ch_blocking,
        nb_oc_blocking,
        nb_oc_blocking_thr_chunk,
        max_regs_ur,
        ur_w,
        ur_w_tail,
        ow_block,
        nb_ow,
        loop_order,
        is_depthwise,
        signed_input,
        is_resrc_depthwise,
        is_oc_scale,
        with_bias: desc.bias_dt.is_some(),
        src_dt: desc.src_dt,
        wei_dt: desc.wei_dt,
        dst_dt: desc.dst_dt,
        bia_dt: desc.bias_dt,
        typesize_in: desc.src_dt.size_bytes(),
        typesize_wei: desc.wei_dt.size_bytes(),
        typesize_out: desc.dst_dt.size_bytes(),
        typesize_bia: desc.bias_dt.map_or(0, DataType::size_bytes),
        src_fmt,
        wei_fmt,
        dst_fmt,
        bias_fmt,
        round_mode: attr.round_mode,
        post_ops: fused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Eltwise, OutputScales, PostOps};

    fn avx512() -> DeviceProfile {
        DeviceProfile::with_isa(IsaLevel::Avx512, 16)
    }

    fn avx2() -> DeviceProfile {
        DeviceProfile::with_isa(IsaLevel::Avx2, 16)
    }

    #[test]
    fn test_depthwise_blocking() {
        let desc = ConvDesc::depthwise2d(1, 16, (8, 8), (3, 3));
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap();
        eprintln!("{c:?}");
        assert!(c.is_depthwise && !c.has_channel_tail() && c.is_resrc_depthwise);
        assert_eq!((c.ch_block, c.ic_block, c.oc_block), (16, 1, 1));
        assert_eq!(c.nb_ch, 1);
        assert_eq!(c.nb_ch_blocking, 1);
        assert_eq!(c.ur_w, 6);
        assert_eq!(c.ur_w_tail, 0);
        assert_eq!(c.vec_width, VecWidth::Zmm);
        assert_eq!(c.loop_order, LoopOrder::Ngcw);

        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 4, &avx512()).unwrap();
        assert_eq!(c.loop_order, LoopOrder::Nhwcg);
    }

    #[test]
    fn test_right_pad_without_tail() {
        // 6 wide, 3 taps, pad 1 on both sides: the last pixel reads one padded column
        assert_eq!(right_pad_without_tail(6, 6, 3, 1, 1, 0), 1);
        assert_eq!(right_pad_without_tail(5, 6, 3, 1, 1, 0), 0);
        // dilation widens the footprint
        assert_eq!(right_pad_without_tail(7, 8, 3, 2, 1, 1), 1);

        let desc = ConvDesc::conv2d(1, 1, 16, 16, (6, 6), (3, 3)).with_padding(1, 1, 1, 1);
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx2()).unwrap();
        assert!(c.r_pad_no_tail() <= c.ur_w as isize);
    }

    #[test]
    fn test_regular_channels_padded() {
        let desc = ConvDesc::conv2d(2, 1, 3, 17, (10, 10), (3, 3)).with_padding(1, 1, 1, 1);
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 4, &avx512()).unwrap();
        assert_eq!((c.ic, c.oc), (16, 32));
        assert_eq!((c.ic_without_padding, c.oc_without_padding), (3, 17));
        assert_eq!(c.nb_oc, 2);
        assert!(c.has_channel_tail());
        assert_eq!(c.channel_tail(), 1);
        assert_eq!(c.loop_order, LoopOrder::Cwgn);
        assert!(c.l_pad <= c.ur_w);
    }

    #[test]
    fn test_grouped_narrow_blocks() {
        let desc = ConvDesc::conv2d(1, 4, 8, 8, (6, 6), (3, 3));
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap();
        assert_eq!((c.ic_block, c.oc_block), (8, 8));
        assert_eq!(c.vec_width, VecWidth::Ymm);

        let desc = ConvDesc::conv2d(1, 2, 12, 12, (6, 6), (3, 3));
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap();
        assert_eq!(c.ic_block, 4);
        assert_eq!(c.vec_width, VecWidth::Xmm);

        let desc = ConvDesc::conv2d(1, 2, 6, 6, (6, 6), (3, 3));
        let err = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[test]
    fn test_avx2_uses_ymm_and_mask_register() {
        let desc = ConvDesc::depthwise2d(1, 12, (5, 5), (3, 3));
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx2()).unwrap();
        assert_eq!(c.ch_block, 8);
        assert_eq!(c.nb_ch, 2);
        assert_eq!(c.nb_ch_blocking, 2);
        assert!(c.has_channel_tail());
        assert_eq!(c.max_regs_ur, 16 - 1 - 5);
    }

    #[test]
    fn test_unsupported_data_types() {
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1))
            .with_data_types(DataType::U8, DataType::U8, DataType::F32);
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap_err().is_unimplemented());

        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1))
            .with_data_types(DataType::S32, DataType::S8, DataType::F32);
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap_err().is_unimplemented());
    }

    #[test]
    fn test_three_d_rejected() {
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1)).with_depth(4, 1);
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap_err().is_unimplemented());
    }

    #[test]
    fn test_no_isa_rejected() {
        let mut profile = avx2();
        profile.isa = None;
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1));
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &profile).unwrap_err().is_unimplemented());
    }

    #[test]
    fn test_bad_post_ops_rejected() {
        let mut p = PostOps::new();
        p.append_eltwise(Eltwise::relu()).unwrap();
        p.append_eltwise(Eltwise::relu()).unwrap();
        let attr = PrimitiveAttr::default().with_post_ops(p);
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1));
        assert!(plan_for_profile(&desc, &attr, 1, &avx512()).unwrap_err().is_unimplemented());
    }

    #[test]
    fn test_scales_validation() {
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1));
        let bad_mask = PrimitiveAttr::default().with_output_scales(OutputScales { mask: 1, scales: vec![1.0] });
        assert!(plan_for_profile(&desc, &bad_mask, 1, &avx512()).unwrap_err().is_unimplemented());

        let short = PrimitiveAttr::default().with_output_scales(OutputScales::per_oc(vec![1.0; 15]));
        assert!(matches!(
            plan_for_profile(&desc, &short, 1, &avx512()),
            Err(ConvError::InvalidArguments(_))
        ));

        let ok = PrimitiveAttr::default().with_output_scales(OutputScales::per_oc(vec![1.0; 16]));
        assert!(plan_for_profile(&desc, &ok, 1, &avx512()).unwrap().is_oc_scale);
    }

    #[test]
    fn test_explicit_format_mismatch() {
        let mut desc = ConvDesc::conv2d(1, 1, 16, 16, (4, 4), (1, 1));
        desc.wei_fmt = MemoryFormat::Goihw;
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).unwrap_err().is_unimplemented());
        desc.wei_fmt = MemoryFormat::OIhwBlocked { ic_block: 16, oc_block: 16 };
        assert!(plan_for_profile(&desc, &PrimitiveAttr::default(), 1, &avx512()).is_ok());
    }

    #[test]
    fn test_wide_row_splits_into_ow_blocks() {
        // Single image, single oc chunk: threads only find work across ow.
        let desc = ConvDesc::conv2d(1, 1, 16, 16, (1, 256), (1, 3)).with_padding(0, 1, 0, 1);
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 8, &avx512()).unwrap();
        assert!(c.nb_ow > 1, "{c:?}");
        assert_eq!(c.ow_block % c.ur_w, 0);
        assert!(c.ow_block >= 2 * c.ur_w);
    }

    #[test]
    fn test_small_batch_chunk_rule() {
        let desc = ConvDesc::conv2d(1, 1, 64, 256, (14, 14), (3, 3)).with_padding(1, 1, 1, 1);
        let c = plan_for_profile(&desc, &PrimitiveAttr::default(), 4, &avx512()).unwrap();
        assert_eq!(c.nb_oc_blocking_thr_chunk, SMALL_BATCH_3X3_NB_OC_CHUNK);
        assert!(c.nb_oc_blocking <= SMALL_OW_MAX_NB_OC_BLOCKING);
    }
}
