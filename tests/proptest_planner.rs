//! Property-based tests for the blocking planner and the post-op whitelist.
//!
//! Uses proptest to verify invariants that must hold for all inputs:
//! - Planning determinism
//! - Blocking covers the output row and respects register limits
//! - Every accepted configuration generates code
//! - Generated kernels agree with the scalar reference
//! - The post-op whitelist accepts exactly the five fused patterns

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use conv_jit_kernels::attr::{Eltwise, PostOpKind, PostOps, MAX_POST_OPS};
use conv_jit_kernels::compiler::codegen;
use conv_jit_kernels::compiler::planner::plan_for_profile;
use conv_jit_kernels::{
    device_profile, post_ops_ok, reference_forward, reorder_weights, ConvDesc, ConvForward, DataType, DeviceProfile,
    IsaLevel, PrimitiveAttr,
};

// ═══════════════════════════════════════════════════════════════════════
// Strategies
// ═══════════════════════════════════════════════════════════════════════

fn arb_isa() -> impl Strategy<Value = IsaLevel> {
    prop_oneof![Just(IsaLevel::Avx2), Just(IsaLevel::Avx512)]
}

fn arb_types() -> impl Strategy<Value = (DataType, DataType, DataType)> {
    prop_oneof![
        Just((DataType::F32, DataType::F32, DataType::F32)),
        Just((DataType::U8, DataType::S8, DataType::S32)),
        Just((DataType::S8, DataType::S8, DataType::U8)),
        Just((DataType::U8, DataType::S8, DataType::F32)),
    ]
}

/// 2-D descriptors: depthwise or regular, with padding never exceeding
/// the kernel extent.
fn arb_desc() -> impl Strategy<Value = ConvDesc> {
    (
        1usize..=3,
        any::<bool>(),
        1usize..=40,
        1usize..=3,
        4usize..=40,
        1usize..=5,
        1usize..=2,
        0usize..=1,
        arb_types(),
    )
        .prop_flat_map(|(mb, depthwise, channels, groups, spatial, k, stride, dilate, types)| {
            let pad = 0..=(k - 1) / 2;
            (Just((mb, depthwise, channels, groups, spatial, k, stride, dilate, types)), pad.clone(), pad)
        })
        .prop_map(|((mb, depthwise, channels, groups, spatial, k, stride, dilate, (src, wei, dst)), ph, pw)| {
            let base = if depthwise {
                ConvDesc::depthwise2d(mb, channels, (spatial, spatial), (k, k))
            } else {
                ConvDesc::conv2d(mb, groups, channels, channels, (spatial, spatial), (k, k))
            };
            base.with_strides(stride, stride)
                .with_dilation(dilate, dilate)
                .with_padding(ph, pw, ph, pw)
                .with_data_types(src, wei, dst)
        })
        .prop_filter("kernel must fit the padded input", |d| d.oh > 0 && d.ow > 0)
}

fn arb_kinds() -> impl Strategy<Value = Vec<PostOpKind>> {
    prop::collection::vec(prop_oneof![Just(PostOpKind::Sum), Just(PostOpKind::Eltwise)], 0..=MAX_POST_OPS)
}

// ═══════════════════════════════════════════════════════════════════════
// Planner
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Identical inputs give identical configurations (or identical refusals).
    #[test]
    fn prop_plan_deterministic(desc in arb_desc(), isa in arb_isa(), nthreads in 1usize..=32) {
        let profile = DeviceProfile::with_isa(isa, 8);
        let attr = PrimitiveAttr::default();
        let a = plan_for_profile(&desc, &attr, nthreads, &profile);
        let b = plan_for_profile(&desc, &attr, nthreads, &profile);
        match (a, b) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "planning is not deterministic"),
        }
    }

    /// Accepted blockings tile the output row and fit the register file.
    #[test]
    fn prop_plan_blocking_legal(desc in arb_desc(), isa in arb_isa(), nthreads in 1usize..=32) {
        let profile = DeviceProfile::with_isa(isa, 8);
        let Ok(c) = plan_for_profile(&desc, &PrimitiveAttr::default(), nthreads, &profile) else {
            return Ok(());
        };
        prop_assert!(c.ur_w >= 1 && c.ur_w <= c.ow);
        prop_assert!(c.r_pad_no_tail() <= c.ur_w as isize);
        prop_assert_eq!(c.ur_w_tail, c.ow % c.ur_w);
        prop_assert!(c.l_pad <= c.ur_w);
        prop_assert!(c.nb_ow * c.ow_block >= c.ow);
        prop_assert!((c.nb_ow - 1) * c.ow_block < c.ow);
        prop_assert!(c.nb_ow == 1 || c.ow_block % c.ur_w == 0);
        if c.is_depthwise {
            prop_assert_eq!(c.nb_ch % c.nb_ch_blocking, 0);
            prop_assert!(c.ur_w * c.nb_ch_blocking <= c.max_regs_ur);
        } else {
            prop_assert_eq!(c.oc % c.oc_block, 0);
            prop_assert_eq!(c.ic % c.ic_block, 0);
            prop_assert_eq!(c.nb_oc % c.nb_oc_blocking, 0);
            prop_assert_eq!(c.nb_oc_blocking_thr_chunk % c.nb_oc_blocking, 0);
            prop_assert!(c.ur_w * (c.nb_oc_blocking + 1) <= c.max_regs_ur);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever the planner accepts, the emitter can generate.
    #[test]
    fn prop_accepted_plans_generate(desc in arb_desc(), isa in arb_isa(), nthreads in 1usize..=16) {
        let profile = DeviceProfile::with_isa(isa, 8);
        if let Ok(conf) = plan_for_profile(&desc, &PrimitiveAttr::default(), nthreads, &profile) {
            let code = codegen::generate(&conf).unwrap();
            prop_assert!(!code.is_empty());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Generated kernels against the reference
// ═══════════════════════════════════════════════════════════════════════

/// Small integer values, so every data type combination compares exactly.
fn small_ints(dt: DataType, len: usize, rng: &mut StdRng) -> Vec<u8> {
    let mut out = Vec::with_capacity(len * dt.size_bytes());
    for _ in 0..len {
        match dt {
            DataType::F32 => out.extend_from_slice(&(rng.gen_range(-3i32..=3) as f32).to_le_bytes()),
            DataType::S32 => out.extend_from_slice(&rng.gen_range(-50i32..=50).to_le_bytes()),
            DataType::S8 => out.push(rng.gen_range(-6i8..=6) as u8),
            DataType::U8 => out.push(rng.gen_range(0u8..=12)),
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_kernel_matches_reference(desc in arb_desc(), nthreads in 1usize..=8, seed in any::<u64>()) {
        if device_profile().isa.is_none() {
            return Ok(());
        }
        let attr = PrimitiveAttr::default();
        let fwd = match ConvForward::new(&desc, &attr, nthreads) {
            Ok(fwd) => fwd,
            Err(e) if e.is_unimplemented() => return Ok(()),
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let src = small_ints(desc.src_dt, desc.mb * desc.ih * desc.iw * desc.ngroups * desc.ic, &mut rng);
        let plain = small_ints(desc.wei_dt, desc.ngroups * desc.oc * desc.ic * desc.kh * desc.kw, &mut rng);
        let dst_init = small_ints(desc.dst_dt, desc.mb * desc.oh * desc.ow * desc.ngroups * desc.oc, &mut rng);

        let mut want = dst_init.clone();
        reference_forward(&desc, &attr, &src, &plain, None, &mut want).unwrap();
        let blocked = reorder_weights(fwd.conf(), &plain).unwrap();
        let mut got = dst_init;
        fwd.execute(&src, &blocked, None, &mut got).unwrap();
        // integer-valued inputs keep even f32 outputs exact
        prop_assert_eq!(got, want);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Post-op whitelist
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn prop_post_op_whitelist(kinds in arb_kinds()) {
        let mut p = PostOps::new();
        for k in &kinds {
            match k {
                PostOpKind::Sum => p.append_sum(1.0).unwrap(),
                PostOpKind::Eltwise => p.append_eltwise(Eltwise::relu()).unwrap(),
            }
        }
        let expected = match kinds.as_slice() {
            [] | [_] => true,
            [a, b] => a != b,
            _ => false,
        };
        prop_assert_eq!(post_ops_ok(&p), expected);
    }
}
