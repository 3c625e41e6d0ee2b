//! Benchmark kernel generation latency and generated-kernel throughput.
//!
//! Run with: cargo bench --bench jit_compile_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use conv_jit_kernels::compiler::codegen;
use conv_jit_kernels::{
    device_profile, plan_for_isa, reorder_weights, ConvDesc, ConvForward, DataType, Eltwise, IsaLevel, PostOps,
    PrimitiveAttr,
};

/// MobileNet-style depthwise layer.
fn depthwise_desc() -> ConvDesc {
    ConvDesc::depthwise2d(1, 128, (56, 56), (3, 3)).with_padding(1, 1, 1, 1)
}

/// ResNet-style 3x3 int8 layer with a fused residual.
fn resnet_int8_desc() -> ConvDesc {
    ConvDesc::conv2d(1, 1, 64, 64, (28, 28), (3, 3))
        .with_padding(1, 1, 1, 1)
        .with_data_types(DataType::U8, DataType::S8, DataType::U8)
}

fn residual_attr() -> PrimitiveAttr {
    let mut p = PostOps::new();
    p.append_sum(1.0).unwrap();
    p.append_eltwise(Eltwise::relu()).unwrap();
    PrimitiveAttr::default().with_post_ops(p)
}

fn bench_codegen(c: &mut Criterion) {
    let cases = [
        ("codegen_depthwise_avx2", depthwise_desc(), PrimitiveAttr::default(), IsaLevel::Avx2),
        ("codegen_depthwise_avx512", depthwise_desc(), PrimitiveAttr::default(), IsaLevel::Avx512),
        ("codegen_int8_residual_avx512", resnet_int8_desc(), residual_attr(), IsaLevel::Avx512),
    ];
    for (name, desc, attr, isa) in cases {
        let conf = plan_for_isa(&desc, &attr, 4, isa).unwrap();
        c.bench_function(name, |b| {
            b.iter(|| black_box(codegen::generate(black_box(&conf)).unwrap()));
        });
    }
}

fn bench_execute(c: &mut Criterion) {
    if device_profile().isa.is_none() {
        eprintln!("skipping kernel throughput: host has no AVX2+FMA");
        return;
    }
    let nthreads = rayon::current_num_threads();
    let mut group = c.benchmark_group("execute");
    for (name, desc, attr) in [
        ("depthwise_f32", depthwise_desc(), PrimitiveAttr::default()),
        ("int8_residual", resnet_int8_desc(), residual_attr()),
    ] {
        let fwd = ConvForward::new(&desc, &attr, nthreads).unwrap();
        let plain = vec![1u8; desc.ngroups * desc.oc * desc.ic * desc.kh * desc.kw * desc.wei_dt.size_bytes()];
        let weights = reorder_weights(fwd.conf(), &plain).unwrap();
        let src = vec![1u8; fwd.src_size()];
        let mut dst = vec![0u8; fwd.dst_size()];
        let mut scratch = vec![0u8; fwd.scratchpad_size()];
        let macs = desc.mb * desc.oh * desc.ow * desc.ngroups * desc.oc * desc.ic * desc.kh * desc.kw;
        group.throughput(Throughput::Elements(macs as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                fwd.execute_with_scratchpad(black_box(&src), &weights, None, &mut dst, &mut scratch).unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(
    name = jit_compile;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(1))
        .measurement_time(std::time::Duration::from_secs(5))
        .sample_size(20);
    targets =
        bench_codegen,
        bench_execute,
);
criterion_main!(jit_compile);
