//! Scalar fallback over typed byte buffers.
//!
//! Widens every tensor to `f32`, runs `conv_scalar_ops::conv_forward` and
//! narrows the result back. Used when the planner answers `Unimplemented`
//! and as the oracle of the integration tests.

use conv_scalar_ops::{conv_forward, Activation, ConvShape, PostOp, Rounding, StoreType};

use crate::attr::{EltwiseAlg, PostOpEntry, PrimitiveAttr, RoundMode};
use crate::error::{unimplemented_conf, ConvError, ConvResult};
use crate::types::{ConvDesc, DataType};

/// Decode `bytes` as elements of `dt`.
pub fn widen(dt: DataType, bytes: &[u8]) -> Vec<f32> {
    match dt {
        DataType::F32 => bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>).collect(),
        DataType::S32 => bytes.chunks_exact(4).map(|c| bytemuck::pod_read_unaligned::<i32>(c) as f32).collect(),
        DataType::S8 => bytes.iter().map(|&b| b as i8 as f32).collect(),
        DataType::U8 => bytes.iter().map(|&b| b as f32).collect(),
    }
}

/// Encode `values` (already saturated and rounded for integer types) into
/// `bytes` as elements of `dt`.
pub fn narrow(dt: DataType, values: &[f32], bytes: &mut [u8]) {
    let size = dt.size_bytes();
    for (v, out) in values.iter().zip(bytes.chunks_exact_mut(size)) {
        match dt {
            DataType::F32 => out.copy_from_slice(bytemuck::bytes_of(v)),
            DataType::S32 => out.copy_from_slice(bytemuck::bytes_of(&(*v as i32))),
            DataType::S8 => out[0] = *v as i8 as u8,
            DataType::U8 => out[0] = *v as u8,
        }
    }
}

pub fn conv_shape(desc: &ConvDesc) -> ConvShape {
    ConvShape {
        mb: desc.mb,
        ngroups: desc.ngroups,
        ic: desc.ic,
        oc: desc.oc,
        ih: desc.ih,
        iw: desc.iw,
        oh: desc.oh,
        ow: desc.ow,
        kh: desc.kh,
        kw: desc.kw,
        stride_h: desc.stride_h,
        stride_w: desc.stride_w,
        t_pad: desc.t_pad,
        l_pad: desc.l_pad,
        dilate_h: desc.dilate_h,
        dilate_w: desc.dilate_w,
    }
}

fn store_type(dt: DataType) -> StoreType {
    match dt {
        DataType::F32 => StoreType::F32,
        DataType::S32 => StoreType::S32,
        DataType::S8 => StoreType::S8,
        DataType::U8 => StoreType::U8,
    }
}

fn scalar_post_ops(attr: &PrimitiveAttr) -> Vec<PostOp> {
    attr.post_ops
        .entries()
        .iter()
        .map(|entry| match *entry {
            PostOpEntry::Sum { scale } => PostOp::Sum { scale },
            PostOpEntry::Eltwise(e) => {
                let act = match e.alg {
                    EltwiseAlg::Relu => Activation::Relu { alpha: e.alpha },
                    EltwiseAlg::Linear => Activation::Linear { alpha: e.alpha, beta: e.beta },
                    EltwiseAlg::BoundedRelu => Activation::BoundedRelu { alpha: e.alpha },
                    EltwiseAlg::Clip => Activation::Clip { alpha: e.alpha, beta: e.beta },
                    EltwiseAlg::Abs => Activation::Abs,
                    EltwiseAlg::Square => Activation::Square,
                    EltwiseAlg::Sqrt => Activation::Sqrt,
                };
                PostOp::Eltwise { act, scale: e.scale }
            }
        })
        .collect()
}

fn check_len(what: &str, got: usize, need: usize) -> ConvResult<()> {
    if got < need {
        return Err(ConvError::InvalidArguments(format!("{what} buffer holds {got} bytes, needs {need}")));
    }
    Ok(())
}

/// Reference forward pass. Weights are plain `goihw`; activations are
/// channels-last like the generated kernels use.
pub fn reference_forward(
    desc: &ConvDesc,
    attr: &PrimitiveAttr,
    src: &[u8],
    weights: &[u8],
    bias: Option<&[u8]>,
    dst: &mut [u8],
) -> ConvResult<()> {
    desc.check_consistency()?;
    if desc.ndims == 5 {
        unimplemented_conf!("3-D reference convolution");
    }
    let shape = conv_shape(desc);
    check_len("src", src.len(), shape.src_len() * desc.src_dt.size_bytes())?;
    check_len("weights", weights.len(), shape.weights_len() * desc.wei_dt.size_bytes())?;
    check_len("dst", dst.len(), shape.dst_len() * desc.dst_dt.size_bytes())?;
    let bias = match (desc.bias_dt, bias) {
        (Some(dt), Some(b)) => {
            check_len("bias", b.len(), desc.ngroups * desc.oc * dt.size_bytes())?;
            Some(widen(dt, b))
        }
        (None, None) => None,
        (Some(_), None) => return Err(ConvError::InvalidArguments("bias buffer missing".into())),
        (None, Some(_)) => return Err(ConvError::InvalidArguments("bias given for a bias-less convolution".into())),
    };

    let dst_bytes = shape.dst_len() * desc.dst_dt.size_bytes();
    let src_f = widen(desc.src_dt, &src[..shape.src_len() * desc.src_dt.size_bytes()]);
    let wei_f = widen(desc.wei_dt, &weights[..shape.weights_len() * desc.wei_dt.size_bytes()]);
    let mut dst_f = widen(desc.dst_dt, &dst[..dst_bytes]);
    let rounding = match attr.round_mode {
        RoundMode::Nearest => Rounding::Nearest,
        RoundMode::Down => Rounding::Down,
    };
    conv_forward(
        &shape,
        &src_f,
        &wei_f,
        bias.as_deref(),
        &attr.output_scales.scales,
        &scalar_post_ops(attr),
        rounding,
        store_type(desc.dst_dt),
        &mut dst_f,
    );
    narrow(desc.dst_dt, &dst_f, &mut dst[..dst_bytes]);
    Ok(())
}
