//! Naive direct convolution over channels-last tensors.
//!
//! Layouts:
//! - src: `[mb][ih][iw][ngroups * ic]`
//! - weights: `[ngroups][oc][ic][kh][kw]`
//! - bias: `[ngroups * oc]`
//! - dst: `[mb][oh][ow][ngroups * oc]`
//!
//! 1-D convolutions use `ih = oh = kh = 1`.

use crate::activations::Activation;
use crate::quant::{saturate, Rounding, StoreType};

/// Convolution geometry. Channel counts are per group; dilations are
/// zero-based (0 means dense).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShape {
    pub mb: usize,
    pub ngroups: usize,
    pub ic: usize,
    pub oc: usize,
    pub ih: usize,
    pub iw: usize,
    pub oh: usize,
    pub ow: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub t_pad: usize,
    pub l_pad: usize,
    pub dilate_h: usize,
    pub dilate_w: usize,
}

impl ConvShape {
    pub fn src_len(&self) -> usize {
        self.mb * self.ih * self.iw * self.ngroups * self.ic
    }

    pub fn weights_len(&self) -> usize {
        self.ngroups * self.oc * self.ic * self.kh * self.kw
    }

    pub fn dst_len(&self) -> usize {
        self.mb * self.oh * self.ow * self.ngroups * self.oc
    }
}

/// Fused operation applied after bias and output scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostOp {
    /// `y += scale * previous_dst`
    Sum { scale: f32 },
    /// `y = scale * act(y)`
    Eltwise { act: Activation, scale: f32 },
}

/// Reference forward convolution.
///
/// `dst` is read before being written when a `Sum` post-op is present.
/// `scales` holds either one common value or one value per output
/// channel (`ngroups * oc`).
#[allow(clippy::too_many_arguments)]
#[inline(never)]
pub fn conv_forward(
    shape: &ConvShape,
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    scales: &[f32],
    post_ops: &[PostOp],
    rounding: Rounding,
    store: StoreType,
    dst: &mut [f32],
) {
    let s = shape;
    let src_c = s.ngroups * s.ic;
    let dst_c = s.ngroups * s.oc;
    assert!(src.len() >= s.src_len(), "src too small");
    assert!(weights.len() >= s.weights_len(), "weights too small");
    assert!(dst.len() >= s.dst_len(), "dst too small");
    assert!(!scales.is_empty(), "scales must not be empty");

    for n in 0..s.mb {
        for oh in 0..s.oh {
            for ow in 0..s.ow {
                for g in 0..s.ngroups {
                    for oc in 0..s.oc {
                        let mut acc = 0.0_f64;
                        for kh in 0..s.kh {
                            let ih = (oh * s.stride_h + kh * (s.dilate_h + 1)) as isize
                                - s.t_pad as isize;
                            if ih < 0 || ih >= s.ih as isize {
                                continue;
                            }
                            for kw in 0..s.kw {
                                let iw = (ow * s.stride_w + kw * (s.dilate_w + 1)) as isize
                                    - s.l_pad as isize;
                                if iw < 0 || iw >= s.iw as isize {
                                    continue;
                                }
                                let src_base = ((n * s.ih + ih as usize) * s.iw + iw as usize)
                                    * src_c
                                    + g * s.ic;
                                for ic in 0..s.ic {
                                    let w = weights
                                        [(((g * s.oc + oc) * s.ic + ic) * s.kh + kh) * s.kw + kw];
                                    acc += src[src_base + ic] as f64 * w as f64;
                                }
                            }
                        }

                        let ch = g * s.oc + oc;
                        let mut v = acc as f32;
                        if let Some(b) = bias {
                            v += b[ch];
                        }
                        v *= if scales.len() == 1 { scales[0] } else { scales[ch] };

                        let di = ((n * s.oh + oh) * s.ow + ow) * dst_c + ch;
                        let prev = dst[di];
                        for op in post_ops {
                            v = match *op {
                                PostOp::Sum { scale } if scale == 1.0 => v + prev,
                                PostOp::Sum { scale } => prev.mul_add(scale, v),
                                PostOp::Eltwise { act, scale } if scale == 1.0 => act.apply(v),
                                PostOp::Eltwise { act, scale } => act.apply(v) * scale,
                            };
                        }
                        dst[di] = saturate(v, store, rounding);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_1x1(ic: usize, oc: usize) -> ConvShape {
        ConvShape {
            mb: 1, ngroups: 1, ic, oc,
            ih: 1, iw: 1, oh: 1, ow: 1, kh: 1, kw: 1,
            stride_h: 1, stride_w: 1, t_pad: 0, l_pad: 0,
            dilate_h: 0, dilate_w: 0,
        }
    }

    #[test]
    fn test_pointwise_dot() {
        let shape = shape_1x1(3, 2);
        let src = [1.0, 2.0, 3.0];
        let wei = [1.0, 1.0, 1.0, 0.5, -1.0, 2.0];
        let mut dst = [0.0; 2];
        conv_forward(&shape, &src, &wei, None, &[1.0], &[], Rounding::Nearest, StoreType::F32, &mut dst);
        assert_eq!(dst, [6.0, 4.5]);
    }

    #[test]
    fn test_padding_skips_taps() {
        // 1x3 input, 1x3 kernel, pad 1: edge outputs see two taps.
        let shape = ConvShape {
            mb: 1, ngroups: 1, ic: 1, oc: 1,
            ih: 1, iw: 3, oh: 1, ow: 3, kh: 1, kw: 3,
            stride_h: 1, stride_w: 1, t_pad: 0, l_pad: 1,
            dilate_h: 0, dilate_w: 0,
        };
        let mut dst = [0.0; 3];
        conv_forward(&shape, &[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], None, &[1.0], &[],
            Rounding::Nearest, StoreType::F32, &mut dst);
        assert_eq!(dst, [3.0, 6.0, 5.0]);
    }

    #[test]
    fn test_post_op_order_matters() {
        let shape = shape_1x1(1, 1);
        let relu = PostOp::Eltwise { act: Activation::Relu { alpha: 0.0 }, scale: 1.0 };
        let sum = PostOp::Sum { scale: 1.0 };

        let mut relu_first = [3.0];
        conv_forward(&shape, &[-5.0], &[1.0], None, &[1.0], &[relu, sum],
            Rounding::Nearest, StoreType::U8, &mut relu_first);
        assert_eq!(relu_first, [3.0]);

        let mut sum_first = [3.0];
        conv_forward(&shape, &[-5.0], &[1.0], None, &[1.0], &[sum, relu],
            Rounding::Nearest, StoreType::U8, &mut sum_first);
        assert_eq!(sum_first, [0.0]);
    }

    #[test]
    fn test_per_channel_scales_and_bias() {
        let shape = shape_1x1(1, 2);
        let mut dst = [0.0; 2];
        conv_forward(&shape, &[2.0], &[1.0, 3.0], Some(&[1.0, -1.0]), &[0.5, 2.0], &[],
            Rounding::Nearest, StoreType::F32, &mut dst);
        assert_eq!(dst, [1.5, 10.0]);
    }
}
