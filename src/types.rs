//! Convolution descriptor types: element types, memory formats and the
//! caller-facing problem description.

use crate::error::{ConvError, ConvResult};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    S8,
    U8,
    S32,
    F32,
}

impl DataType {
    #[inline]
    pub const fn size_bytes(self) -> usize {
        match self {
            DataType::S8 | DataType::U8 => 1,
            DataType::S32 | DataType::F32 => 4,
        }
    }

    #[inline]
    pub const fn is_int8(self) -> bool {
        matches!(self, DataType::S8 | DataType::U8)
    }
}

/// Physical layout of a tensor.
///
/// Blocked weight layouts are zero-padded up to their channel blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    /// Let the planner choose.
    Any,
    /// `[n][w][c]`
    Nwc,
    /// `[n][h][w][c]`
    Nhwc,
    /// Plain weights `[g][oc][ic][kh][kw]`.
    Goihw,
    /// Regular convolution weights
    /// `[g][oc/ob][ic/ib][kh][kw][ib][ob]`.
    OIhwBlocked { ic_block: usize, oc_block: usize },
    /// Depthwise weights `[g/cb][kh][kw][cb]`.
    DepthwiseBlocked { ch_block: usize },
    /// Plain 1-D tensor (bias).
    X,
}

/// Caller-facing convolution problem.
///
/// Channel counts are per group. Dilations are zero-based (0 means dense).
/// 1-D convolutions have `ndims == 3` and `ih = oh = kh = 1`; 3-D ones
/// (`ndims == 5`) carry a non-zero depth.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvDesc {
    pub ndims: usize,
    pub mb: usize,
    pub ngroups: usize,
    /// Weights carry an explicit group dimension.
    pub with_groups: bool,
    pub ic: usize,
    pub oc: usize,
    pub id: usize,
    pub ih: usize,
    pub iw: usize,
    pub od: usize,
    pub oh: usize,
    pub ow: usize,
    pub kd: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilate_h: usize,
    pub dilate_w: usize,
    pub t_pad: usize,
    pub b_pad: usize,
    pub l_pad: usize,
    pub r_pad: usize,
    pub src_dt: DataType,
    pub wei_dt: DataType,
    pub dst_dt: DataType,
    pub bias_dt: Option<DataType>,
    pub src_fmt: MemoryFormat,
    pub wei_fmt: MemoryFormat,
    pub dst_fmt: MemoryFormat,
    pub bias_fmt: MemoryFormat,
}

impl ConvDesc {
    /// 2-D convolution, stride 1, no padding, f32 everywhere, no bias.
    pub fn conv2d(
        mb: usize,
        ngroups: usize,
        ic: usize,
        oc: usize,
        (ih, iw): (usize, usize),
        (kh, kw): (usize, usize),
    ) -> Self {
        let mut d = ConvDesc {
            ndims: 4,
            mb,
            ngroups,
            with_groups: ngroups > 1,
            ic,
            oc,
            id: 0,
            ih,
            iw,
            od: 0,
            oh: 0,
            ow: 0,
            kd: 0,
            kh,
            kw,
            stride_h: 1,
            stride_w: 1,
            dilate_h: 0,
            dilate_w: 0,
            t_pad: 0,
            b_pad: 0,
            l_pad: 0,
            r_pad: 0,
            src_dt: DataType::F32,
            wei_dt: DataType::F32,
            dst_dt: DataType::F32,
            bias_dt: None,
            src_fmt: MemoryFormat::Any,
            wei_fmt: MemoryFormat::Any,
            dst_fmt: MemoryFormat::Any,
            bias_fmt: MemoryFormat::Any,
        };
        d.recompute_output();
        d
    }

    /// 1-D convolution over `iw` with kernel width `kw`.
    pub fn conv1d(mb: usize, ngroups: usize, ic: usize, oc: usize, iw: usize, kw: usize) -> Self {
        let mut d = Self::conv2d(mb, ngroups, ic, oc, (1, iw), (1, kw));
        d.ndims = 3;
        d
    }

    /// Depthwise 2-D convolution: one input and one output channel per group.
    pub fn depthwise2d(mb: usize, channels: usize, spatial: (usize, usize), kernel: (usize, usize)) -> Self {
        let mut d = Self::conv2d(mb, channels, 1, 1, spatial, kernel);
        d.with_groups = true;
        d
    }

    pub fn with_strides(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self.recompute_output();
        self
    }

    /// Padding as (top, left, bottom, right).
    pub fn with_padding(mut self, t: usize, l: usize, b: usize, r: usize) -> Self {
        self.t_pad = t;
        self.l_pad = l;
        self.b_pad = b;
        self.r_pad = r;
        self.recompute_output();
        self
    }

    pub fn with_dilation(mut self, dilate_h: usize, dilate_w: usize) -> Self {
        self.dilate_h = dilate_h;
        self.dilate_w = dilate_w;
        self.recompute_output();
        self
    }

    pub fn with_data_types(mut self, src: DataType, wei: DataType, dst: DataType) -> Self {
        self.src_dt = src;
        self.wei_dt = wei;
        self.dst_dt = dst;
        self
    }

    pub fn with_bias(mut self, dt: DataType) -> Self {
        self.bias_dt = Some(dt);
        self
    }

    pub fn with_groups(mut self, with_groups: bool) -> Self {
        self.with_groups = with_groups;
        self
    }

    /// Turn the descriptor into a 3-D one with the given depth extents.
    pub fn with_depth(mut self, id: usize, kd: usize) -> Self {
        self.ndims = 5;
        self.id = id;
        self.kd = kd;
        self.od = id.saturating_sub(kd) + 1;
        self
    }

    pub fn is_1d(&self) -> bool {
        self.ndims == 3
    }

    pub fn is_depthwise(&self) -> bool {
        self.with_groups && self.ic == 1 && self.oc == 1
    }

    fn recompute_output(&mut self) {
        self.oh = out_extent(self.ih, self.kh, self.stride_h, self.dilate_h, self.t_pad, self.b_pad);
        self.ow = out_extent(self.iw, self.kw, self.stride_w, self.dilate_w, self.l_pad, self.r_pad);
    }

    /// Reject shapes no convolution can have.
    pub fn check_consistency(&self) -> ConvResult<()> {
        let dims = [
            self.mb, self.ngroups, self.ic, self.oc, self.ih, self.iw, self.oh, self.ow, self.kh, self.kw,
            self.stride_h, self.stride_w,
        ];
        if dims.iter().any(|&d| d == 0) {
            return Err(ConvError::InvalidArguments(format!("zero-sized dimension in {self:?}")));
        }
        if !matches!(self.ndims, 3 | 4 | 5) {
            return Err(ConvError::InvalidArguments(format!("ndims {} not in 3..=5", self.ndims)));
        }
        if self.ngroups > 1 && !self.with_groups {
            return Err(ConvError::InvalidArguments("ngroups > 1 requires grouped weights".into()));
        }
        let oh = out_extent(self.ih, self.kh, self.stride_h, self.dilate_h, self.t_pad, self.b_pad);
        let ow = out_extent(self.iw, self.kw, self.stride_w, self.dilate_w, self.l_pad, self.r_pad);
        if oh != self.oh || ow != self.ow {
            return Err(ConvError::InvalidArguments(format!(
                "output {}x{} inconsistent with input/kernel/padding (expected {oh}x{ow})",
                self.oh, self.ow
            )));
        }
        Ok(())
    }
}

/// Output extent along one axis, 0 when the kernel does not fit.
pub fn out_extent(i: usize, k: usize, stride: usize, dilate: usize, pad_lo: usize, pad_hi: usize) -> usize {
    let span = (k.max(1) - 1) * (dilate + 1) + 1;
    let padded = i + pad_lo + pad_hi;
    if stride == 0 || padded < span {
        return 0;
    }
    (padded - span) / stride + 1
}
