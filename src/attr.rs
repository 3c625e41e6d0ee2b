//! Primitive attributes: rounding mode, output scales and the post-ops list.
//!
//! Kernels only read these; they are owned by the caller.

use crate::error::{ConvError, ConvResult};

/// Maximum number of post-op entries.
pub const MAX_POST_OPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundMode {
    /// Round half to even.
    #[default]
    Nearest,
    /// Round toward negative infinity.
    Down,
}

/// Output scale table. `mask == 0` means a single common scale,
/// `mask == 1 << 1` one scale per output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputScales {
    pub mask: u32,
    pub scales: Vec<f32>,
}

impl OutputScales {
    pub fn common(scale: f32) -> Self {
        OutputScales { mask: 0, scales: vec![scale] }
    }

    pub fn per_oc(scales: Vec<f32>) -> Self {
        OutputScales { mask: 1 << 1, scales }
    }

    pub fn is_per_oc(&self) -> bool {
        self.mask == 1 << 1
    }
}

impl Default for OutputScales {
    fn default() -> Self {
        Self::common(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EltwiseAlg {
    /// `x > 0 ? x : alpha * x`
    Relu,
    /// `alpha * x + beta`
    Linear,
    /// `min(max(x, 0), alpha)`
    BoundedRelu,
    /// `min(max(x, alpha), beta)`
    Clip,
    Abs,
    Square,
    Sqrt,
}

/// Elementwise activation entry: `y = scale * alg(x; alpha, beta)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eltwise {
    pub alg: EltwiseAlg,
    pub scale: f32,
    pub alpha: f32,
    pub beta: f32,
}

impl Eltwise {
    pub fn new(alg: EltwiseAlg, alpha: f32, beta: f32) -> Self {
        Eltwise { alg, scale: 1.0, alpha, beta }
    }

    pub fn relu() -> Self {
        Self::new(EltwiseAlg::Relu, 0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOpKind {
    Sum,
    Eltwise,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostOpEntry {
    /// Residual accumulate: `y += scale * dst_prev`.
    Sum { scale: f32 },
    Eltwise(Eltwise),
}

impl PostOpEntry {
    pub fn kind(&self) -> PostOpKind {
        match self {
            PostOpEntry::Sum { .. } => PostOpKind::Sum,
            PostOpEntry::Eltwise(_) => PostOpKind::Eltwise,
        }
    }

    pub fn is_eltwise(&self) -> bool {
        self.kind() == PostOpKind::Eltwise
    }
}

/// Ordered, fixed-capacity post-op list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostOps {
    entries: Vec<PostOpEntry>,
}

impl PostOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PostOpEntry] {
        &self.entries
    }

    pub fn append_sum(&mut self, scale: f32) -> ConvResult<()> {
        self.push(PostOpEntry::Sum { scale })
    }

    pub fn append_eltwise(&mut self, eltwise: Eltwise) -> ConvResult<()> {
        self.push(PostOpEntry::Eltwise(eltwise))
    }

    fn push(&mut self, entry: PostOpEntry) -> ConvResult<()> {
        if self.entries.len() == MAX_POST_OPS {
            return Err(ConvError::InvalidArguments(format!(
                "post-ops list is full ({MAX_POST_OPS} entries)"
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Index of the first entry of `kind` in `[start, stop)`; `stop` is
    /// clamped to the list length.
    pub fn find(&self, kind: PostOpKind, start: usize, stop: Option<usize>) -> Option<usize> {
        let stop = stop.unwrap_or(self.len()).min(self.len());
        (start..stop).find(|&i| self.entries[i].kind() == kind)
    }

    /// Whether the entry at `index` exists and is of `kind`.
    pub fn contain(&self, kind: PostOpKind, index: usize) -> bool {
        self.entries.get(index).map_or(false, |e| e.kind() == kind)
    }
}

/// Attribute bundle handed to the kernel generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveAttr {
    pub round_mode: RoundMode,
    pub output_scales: OutputScales,
    pub post_ops: PostOps,
}

impl PrimitiveAttr {
    pub fn with_round_mode(mut self, mode: RoundMode) -> Self {
        self.round_mode = mode;
        self
    }

    pub fn with_output_scales(mut self, scales: OutputScales) -> Self {
        self.output_scales = scales;
        self
    }

    pub fn with_post_ops(mut self, post_ops: PostOps) -> Self {
        self.post_ops = post_ops;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_enforced() {
        let mut p = PostOps::new();
        for _ in 0..MAX_POST_OPS {
            p.append_sum(1.0).unwrap();
        }
        assert!(matches!(p.append_eltwise(Eltwise::relu()), Err(ConvError::InvalidArguments(_))));
        assert_eq!(p.len(), MAX_POST_OPS);
    }

    #[test]
    fn test_find_and_contain() {
        let mut p = PostOps::new();
        p.append_eltwise(Eltwise::relu()).unwrap();
        p.append_sum(0.5).unwrap();
        assert_eq!(p.find(PostOpKind::Sum, 0, None), Some(1));
        assert_eq!(p.find(PostOpKind::Sum, 0, Some(1)), None);
        assert_eq!(p.find(PostOpKind::Eltwise, 1, None), None);
        assert!(p.contain(PostOpKind::Eltwise, 0));
        assert!(!p.contain(PostOpKind::Eltwise, 1));
        assert!(!p.contain(PostOpKind::Sum, 7));
    }

    #[test]
    fn test_scales_mask() {
        assert!(!OutputScales::common(2.0).is_per_oc());
        assert!(OutputScales::per_oc(vec![1.0, 2.0]).is_per_oc());
        assert_eq!(PrimitiveAttr::default().round_mode, RoundMode::Nearest);
    }
}
