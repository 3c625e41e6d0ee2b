//! Post-op interpreter.
//!
//! The emitter knows exactly five fusion patterns: nothing, one eltwise,
//! one sum, sum then eltwise, eltwise then sum. Anything else is rejected
//! here so generation never starts for it.

use crate::attr::{Eltwise, PostOpEntry, PostOpKind, PostOps};

/// Whitelist check over the post-ops list.
pub fn post_ops_ok(p: &PostOps) -> bool {
    let is_eltwise = |idx: usize| p.contain(PostOpKind::Eltwise, idx);
    let is_sum = |idx: usize| p.contain(PostOpKind::Sum, idx);
    match p.len() {
        0 => true,
        1 => is_eltwise(0) || is_sum(0),
        2 => (is_sum(0) && is_eltwise(1)) || (is_sum(1) && is_eltwise(0)),
        _ => false,
    }
}

/// The accepted post-op chain, split by position relative to the sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusedPostOps {
    pub eltwise_pre_sum: Option<Eltwise>,
    pub sum_scale: Option<f32>,
    pub eltwise_post_sum: Option<Eltwise>,
}

impl FusedPostOps {
    /// Extract the fused chain, or `None` when the list is not whitelisted.
    pub fn extract(p: &PostOps) -> Option<Self> {
        if !post_ops_ok(p) {
            return None;
        }
        let mut fused = FusedPostOps::default();
        for entry in p.entries() {
            match *entry {
                PostOpEntry::Sum { scale } => fused.sum_scale = Some(scale),
                PostOpEntry::Eltwise(e) if fused.sum_scale.is_some() => fused.eltwise_post_sum = Some(e),
                PostOpEntry::Eltwise(e) => fused.eltwise_pre_sum = Some(e),
            }
        }
        Some(fused)
    }

    pub fn with_sum(&self) -> bool {
        self.sum_scale.is_some()
    }

    pub fn with_eltwise(&self) -> bool {
        self.eltwise_pre_sum.is_some() || self.eltwise_post_sum.is_some()
    }
}
