//! Rounding and saturating conversion to the destination element type.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Round half to even.
    Nearest,
    /// Round toward negative infinity.
    Down,
}

/// Destination element type of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    F32,
    S32,
    S8,
    U8,
}

impl StoreType {
    /// Representable range in the `f32` domain, or `None` for `F32`.
    ///
    /// The `S32` upper bound is the largest `f32` below `2^31`.
    pub fn bounds(self) -> Option<(f32, f32)> {
        match self {
            StoreType::F32 => None,
            StoreType::S32 => Some((-2_147_483_648.0, 2_147_483_520.0)),
            StoreType::S8 => Some((-128.0, 127.0)),
            StoreType::U8 => Some((0.0, 255.0)),
        }
    }
}

/// Convert a post-op result to the value the destination will hold.
///
/// Integer destinations clamp first, then round, matching the generated
/// store sequence. NaN saturates to the lower bound.
#[inline(never)]
pub fn saturate(x: f32, store: StoreType, rounding: Rounding) -> f32 {
    let Some((lo, hi)) = store.bounds() else {
        return x;
    };
    let clamped = if x.is_nan() { lo } else { x.max(lo).min(hi) };
    match rounding {
        Rounding::Nearest => clamped.round_ties_even(),
        Rounding::Down => clamped.floor(),
    }
}
