//! Scalar elementwise activations used by the post-op stage.

/// Activation function applied by an elementwise post-op.
///
/// Parameter meaning follows the usual primitive-library conventions:
/// `alpha` is the negative slope for `Relu`, the upper bound for
/// `BoundedRelu` and the lower bound for `Clip`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Relu { alpha: f32 },
    Linear { alpha: f32, beta: f32 },
    BoundedRelu { alpha: f32 },
    Clip { alpha: f32, beta: f32 },
    Abs,
    Square,
    Sqrt,
}

impl Activation {
    #[inline(never)]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu { alpha } => relu(x, alpha),
            Activation::Linear { alpha, beta } => alpha.mul_add(x, beta),
            Activation::BoundedRelu { alpha } => bounded_relu(x, alpha),
            Activation::Clip { alpha, beta } => clip(x, alpha, beta),
            Activation::Abs => x.abs(),
            Activation::Square => x * x,
            Activation::Sqrt => x.sqrt(),
        }
    }
}

/// Leaky ReLU: `x` for positive inputs, `alpha * x` otherwise.
#[inline(never)]
pub fn relu(x: f32, alpha: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        alpha * x
    }
}

#[inline(never)]
pub fn bounded_relu(x: f32, alpha: f32) -> f32 {
    x.max(0.0).min(alpha)
}

#[inline(never)]
pub fn clip(x: f32, lo: f32, hi: f32) -> f32 {
    x.max(lo).min(hi)
}
