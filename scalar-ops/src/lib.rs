//! Scalar convolution reference implementations.
//!
//! These serve as:
//! 1. Golden reference for correctness testing of generated kernels.
//! 2. The generic fallback path taken when a configuration has no JIT kernel.
//!
//! Everything here is written as plain nested loops over `f32` values, with
//! quantized tensors widened to `f32` by the caller. Accumulation is done in
//! `f64` so integer convolutions stay exact for realistic reduction sizes.

pub mod activations;
pub mod conv;
pub mod quant;

pub use activations::Activation;
pub use conv::{conv_forward, ConvShape, PostOp};
pub use quant::{saturate, Rounding, StoreType};
