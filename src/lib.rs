//! conv-jit-kernels: JIT-generated direct convolution kernels for x86-64.
//!
//! A convolution problem is planned once into a `ConvConf` (blocking, unroll
//! width, thread partition), turned into AVX2 or AVX-512 machine code with
//! bias, output scaling, post-ops and saturating stores fused into the
//! output stage, and then run over channels-last tensors.
//!
//! # Quick Start
//!
//! ```ignore
//! use conv_jit_kernels::{ConvDesc, ConvForward, PrimitiveAttr, reorder_weights};
//!
//! let desc = ConvDesc::depthwise2d(1, 16, (8, 8), (3, 3));
//! let fwd = ConvForward::new(&desc, &PrimitiveAttr::default(), 4)?;
//! let blocked = reorder_weights(fwd.conf(), plain_weights)?;
//! fwd.execute(src, &blocked, None, dst)?;
//! ```
//!
//! Configurations without a generated kernel fail with
//! `ConvError::Unimplemented`; `forward_or_fallback` then runs the scalar
//! reference from `conv-scalar-ops` instead.

pub mod attr;
pub mod compiler;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod reference;
pub mod types;

pub use attr::{Eltwise, EltwiseAlg, OutputScales, PostOpEntry, PostOpKind, PostOps, PrimitiveAttr, RoundMode};
pub use compiler::{
    plan, plan_for_isa, post_ops_ok, ConvCallArgs, ConvConf, ConvKernel, ConvKernelFn, LoopOrder,
};
pub use dispatch::{device_profile, DeviceProfile, IsaLevel};
pub use driver::{balance211, forward_or_fallback, reorder_weights, ConvForward};
pub use error::{ConvError, ConvResult};
pub use reference::reference_forward;
pub use types::{ConvDesc, DataType, MemoryFormat};
