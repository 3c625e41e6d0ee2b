//! Convolution kernel compiler: planning, code generation and installation.
//!
//! # Pipeline
//!
//! ```text
//! ConvDesc + PrimitiveAttr → planner → ConvConf → codegen → ConvKernel
//!                               ↑                    ↑
//!                           dispatch/            codegen/
//!                           device_profile.rs    conv.rs
//! ```

pub mod call_args;
pub mod codegen;
pub mod conf;
pub mod executable;
pub mod planner;
pub mod post_ops;
pub mod scratchpad;

pub use call_args::ConvCallArgs;
pub use conf::{ConvConf, LoopOrder};
pub use executable::{ConvKernel, ConvKernelFn};
pub use planner::{plan, plan_for_isa, plan_for_profile};
pub use post_ops::{post_ops_ok, FusedPostOps};
pub use scratchpad::{init_scratchpad, Grantor, Registrar, ScratchpadKey};
