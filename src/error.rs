//! Error taxonomy for kernel planning, generation and execution.
//!
//! `Unimplemented` is a capability gap, not a defect: callers fall back to
//! the scalar reference path. Planner/emitter disagreements are invariant
//! violations and panic instead of surfacing here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvError {
    #[error("unimplemented configuration: {0}")]
    Unimplemented(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error("executable memory: {0}")]
    Executable(String),
}

pub type ConvResult<T> = Result<T, ConvError>;

impl ConvError {
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ConvError::Unimplemented(_))
    }
}

impl From<iced_x86::IcedError> for ConvError {
    fn from(err: iced_x86::IcedError) -> Self {
        ConvError::Codegen(err.to_string())
    }
}

/// Bail out of the current function with `ConvError::Unimplemented`.
macro_rules! unimplemented_conf {
    ($($arg:tt)*) => {
        return Err($crate::error::ConvError::Unimplemented(format!($($arg)*)))
    };
}
pub(crate) use unimplemented_conf;
