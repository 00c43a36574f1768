//! Internal error type for fallible operations below the command layer.
//!
//! Command handlers never hand this type back to a client directly — every
//! handler returns a [`crate::engine::Reply`], whose three variants (`Ok`,
//! `NotFound`, `IoError`) are the only categories the wire protocol knows
//! about. `StoreError` exists for the layers underneath (snapshot I/O,
//! numeric parsing) that need a real `Result` to carry a cause up to the
//! point where it gets folded into a reply.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Parameter error")]
    ParameterError,

    #[error("value is not a number")]
    NotANumber,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
