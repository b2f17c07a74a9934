//! Error types for the protocol layer.
//!
//! These are all *validation* errors: the value was malformed before it
//! ever reached the store. Each crate in Tapstake keeps its own error enum
//! so the failing layer is obvious from the type alone.

/// Errors raised while constructing protocol values from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The amount can't be represented as Stars (too many decimal
    /// places, or not a number at all).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The access key is not 6 characters from `[A-Z0-9]`.
    #[error("invalid access key: {0:?}")]
    InvalidAccessKey(String),

    /// A stored or supplied name that maps to no variant.
    #[error("unknown {what}: {value:?}")]
    UnknownName { what: &'static str, value: String },

    /// Stars arithmetic left the representable range.
    #[error("amount overflow: {0}")]
    Overflow(String),
}
