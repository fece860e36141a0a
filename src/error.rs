//! Error Types
//!
//! Configuration is the only validated failure surface of this crate. Size
//! mismatches between buffers are programming errors and panic via
//! precondition assertions instead of returning an error.

use thiserror::Error;

/// Errors raised when constructing a dropout transform
#[derive(Debug, Error)]
pub enum DropoutError {
    /// The drop ratio must lie strictly between 0 and 1. A ratio of exactly
    /// 0 (nothing dropped) or 1 (everything dropped) is a degenerate layer
    /// and is rejected rather than silently tolerated.
    #[error("drop ratio must lie strictly between 0 and 1, got {0}")]
    InvalidConfiguration(f64),
}
