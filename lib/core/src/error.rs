//! Error handling foundation for adpulse.
//!
//! Only the `Result` alias lives here. Each crate owns its error enum in its
//! own `error` module and returns `rootcause::Report<E>`.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
