//! Error types surfaced across the crate's public API.

use thiserror::Error;

/// Failures a caller can recover from.
///
/// Conditions the reference implementation treats as programmer error —
/// inserting a name that is already present, or opening a second
/// copy-on-write transaction while one is still open — are asserted against
/// instead of represented here; see `DESIGN.md`.
#[derive(Debug, Error)]
pub enum QpError {
    /// The page arena could not grow any further. The reference
    /// implementation treats this as fatal (`abort()`); this crate instead
    /// returns it so an embedder can decide, but callers who have no
    /// recovery strategy of their own should treat it as fatal too.
    #[error("page arena exhausted: could not allocate {requested} bytes")]
    ArenaExhausted { requested: usize },
}
