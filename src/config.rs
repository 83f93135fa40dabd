//! Trie-wide tuning knobs.
//!
//! The reference implementation hard-codes these as compile-time constants
//! (`MIN_USAGE`, `MAX_GARBAGE`) and a build-time choice of `PAGE_SIZE`.
//! `PAGE_SIZE` stays a constant here too (`crate::node::PAGE_SIZE`), since
//! it's baked into [`crate::node::QpRef`]'s bit width, but the collector's
//! trigger thresholds and the name comparator's case sensitivity are
//! exposed per-trie so an embedder can tune them without a rebuild.

use crate::node::PAGE_SIZE;

/// A page is a compaction candidate once its live usage drops below this
/// fraction of `PAGE_SIZE`. The reference implementation uses
/// `PAGE_SIZE - PAGE_SIZE / 16`, i.e. a page is "thin" once more than
/// 1/16th of it is garbage.
pub const MIN_USAGE: u32 = PAGE_SIZE as u32 - PAGE_SIZE as u32 / 16;

/// Default garbage threshold (in bytes) past which a mutating operation
/// triggers an implicit [`crate::trie::Trie::compact`]. The reference
/// implementation tunes this in nodes (it suggests `2^20`); here it's
/// bytes, scaled by the 12-byte node so the same number of dead nodes
/// trips the same trigger.
pub const DEFAULT_MAX_GARBAGE: usize = (1 << 20) * crate::node::NODE_SIZE;

/// Per-trie tuning knobs, passed to [`crate::trie::Trie::with_config`].
#[derive(Clone, Debug)]
pub struct TrieConfig {
    /// Fold `A-Z` onto their lowercase shift when encoding keys. Must
    /// agree with the embedder's [`crate::value::DomainName::name_eq`] —
    /// DNS names compare case-insensitively by convention, so this
    /// defaults to `true`.
    pub case_fold: bool,

    /// Run [`crate::trie::Trie::compact`] automatically once the
    /// outstanding garbage byte count exceeds this threshold. `None`
    /// disables the automatic trigger; the embedder is then responsible
    /// for calling `compact` itself.
    pub max_garbage: Option<usize>,

    /// Hard cap on the number of arena pages. `None` (the default) lets
    /// the trie grow until the process runs out of memory, matching the
    /// reference allocator's "abort on exhaustion" posture but leaving the
    /// abort itself to the embedder (`alloc_bytes` returns
    /// [`crate::error::QpError::ArenaExhausted`] instead of aborting).
    pub max_pages: Option<usize>,
}

impl Default for TrieConfig {
    fn default() -> TrieConfig {
        TrieConfig {
            case_fold: true,
            max_garbage: Some(DEFAULT_MAX_GARBAGE),
            max_pages: None,
        }
    }
}
