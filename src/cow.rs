//! Copy-on-write transactions: build a new trie version while readers keep
//! using the old one.
//!
//! ```text
//! IDLE --(cow_start)--> OPEN --(cow_finish)--> IDLE
//! ```
//!
//! [`cow_start`] clones the page table (sharing backing bytes via `Arc`,
//! duplicating only the per-trie `used`/`keep`/`free` counters) and opens
//! a fresh page for new writes, so the returned [`Trie`] can mutate freely
//! without a single byte landing on memory the original trie still reads.
//! [`CowTransaction::finish`] clears the pinning, compacts with a deferred
//! release list, and hands back the finished trie plus the pages that fell
//! out of it.
//!
//! This crate does not publish the finished trie for you — the reference
//! implementation leaves that to the embedder too ("Copy-on-write without
//! a runtime", spec §9), since the right publication mechanism (an
//! `AtomicPtr`, an `arc-swap`, a lock-protected `Box`) depends on how the
//! embedder's readers are structured. Whatever mechanism is chosen must
//! publish with release ordering and readers must load with acquire
//! ordering, so that a reader observing the new trie also observes every
//! write [`CowTransaction`] made to build it.

use std::sync::Arc;

use crate::error::QpError;
use crate::gc;
use crate::page::PageData;
use crate::trie::Trie;
use crate::value::{DomainName, TrieValue};

/// An in-progress copy-on-write transaction: a new trie version, built
/// from a snapshot of `origin`, not yet published.
pub struct CowTransaction<'v, N, V> {
    trie: Trie<'v, N, V>,
}

/// Starts a transaction from `origin`. Asserts `origin` has not already
/// had a transaction started against it — nested COW is a contract
/// violation the reference implementation detects the same way (spec §4.6).
pub fn cow_start<'v, N, V>(origin: &Trie<'v, N, V>) -> CowTransaction<'v, N, V>
where
    N: DomainName,
    V: TrieValue<N>,
{
    assert!(
        !origin.cow_open.get(),
        "cow_start: a copy-on-write transaction is already open on this trie"
    );
    origin.cow_open.set(true);
    log::debug!("cow_start: snapshotting {} leaf(ves)", origin.count());

    let mut arena = origin.arena().clone_for_cow();
    arena.allocation_reset();

    let mut trie = Trie::with_config(origin.config_clone());
    trie.arena = arena;
    trie.set_root(origin.root());
    *trie_leaf_count_mut(&mut trie) = origin.count();

    CowTransaction { trie }
}

// `Trie::leaf_count` has no public setter (only `add`/`del` touch it); COW
// is the one place outside those two operations that needs to seed it
// from a snapshot, so it goes through a crate-private back door instead of
// widening the public API.
fn trie_leaf_count_mut<'v, N, V>(trie: &mut Trie<'v, N, V>) -> &mut usize {
    trie.leaf_count_mut()
}

impl<'v, N, V> CowTransaction<'v, N, V>
where
    N: DomainName,
    V: TrieValue<N>,
{
    /// The in-progress trie. `add`/`del`/`get`/`find_le`/`foreach` on it
    /// observe and extend the snapshot; none of them can corrupt the
    /// origin trie's view, since any branch they'd otherwise write through
    /// gets evacuated into a fresh page first (see
    /// [`crate::trie::Trie::add`]'s use of `evacuate_if_kept`).
    pub fn trie(&self) -> &Trie<'v, N, V> {
        &self.trie
    }

    pub fn trie_mut(&mut self) -> &mut Trie<'v, N, V> {
        &mut self.trie
    }

    /// Clears the pinning that kept this transaction's pages immutable,
    /// compacts with a deferred release list, and returns the finished
    /// trie along with the backing of every page that turned out to be
    /// completely dead. The caller may drop that list immediately, or
    /// hold onto it until every reader of the *origin* trie has released
    /// its reference — whichever the embedder's locking discipline needs.
    pub fn finish(mut self) -> Result<(Trie<'v, N, V>, Vec<Arc<PageData>>), QpError> {
        let len = self.trie.arena_mut().table().len();
        for i in 0..len {
            self.trie.arena_mut().table_mut().page_mut(i).keep = 0;
        }

        // Credit back every twig vector a write during this transaction
        // relocated out of a page that was pinned at the time (`keep`
        // just cleared above, so `retire_twig_array` can touch it now).
        // Without this, those bytes stay counted as live forever: the
        // page they came from never becomes reclaimable and `compact`
        // below can't see a move that already happened earlier in the
        // transaction.
        for (twigs, count) in self.trie.take_pending_cow_retire() {
            self.trie.arena_mut().retire_twig_array(twigs, count);
            self.trie.add_garbage(count * crate::node::NODE_SIZE);
        }

        let mut deferred = Vec::new();
        gc::compact_deferred(&mut self.trie, &mut deferred)?;
        log::debug!(
            "cow_finish: {} leaf(ves), {} page(s) deferred for release",
            self.trie.count(),
            deferred.len()
        );

        Ok((self.trie, deferred))
    }
}
