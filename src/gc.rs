//! The copying compactor and empty-page reclaimer.
//!
//! Two phases, always run back to back by [`crate::trie::Trie::compact`]:
//! **compact** walks the trie post-order, rebuilding any branch whose
//! children moved or whose page has fallen below [`MIN_USAGE`] into a
//! fresh twig vector; **reclaim** then scans the page table for pages
//! every byte of which turned out to be garbage and hands them back.
//!
//! The reference implementation makes the "did this vector change"
//! decision by copying the live twig-vector onto the stack, recursing into
//! children (which may evacuate themselves and overwrite the *source*
//! vector in place), and then comparing the stack copy against whatever
//! the source vector looks like afterwards. This crate's [`compact_node`]
//! gets the same answer more simply by working on owned return values
//! instead of aliased in-place writes: a child's evacuation is visible to
//! its parent as "the `Node` I hold for this twig differs from what's
//! still in the source vector", with no unsafe aliasing required. See
//! `DESIGN.md` for why this substitution preserves the documented
//! decision criteria.

use std::time::{Duration, Instant};

use crate::config::MIN_USAGE;
use crate::error::QpError;
use crate::node::{Node, MAX_TWIGS};
use crate::page::PageData;
use crate::trie::Trie;
use crate::value::{DomainName, TrieValue};
use std::sync::Arc;

/// Running mean/variance (Welford's algorithm) over every compaction pass
/// a trie has run, so an embedder can watch for pathological GC behavior
/// without keeping a full history.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    runs: u64,
    mean_duration_secs: f64,
    m2_duration_secs: f64,
    mean_pages_released: f64,
    m2_pages_released: f64,
}

impl GcStats {
    pub(crate) fn record(&mut self, duration: Duration, pages_released: usize) {
        self.runs += 1;
        let n = self.runs as f64;

        let d = duration.as_secs_f64();
        let delta = d - self.mean_duration_secs;
        self.mean_duration_secs += delta / n;
        self.m2_duration_secs += delta * (d - self.mean_duration_secs);

        let p = pages_released as f64;
        let delta_p = p - self.mean_pages_released;
        self.mean_pages_released += delta_p / n;
        self.m2_pages_released += delta_p * (p - self.mean_pages_released);
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn mean_duration(&self) -> Duration {
        Duration::from_secs_f64(self.mean_duration_secs.max(0.0))
    }

    pub fn variance_duration_secs(&self) -> f64 {
        if self.runs < 2 {
            0.0
        } else {
            self.m2_duration_secs / (self.runs as f64 - 1.0)
        }
    }

    pub fn mean_pages_released(&self) -> f64 {
        self.mean_pages_released
    }

    pub fn variance_pages_released(&self) -> f64 {
        if self.runs < 2 {
            0.0
        } else {
            self.m2_pages_released / (self.runs as f64 - 1.0)
        }
    }
}

/// Runs a full compact-then-reclaim pass over `trie`, recording the result
/// in its [`GcStats`]. Pages that become empty are freed immediately.
pub fn compact<'v, N, V>(trie: &mut Trie<'v, N, V>) -> Result<usize, QpError>
where
    N: DomainName,
    V: TrieValue<N>,
{
    compact_inner(trie, None)
}

/// As [`compact`], but pages that become empty are handed to `deferred`
/// instead of being dropped immediately — the caller decides when it's
/// safe to let go of them (e.g. once no reader of a prior snapshot can
/// still be mid-traversal). Used by [`crate::cow::cow_finish`].
pub fn compact_deferred<'v, N, V>(
    trie: &mut Trie<'v, N, V>,
    deferred: &mut Vec<Arc<PageData>>,
) -> Result<usize, QpError>
where
    N: DomainName,
    V: TrieValue<N>,
{
    compact_inner(trie, Some(deferred))
}

fn compact_inner<'v, N, V>(
    trie: &mut Trie<'v, N, V>,
    mut deferred: Option<&mut Vec<Arc<PageData>>>,
) -> Result<usize, QpError>
where
    N: DomainName,
    V: TrieValue<N>,
{
    let start = Instant::now();

    // Give survivors a page of their own, away from whatever's about to be
    // reclaimed, same as the reference `allocation_reset` at GC start.
    trie.arena_mut().allocation_reset();

    let root = trie.root();
    let new_root = compact_node(trie, root)?;
    trie.set_root(new_root);

    let released = reclaim(trie, deferred.as_deref_mut());

    trie.gc_stats_mut().record(start.elapsed(), released);
    log::debug!(
        "compact: released {} page(s) in {:?}, {} garbage byte(s) outstanding",
        released,
        start.elapsed(),
        trie.garbage(),
    );
    Ok(released)
}

/// Rebuilds `n` post-order, returning the (possibly relocated) node the
/// caller should store in `n`'s place. Pure: never writes through `n`'s
/// own slot, since the trie doesn't expose one at this layer — the caller
/// (the parent frame, or [`compact_inner`] for the root) does that.
fn compact_node<'v, N, V>(trie: &mut Trie<'v, N, V>, n: Node) -> Result<Node, QpError>
where
    N: DomainName,
    V: TrieValue<N>,
{
    if !n.is_branch() {
        return Ok(n);
    }

    let twigs = n.twig_ref();
    let count = n.twig_max();
    let mut buf = [Node::NULL; MAX_TWIGS];
    for (i, slot) in buf.iter_mut().enumerate().take(count) {
        *slot = unsafe { trie.arena().read_twig(twigs, i) };
    }

    let mut any_child_moved = false;
    for i in 0..count {
        let relocated = compact_node(trie, buf[i])?;
        if !nodes_bit_equal(relocated, buf[i]) {
            any_child_moved = true;
        }
        buf[i] = relocated;
    }

    let page_is_thin = trie.arena().table().page(twigs.page()).live() < MIN_USAGE;
    let page_is_kept = trie.arena().table().page(twigs.page()).keep > 0;

    if any_child_moved || page_is_thin {
        let new_ref = trie.arena_mut().alloc_twig_array(&buf[..count])?;
        if !page_is_kept {
            trie.arena_mut().retire_twig_array(twigs, count);
            trie.add_garbage(count * crate::node::NODE_SIZE);
        }
        Ok(Node::new_branch(n.key_offset() as u16, n.bitmap(), new_ref))
    } else {
        Ok(n)
    }
}

fn nodes_bit_equal(a: Node, b: Node) -> bool {
    a.to_bytes() == b.to_bytes()
}

/// Frees (or defers the freeing of) every page this trie currently holds
/// with nothing left alive in it, other than the page presently being
/// bump-allocated into. Returns the number of pages released.
pub fn reclaim<'v, N, V>(
    trie: &mut Trie<'v, N, V>,
    mut deferred: Option<&mut Vec<Arc<PageData>>>,
) -> usize
where
    N: DomainName,
    V: TrieValue<N>,
{
    let current = trie.arena().current_page();
    let len = trie.arena().table().len();
    let mut released = 0;

    for i in 0..len {
        if i == current {
            continue;
        }
        let reclaimable = trie.arena().table().page(i).is_reclaimable();
        if !reclaimable {
            continue;
        }
        let garbage = trie.arena().table().page(i).free as usize;
        trie.sub_garbage(garbage);
        let old_backing = trie.arena_mut().recycle_page(i);
        if let Some(list) = deferred.as_deref_mut() {
            list.push(old_backing);
        }
        released += 1;
    }

    released
}
