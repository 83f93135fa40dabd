//! Trie operations: `get`, `find_le`, `add`, `del`, `foreach`, `compact`.
//!
//! Everything here is built from [`crate::node`]'s pure bit-packed
//! accessors and [`crate::page::Arena`]'s bump allocator; the only state a
//! [`Trie`] adds on top is the root node, the leaf count, and the garbage
//! byte counter that triggers [`compact`](Trie::compact).

use std::cell::Cell;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::config::TrieConfig;
use crate::error::QpError;
use crate::gc::{self, GcStats};
use crate::key::{name_to_key, Key};
use crate::node::{Node, QpRef, MAX_TWIGS, NODE_SIZE};
use crate::page::Arena;
use crate::value::{DomainName, TrieValue};

/// Where a [`Node`] currently lives, so a mutating operation can write its
/// replacement back: either the trie's root field, or a specific slot
/// inside some branch's twig vector.
#[derive(Clone, Copy)]
enum Slot {
    Root,
    Twig(QpRef, usize),
}

impl Slot {
    fn write<N, V>(self, trie: &mut Trie<'_, N, V>, node: Node) {
        match self {
            Slot::Root => trie.root = node,
            Slot::Twig(twigs, idx) => unsafe { trie.arena.write_twig(twigs, idx, node) },
        }
    }
}

/// A DNS-oriented qp-trie: an ordered map from domain names to
/// embedder-owned values.
///
/// `'v` is the lifetime values and names must outlive; see
/// [`crate::value`] for the borrowing contract. A fresh `Trie` starts
/// empty; see [`crate::cow`] for how a writer builds a new version while
/// readers keep using this one.
pub struct Trie<'v, N, V> {
    pub(crate) arena: Arena,
    pub(crate) root: Node,
    leaf_count: usize,
    garbage: usize,
    config: TrieConfig,
    gc_stats: GcStats,
    /// Set by [`crate::cow::cow_start`] and never cleared by this trie
    /// itself — the reference state machine's `OPEN` state lives as long
    /// as this handle does, since an embedder that retired a trie after
    /// publishing its successor has no business starting a second
    /// transaction from it anyway.
    pub(crate) cow_open: Cell<bool>,
    /// Twig vectors `evacuate_if_kept` relocated out of a still-pinned
    /// (`keep > 0`) page during an open copy-on-write transaction. Each
    /// such vector is genuinely garbage the moment it's relocated, but
    /// [`crate::page::Arena::retire_twig_array`] refuses to touch a kept
    /// page (the old trie may still be reading those exact bytes), so the
    /// credit is deferred here and drained by
    /// [`crate::cow::CowTransaction::finish`] once `keep` is cleared.
    pub(crate) pending_cow_retire: Vec<(QpRef, usize)>,
    _marker: PhantomData<(&'v N, &'v V)>,
}

impl<'v, N, V> Trie<'v, N, V>
where
    N: DomainName,
    V: TrieValue<N>,
{
    /// An empty trie with the default [`TrieConfig`].
    pub fn new() -> Trie<'v, N, V> {
        Trie::with_config(TrieConfig::default())
    }

    pub fn with_config(config: TrieConfig) -> Trie<'v, N, V> {
        Trie {
            arena: Arena::new(),
            root: Node::NULL,
            leaf_count: 0,
            garbage: 0,
            config,
            gc_stats: GcStats::default(),
            cow_open: Cell::new(false),
            pending_cow_retire: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    /// Number of names currently present.
    pub fn count(&self) -> usize {
        self.leaf_count
    }

    /// Outstanding garbage, in bytes, awaiting the next [`Trie::compact`].
    pub fn garbage(&self) -> usize {
        self.garbage
    }

    fn key_for(&self, name: &N) -> Key {
        name_to_key(name, self.config.case_fold)
    }

    /// Recovers the name indexing a leaf's value via the stored byte
    /// offset, per [`crate::value::TrieValue`]'s contract.
    ///
    /// # Safety
    /// `n` must be a leaf written by this trie (or a snapshot sharing its
    /// pages), with a still-live value behind its pointer.
    unsafe fn leaf_name(&self, n: Node) -> &'v N {
        let slot_ptr =
            (n.value_ptr() as usize + n.name_slot_offset() as usize) as *const Option<NonNull<N>>;
        let name_ptr = (*slot_ptr).expect("leaf's name slot must be populated at insertion time");
        &*name_ptr.as_ptr()
    }

    /// # Safety
    /// `n` must be a leaf written by this trie with a still-live value.
    unsafe fn leaf_value(&self, n: Node) -> &'v V {
        &*(n.value_ptr() as *const V)
    }

    /// Descends from the root, choosing twig `0` whenever the bitmap bit a
    /// key byte would index is not actually set. Always lands on *some*
    /// leaf (unless the trie is empty), not necessarily one whose name has
    /// anything to do with `key` — callers compare the arrived leaf's name
    /// themselves.
    fn descend_ignoring_missing(&self, key: &Key) -> Node {
        let mut n = self.root;
        while n.is_branch() {
            let bit = n.twig_bit(key);
            let pos = if n.has_twig(bit) { n.twig_pos(bit) } else { 0 };
            n = unsafe { self.arena.read_twig(n.twig_ref(), pos) };
        }
        n
    }

    fn rightmost_leaf(&self, mut n: Node) -> Node {
        while n.is_branch() {
            let twigs = n.twig_ref();
            let last = n.twig_max() - 1;
            n = unsafe { self.arena.read_twig(twigs, last) };
        }
        n
    }

    fn leftmost_leaf(&self, mut n: Node) -> Node {
        while n.is_branch() {
            let twigs = n.twig_ref();
            n = unsafe { self.arena.read_twig(twigs, 0) };
        }
        n
    }

    /// Exact lookup.
    pub fn get(&self, name: &N) -> Option<&'v V> {
        if self.root.is_null() {
            return None;
        }
        let key = self.key_for(name);
        let mut n = self.root;
        while n.is_branch() {
            let bit = n.twig_bit(&key);
            if !n.has_twig(bit) {
                return None;
            }
            let pos = n.twig_pos(bit);
            n = unsafe { self.arena.read_twig(n.twig_ref(), pos) };
        }
        if unsafe { self.leaf_name(n) }.name_eq(name) {
            Some(unsafe { self.leaf_value(n) })
        } else {
            None
        }
    }

    /// Exact-or-predecessor lookup. Returns `(true, Some(value))` if
    /// `name` is present; otherwise `(false, value)` where `value` is the
    /// largest name strictly less than `name`, or `(false, None)` if no
    /// such name exists.
    pub fn find_le(&self, name: &N) -> (bool, Option<&'v V>) {
        if self.root.is_null() {
            return (false, None);
        }
        let key = self.key_for(name);
        let arrived = self.descend_ignoring_missing(&key);
        let arrived_name = unsafe { self.leaf_name(arrived) };
        if arrived_name.name_eq(name) {
            return (true, Some(unsafe { self.leaf_value(arrived) }));
        }
        let arrived_key = self.key_for(arrived_name);
        let off = key.diverge(&arrived_key);

        let mut n = self.root;
        let mut left_sibling: Option<Node> = None;
        let mut subtree = self.root;
        loop {
            if n.is_leaf() {
                subtree = n;
                break;
            }
            let k_off = n.key_offset();
            if off < k_off {
                subtree = n;
                break;
            }
            let bit = n.twig_bit(&key);
            let pos = n.twig_pos(bit);
            let twigs = n.twig_ref();
            if pos > 0 {
                left_sibling = Some(unsafe { self.arena.read_twig(twigs, pos - 1) });
            }
            if off == k_off {
                subtree = n;
                break;
            }
            if !n.has_twig(bit) {
                subtree = n;
                break;
            }
            n = unsafe { self.arena.read_twig(twigs, pos) };
        }

        let search_byte = key.at(off);
        let found_byte = arrived_key.at(off);

        let pred = if search_byte > found_byte {
            Some(self.rightmost_leaf(subtree))
        } else {
            left_sibling.map(|s| self.rightmost_leaf(s))
        };

        (false, pred.map(|l| unsafe { self.leaf_value(l) }))
    }

    /// If `n` is a branch whose twig vector lives in a page still pinned
    /// (`keep > 0`) by an in-progress copy-on-write snapshot, copies that
    /// vector into a fresh (unpinned) page and writes the updated node
    /// back through `slot`. Returns the node to keep using — possibly
    /// unchanged, possibly pointing at the new vector.
    ///
    /// Called on every branch a mutating descent passes through, before
    /// using that branch's twig vector, so that by the time a write
    /// actually happens its containing vector is always safe to write
    /// into. See `crate::cow` for why this is enough to keep a COW
    /// snapshot's readers isolated from a concurrent writer.
    ///
    /// The relocated-out-of vector is genuine garbage from the instant
    /// this runs, but it lives in a page the *old* trie may still be
    /// reading (`keep > 0`), so it can't be landfilled yet —
    /// [`crate::page::Arena::retire_twig_array`] asserts against exactly
    /// that. The `(ref, count)` pair is recorded in
    /// [`Trie::pending_cow_retire`] instead, and credited once
    /// [`crate::cow::CowTransaction::finish`] clears the pin.
    fn evacuate_if_kept(&mut self, slot: Slot, n: Node) -> Result<Node, QpError> {
        if !n.is_branch() {
            return Ok(n);
        }
        let twigs = n.twig_ref();
        if self.arena.table().page(twigs.page()).keep == 0 {
            return Ok(n);
        }
        let count = n.twig_max();
        let mut buf = [Node::NULL; MAX_TWIGS];
        for (i, slot) in buf.iter_mut().enumerate().take(count) {
            *slot = unsafe { self.arena.read_twig(twigs, i) };
        }
        let new_twigs = self.arena.alloc_twig_array(&buf[..count])?;
        let updated = n.with_twig_ref(new_twigs);
        slot.write(self, updated);
        self.pending_cow_retire.push((twigs, count));
        Ok(updated)
    }

    fn maybe_retire(&mut self, twigs: QpRef, count: usize) {
        if self.arena.table().page(twigs.page()).keep == 0 {
            self.arena.retire_twig_array(twigs, count);
            self.garbage += count * NODE_SIZE;
        }
    }

    fn maybe_compact(&mut self) -> Result<(), QpError> {
        if let Some(threshold) = self.config.max_garbage {
            if self.garbage > threshold {
                log::trace!(
                    "garbage {} exceeds threshold {}, running compact",
                    self.garbage,
                    threshold
                );
                self.compact()?;
            }
        }
        Ok(())
    }

    /// Inserts `value`, keyed by the name `value`'s [`TrieValue::name_slot`]
    /// points at. Asserts the name is not already present — callers must
    /// check with [`Trie::get`] first if duplicates are possible, per the
    /// reference implementation's contract.
    ///
    /// Returns the value whose name is the largest name strictly less than
    /// the inserted one (if any), and the value whose name is the
    /// smallest name strictly greater (if any) — the new leaf's ordered
    /// neighbors at the moment of insertion.
    pub fn add(&mut self, value: &'v V) -> Result<(Option<&'v V>, Option<&'v V>), QpError> {
        let name = unsafe { self.leaf_name_of_value(value) };
        let key = self.key_for(name);
        let value_ptr = value as *const V as *const ();
        let name_slot_offset =
            (value.name_slot() as usize).wrapping_sub(value_ptr as usize) as u32;
        let new_leaf = unsafe { Node::new_leaf(value_ptr, name_slot_offset) };

        if self.root.is_null() {
            self.root = new_leaf;
            self.leaf_count = 1;
            return Ok((None, None));
        }

        let arrived = self.descend_ignoring_missing(&key);
        let arrived_name = unsafe { self.leaf_name(arrived) };
        debug_assert!(
            !arrived_name.name_eq(name),
            "add() called with a name already present in the trie"
        );
        let arrived_key = self.key_for(arrived_name);
        let off = key.diverge(&arrived_key);
        let newb = key.at(off);
        let oldb = arrived_key.at(off);
        debug_assert_ne!(newb, oldb);

        let mut slot = Slot::Root;
        let mut n = self.root;
        let mut left_branch: Option<Node> = None;
        let mut right_branch: Option<Node> = None;

        loop {
            if n.is_leaf() {
                break;
            }
            let k_off = n.key_offset();
            if off <= k_off {
                break;
            }
            n = self.evacuate_if_kept(slot, n)?;
            let bit = n.twig_bit(&key);
            debug_assert!(n.has_twig(bit));
            let pos = n.twig_pos(bit);
            let max = n.twig_max();
            let twigs = n.twig_ref();
            if pos > 0 {
                left_branch = Some(unsafe { self.arena.read_twig(twigs, pos - 1) });
            }
            if pos + 1 < max {
                right_branch = Some(unsafe { self.arena.read_twig(twigs, pos + 1) });
            }
            slot = Slot::Twig(twigs, pos);
            n = unsafe { self.arena.read_twig(twigs, pos) };
        }

        if n.is_branch() && off == n.key_offset() {
            // grow-branch: n gains one more twig.
            let old_max = n.twig_max();
            let twigs = n.twig_ref();
            let insert_pos = n.twig_pos(newb);
            if insert_pos > 0 {
                left_branch = Some(unsafe { self.arena.read_twig(twigs, insert_pos - 1) });
            }
            if insert_pos < old_max {
                right_branch = Some(unsafe { self.arena.read_twig(twigs, insert_pos) });
            }

            let mut new_nodes = Vec::with_capacity(old_max + 1);
            for i in 0..insert_pos {
                new_nodes.push(unsafe { self.arena.read_twig(twigs, i) });
            }
            new_nodes.push(new_leaf);
            for i in insert_pos..old_max {
                new_nodes.push(unsafe { self.arena.read_twig(twigs, i) });
            }

            let new_bitmap = n.bitmap() | (1u64 << newb);
            let new_ref = self.arena.alloc_twig_array(&new_nodes)?;
            self.maybe_retire(twigs, old_max);
            let replacement = Node::new_branch(n.key_offset() as u16, new_bitmap, new_ref);
            slot.write(self, replacement);
        } else {
            // new-branch: whatever currently sits at `slot` (leaf or
            // branch) becomes a sibling of the new leaf under a fresh
            // 2-twig branch.
            let old_node = n;
            let bitmap = (1u64 << newb) | (1u64 << oldb);
            let twigs = if newb < oldb {
                right_branch = Some(old_node);
                self.arena.alloc_twig_array(&[new_leaf, old_node])?
            } else {
                left_branch = Some(old_node);
                self.arena.alloc_twig_array(&[old_node, new_leaf])?
            };
            let replacement = Node::new_branch(off as u16, bitmap, twigs);
            slot.write(self, replacement);
        }

        self.leaf_count += 1;
        self.maybe_compact()?;

        let prev = left_branch.map(|b| unsafe { self.leaf_value(self.rightmost_leaf(b)) });
        let next = right_branch.map(|b| unsafe { self.leaf_value(self.leftmost_leaf(b)) });
        Ok((prev, next))
    }

    /// # Safety
    /// `value`'s name slot must already point at a live, readable `N`.
    unsafe fn leaf_name_of_value(&self, value: &'v V) -> &'v N {
        let slot = value.name_slot();
        (*slot).expect("value's name slot must be populated before insertion").as_ref()
    }

    /// Removes `name` if present; a no-op otherwise.
    pub fn del(&mut self, name: &N) -> Result<(), QpError> {
        if self.root.is_null() {
            return Ok(());
        }
        let key = self.key_for(name);

        let mut slot = Slot::Root;
        let mut n = self.root;
        let mut parent: Option<(Slot, Node, u8, usize)> = None; // (slot of parent, parent node, bit, pos)

        loop {
            if n.is_leaf() {
                break;
            }
            n = self.evacuate_if_kept(slot, n)?;
            let bit = n.twig_bit(&key);
            if !n.has_twig(bit) {
                return Ok(()); // not present
            }
            let pos = n.twig_pos(bit);
            parent = Some((slot, n, bit, pos));
            slot = Slot::Twig(n.twig_ref(), pos);
            n = unsafe { self.arena.read_twig(n.twig_ref(), pos) };
        }

        if !unsafe { self.leaf_name(n) }.name_eq(name) {
            return Ok(()); // a different name landed at this bitmap slot
        }

        let Some((parent_slot, parent_node, bit, leaf_pos)) = parent else {
            // sole leaf at the root
            self.root = Node::NULL;
            self.leaf_count -= 1;
            return Ok(());
        };

        let parent_max = parent_node.twig_max();
        let parent_twigs = parent_node.twig_ref();

        if parent_max == 2 {
            let sibling_pos = 1 - leaf_pos;
            let sibling = unsafe { self.arena.read_twig(parent_twigs, sibling_pos) };
            self.maybe_retire(parent_twigs, 2);
            parent_slot.write(self, sibling);
        } else {
            let mut new_nodes = Vec::with_capacity(parent_max - 1);
            for i in 0..parent_max {
                if i != leaf_pos {
                    new_nodes.push(unsafe { self.arena.read_twig(parent_twigs, i) });
                }
            }
            let new_bitmap = parent_node.bitmap() & !(1u64 << bit);
            let new_ref = self.arena.alloc_twig_array(&new_nodes)?;
            self.maybe_retire(parent_twigs, parent_max);
            let replacement =
                Node::new_branch(parent_node.key_offset() as u16, new_bitmap, new_ref);
            parent_slot.write(self, replacement);
        }

        self.leaf_count -= 1;
        self.maybe_compact()?;
        Ok(())
    }

    /// Depth-first preorder traversal, visiting every present name in
    /// ascending order. Recursion depth is bounded by the longest key in
    /// the trie (nominally ~512 shifts).
    pub fn foreach<F: FnMut(&'v V)>(&self, mut f: F) {
        self.foreach_node(self.root, &mut f);
    }

    fn foreach_node<F: FnMut(&'v V)>(&self, n: Node, f: &mut F) {
        if n.is_null() {
            return;
        }
        if n.is_leaf() {
            f(unsafe { self.leaf_value(n) });
            return;
        }
        let twigs = n.twig_ref();
        for i in 0..n.twig_max() {
            let child = unsafe { self.arena.read_twig(twigs, i) };
            self.foreach_node(child, f);
        }
    }

    /// Compacts live nodes and reclaims empty pages, freeing them
    /// immediately. Returns the number of pages released.
    pub fn compact(&mut self) -> Result<usize, QpError> {
        gc::compact(self)
    }

    /// Reports total bytes used/free/pinned across the arena to `out`,
    /// returning the live byte count.
    pub fn print_memstats(&self, out: &mut impl Write) -> io::Result<usize> {
        let mut used = 0u64;
        let mut free = 0u64;
        let mut keep = 0u64;
        for i in 0..self.arena.table().len() {
            let page = self.arena.table().page(i);
            used += page.used as u64;
            free += page.free as u64;
            keep += page.keep as u64;
        }
        writeln!(out, "pages: {}", self.arena.table().len())?;
        writeln!(out, "leaves: {}", self.leaf_count)?;
        writeln!(out, "bytes used: {used}")?;
        writeln!(out, "bytes free (garbage): {free}")?;
        writeln!(out, "bytes kept (cow pinned): {keep}")?;
        writeln!(out, "gc runs: {}", self.gc_stats.runs())?;
        Ok((used - free) as usize)
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.gc_stats
    }

    // --- accessors used by `crate::gc` and `crate::cow` ---

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub(crate) fn root(&self) -> Node {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Node) {
        self.root = root;
    }

    pub(crate) fn gc_stats_mut(&mut self) -> &mut GcStats {
        &mut self.gc_stats
    }

    pub(crate) fn add_garbage(&mut self, bytes: usize) {
        self.garbage += bytes;
    }

    pub(crate) fn sub_garbage(&mut self, bytes: usize) {
        self.garbage = self.garbage.saturating_sub(bytes);
    }

    pub(crate) fn config_clone(&self) -> TrieConfig {
        self.config.clone()
    }

    pub(crate) fn leaf_count_mut(&mut self) -> &mut usize {
        &mut self.leaf_count
    }

    /// Drains the twig vectors [`Trie::evacuate_if_kept`] relocated out of
    /// pinned pages during an open copy-on-write transaction, so the
    /// caller can credit them back once the pin is lifted. Empty outside
    /// of [`crate::cow::CowTransaction::finish`].
    pub(crate) fn take_pending_cow_retire(&mut self) -> Vec<(QpRef, usize)> {
        std::mem::take(&mut self.pending_cow_retire)
    }
}

impl<'v, N, V> Default for Trie<'v, N, V>
where
    N: DomainName,
    V: TrieValue<N>,
{
    fn default() -> Trie<'v, N, V> {
        Trie::new()
    }
}
