mod common;

use common::{leak_name, leak_record};
use qptrie::cow::cow_start;
use qptrie::Trie;

/// Scenario 4: `cow_start`, mutate the new handle, check the old handle is
/// unaffected, `finish`, check the new handle reflects the mutations.
#[test]
fn old_handle_is_isolated_from_writes_on_the_cow_handle() {
    let mut trie: Trie<common::Name, common::Record> = Trie::new();
    let names = ["a", "b", "c", "d"];
    for (i, n) in names.iter().enumerate() {
        let name = leak_name(n);
        trie.add(leak_record(name, i as u32)).unwrap();
    }

    let mut txn = cow_start(&trie);

    let b = leak_name("b");
    txn.trie_mut().del(b).unwrap();
    let e = leak_name("e");
    txn.trie_mut().add(leak_record(e, 4)).unwrap();

    // the old handle must still see the pre-transaction state.
    let mut old_seen = Vec::new();
    trie.foreach(|r| old_seen.push(r.id));
    assert_eq!(old_seen, vec![0, 1, 2, 3]); // a, b, c, d
    assert!(trie.get(e).is_none());
    assert_eq!(trie.get(b).map(|r| r.id), Some(1));
    assert_eq!(trie.count(), 4);

    let (new_trie, _deferred) = txn.finish().unwrap();

    let mut new_seen = Vec::new();
    new_trie.foreach(|r| new_seen.push(r.id));
    assert_eq!(new_seen, vec![0, 2, 3, 4]); // a, c, d, e
    assert!(new_trie.get(b).is_none());
    assert_eq!(new_trie.get(e).map(|r| r.id), Some(4));
    assert_eq!(new_trie.count(), 4);
}

#[test]
#[should_panic(expected = "already open")]
fn nested_cow_start_is_a_contract_violation() {
    let trie: Trie<common::Name, common::Record> = Trie::new();
    let _first = cow_start(&trie);
    let _second = cow_start(&trie);
}

#[test]
fn cow_on_an_empty_trie_round_trips() {
    let trie: Trie<common::Name, common::Record> = Trie::new();
    let txn = cow_start(&trie);
    let (new_trie, _deferred) = txn.finish().unwrap();
    assert_eq!(new_trie.count(), 0);
}

#[test]
fn writes_through_a_deeply_shared_branch_still_evacuate() {
    let mut trie: Trie<common::Name, common::Record> = Trie::new();
    let names = [
        "a.example.com",
        "b.example.com",
        "c.example.com",
        "d.example.com",
        "e.example.com",
    ];
    for (i, n) in names.iter().enumerate() {
        let name = leak_name(n);
        trie.add(leak_record(name, i as u32)).unwrap();
    }

    let mut txn = cow_start(&trie);
    let new_leaf = leak_name("f.example.com");
    txn.trie_mut().add(leak_record(new_leaf, 5)).unwrap();

    // old trie must not see the new leaf no matter how deep the shared
    // branch it would have landed under.
    assert!(trie.get(new_leaf).is_none());
    assert_eq!(trie.count(), names.len());

    let (new_trie, _deferred) = txn.finish().unwrap();
    assert_eq!(new_trie.get(new_leaf).map(|r| r.id), Some(5));
    assert_eq!(new_trie.count(), names.len() + 1);
}

/// Every branch a COW writer evacuates out of a pinned page is garbage
/// from the moment it's relocated, not just whatever a post-finish
/// `compact` happens to notice moved during its own pass. `finish` must
/// credit that garbage back (and the page it came from must eventually
/// become reclaimable) instead of leaking it forever.
#[test]
fn cow_finish_credits_garbage_evacuated_during_the_transaction() {
    let mut trie: Trie<common::Name, common::Record> = Trie::new();
    let original: Vec<&'static common::Name> = (0..3000)
        .map(|i| leak_name(&format!("host{i}.example.com")))
        .collect();
    for (i, name) in original.iter().enumerate() {
        trie.add(leak_record(name, i as u32)).unwrap();
    }

    let mut txn = cow_start(&trie);
    // Touch every original branch: inserting a sibling under each of
    // them forces `evacuate_if_kept` to relocate the shared twig vector
    // it descends through before writing.
    let extra: Vec<&'static common::Name> = (0..3000)
        .map(|i| leak_name(&format!("host{i}b.example.com")))
        .collect();
    for (i, name) in extra.iter().enumerate() {
        txn.trie_mut().add(leak_record(name, 10_000 + i as u32)).unwrap();
    }

    let (mut new_trie, _deferred) = txn.finish().unwrap();

    // The evacuations above must already show up as credited garbage,
    // not silently vanish.
    assert!(
        new_trie.garbage() > 0,
        "garbage evacuated during the cow transaction was never credited"
    );

    let garbage_before_compact = new_trie.garbage();
    let released = new_trie.compact().unwrap();
    assert!(released > 0, "compact freed no pages even though whole pages turned garbage");
    assert!(new_trie.garbage() < garbage_before_compact);

    // every name, old and new, must still resolve correctly post-compact.
    for (i, name) in original.iter().enumerate() {
        assert_eq!(new_trie.get(name).map(|r| r.id), Some(i as u32));
    }
    for (i, name) in extra.iter().enumerate() {
        assert_eq!(new_trie.get(name).map(|r| r.id), Some(10_000 + i as u32));
    }
    assert_eq!(new_trie.count(), original.len() + extra.len());
}
