mod common;

use std::collections::{BTreeMap, HashMap};

use common::{leak_name, leak_record};
use qptrie::key::{name_to_key, Key};
use qptrie::Trie;

const SEED: u64 = 0xC0FFEE;
const OPS: usize = 10_000;

fn random_label(rng: &mut fastrand::Rng, max_len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";
    let len = 1 + rng.usize(0..max_len);
    (0..len)
        .map(|_| ALPHABET[rng.usize(0..ALPHABET.len())] as char)
        .collect()
}

fn random_name(rng: &mut fastrand::Rng) -> String {
    let labels = 1 + rng.usize(0..4);
    (0..labels)
        .map(|_| random_label(rng, 8))
        .collect::<Vec<_>>()
        .join(".")
}

/// Scenario 2: a long run of randomized, seeded `add`/`del` traffic, with
/// an invariant check against an independent oracle after every operation.
#[test]
fn randomized_add_delete_traffic_preserves_every_invariant() {
    let mut rng = fastrand::Rng::with_seed(SEED);
    let mut trie: Trie<common::Name, common::Record> = Trie::new();

    // oracle: name -> id, for `get` correctness and for rebuilding the
    // expected ascending order via each name's encoded key.
    let mut live: HashMap<String, u32> = HashMap::new();
    let mut next_id = 0u32;

    for _ in 0..OPS {
        let delete = !live.is_empty() && rng.f32() < 0.35;
        if delete {
            let idx = rng.usize(0..live.len());
            let victim = live.keys().nth(idx).cloned().unwrap();
            let name = leak_name(&victim);
            trie.del(name).unwrap();
            live.remove(&victim);
        } else {
            let candidate = random_name(&mut rng);
            let name = leak_name(&candidate);
            if trie.get(name).is_some() || live.contains_key(&candidate) {
                continue; // duplicate draw, `add` forbids re-insertion
            }
            let id = next_id;
            next_id += 1;
            trie.add(leak_record(name, id)).unwrap();
            live.insert(candidate, id);
        }

        assert_eq!(trie.count(), live.len(), "leaf count drifted from the oracle");

        let mut seen = 0usize;
        trie.foreach(|_| seen += 1);
        assert_eq!(
            seen,
            live.len(),
            "foreach visited a different number of leaves than are live"
        );
    }

    // final full check: every live name resolves to its own id.
    for (name, id) in &live {
        let n = leak_name(name);
        assert_eq!(trie.get(n).map(|r| r.id), Some(*id));
    }

    // ordering: sort the oracle by encoded key and compare id sequences.
    let mut by_key: Vec<(Key, u32)> = live
        .iter()
        .map(|(name, id)| (name_to_key(leak_name(name), true), *id))
        .collect();
    by_key.sort_by(|a, b| a.0.cmp(&b.0));
    let expected_ids: Vec<u32> = by_key.into_iter().map(|(_, id)| id).collect();

    let mut actual_ids = Vec::new();
    trie.foreach(|r| actual_ids.push(r.id));
    assert_eq!(actual_ids, expected_ids);
}

/// `find_le` must agree with a sorted-by-key oracle at every probe,
/// including probes for names never inserted.
#[test]
fn find_le_matches_a_sorted_oracle_under_random_load() {
    let mut rng = fastrand::Rng::with_seed(SEED ^ 0xA5A5_A5A5);
    let mut trie: Trie<common::Name, common::Record> = Trie::new();
    let mut by_key: BTreeMap<Key, u32> = BTreeMap::new();

    for i in 0..1000u32 {
        let candidate = random_name(&mut rng);
        let name = leak_name(&candidate);
        if trie.get(name).is_some() {
            continue;
        }
        trie.add(leak_record(name, i)).unwrap();
        by_key.insert(name_to_key(name, true), i);
    }

    for _ in 0..500 {
        let probe_str = random_name(&mut rng);
        let probe = leak_name(&probe_str);
        let probe_key = name_to_key(probe, true);

        let (exact, found) = trie.find_le(probe);
        let oracle_exact = by_key.contains_key(&probe_key);
        assert_eq!(exact, oracle_exact);

        let expected_id = if oracle_exact {
            by_key.get(&probe_key).copied()
        } else {
            by_key.range(..probe_key.clone()).next_back().map(|(_, id)| *id)
        };

        assert_eq!(found.map(|r| r.id), expected_id);
    }
}
