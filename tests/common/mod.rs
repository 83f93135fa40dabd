//! Shared `DomainName`/`TrieValue` fixtures for the integration tests.
//!
//! Tests leak their names and values (`Box::leak`) rather than threading a
//! lifetime through every test function — acceptable here since each test
//! process exits shortly after, and it keeps the test bodies focused on the
//! trie behavior under test rather than on arena bookkeeping.

use std::ptr::NonNull;

use qptrie::{DomainName, TrieValue};

/// A domain name as a list of labels, root-first-skipped, rightmost to
/// leftmost (`"www.example.com"` -> `[b"com", b"example", b"www"]`).
pub struct Name(pub Vec<Vec<u8>>);

impl Name {
    pub fn from_str(s: &str) -> Name {
        let mut labels: Vec<Vec<u8>> = s.split('.').map(|l| l.as_bytes().to_vec()).collect();
        labels.reverse();
        Name(labels)
    }
}

impl DomainName for Name {
    fn label_count(&self) -> usize {
        self.0.len()
    }

    fn label_len(&self, index: usize) -> usize {
        self.0[index].len()
    }

    fn label_byte(&self, index: usize, pos: usize) -> u8 {
        self.0[index][pos]
    }

    fn name_eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y))
            })
    }
}

/// A value indexed by `name`, carrying an arbitrary payload for tests to
/// check round-tripped.
pub struct Record {
    name: Option<NonNull<Name>>,
    pub id: u32,
}

unsafe impl TrieValue<Name> for Record {
    fn name_slot(&self) -> *const Option<NonNull<Name>> {
        &self.name
    }
}

/// Leaks a `Name` so it can be handed to a `'static` trie for the rest of a
/// test's lifetime.
pub fn leak_name(s: &str) -> &'static Name {
    Box::leak(Box::new(Name::from_str(s)))
}

/// Leaks a `Record` naming `name`, ready for `Trie::add`.
pub fn leak_record(name: &'static Name, id: u32) -> &'static Record {
    Box::leak(Box::new(Record {
        name: Some(NonNull::from(name)),
        id,
    }))
}
