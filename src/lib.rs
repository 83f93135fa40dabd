//! A DNS-oriented qp-trie: an ordered associative container keyed by
//! domain names, designed to be embedded in an authoritative DNS server as
//! its primary name-lookup structure.
//!
//! This is a Rust rendering of the `qp-trie` design used by NSD and other
//! authoritative servers: a 12-byte bit-packed node encoding
//! ([`node`]), a page-based bump allocator ([`page`]), a copying garbage
//! collector ([`gc`]), and copy-on-write snapshots ([`cow`]) built on top
//! of ordered trie operations ([`trie`]). The trie never parses DNS wire
//! format and never owns the names or values it indexes; see [`value`]
//! for the borrowing contract a caller's name/value types must uphold.
//!
//! ```
//! use std::ptr::NonNull;
//! use qptrie::value::{DomainName, TrieValue};
//! use qptrie::trie::Trie;
//!
//! struct Name(&'static [u8]);
//! impl DomainName for Name {
//!     fn label_count(&self) -> usize { 1 }
//!     fn label_len(&self, _: usize) -> usize { self.0.len() }
//!     fn label_byte(&self, _: usize, pos: usize) -> u8 { self.0[pos] }
//!     fn name_eq(&self, other: &Self) -> bool { self.0 == other.0 }
//! }
//!
//! struct Record { name: Option<NonNull<Name>>, ttl: u32 }
//! unsafe impl TrieValue<Name> for Record {
//!     fn name_slot(&self) -> *const Option<NonNull<Name>> { &self.name }
//! }
//!
//! let name = Name(b"example");
//! let record = Record { name: Some(NonNull::from(&name)), ttl: 300 };
//!
//! let mut trie: Trie<Name, Record> = Trie::new();
//! trie.add(&record).unwrap();
//! assert_eq!(trie.get(&name).map(|r| r.ttl), Some(300));
//! ```

pub mod config;
pub mod cow;
pub mod error;
pub mod gc;
pub mod key;
pub mod node;
pub mod page;
pub mod trie;
pub mod value;

pub use config::TrieConfig;
pub use error::QpError;
pub use trie::Trie;
pub use value::{DomainName, TrieValue};
