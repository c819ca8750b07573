//! Interned symbols.
//!
//! Type identifiers, struct field names, keywords and tags are [`Symbol`]s.
//! Each distinct name is stored exactly once for the life of the process, so
//! comparison is pointer equality and the hash is computed once.
//!
//! # Sharding
//!
//! The table is split into [`NUM_SHARDS`] shards, each behind its own
//! `RwLock`, selected by the low bits of the name's `FxHash`. Lookups of
//! already-interned names only take a read lock on one shard.

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{OnceLock, PoisonError, RwLock};

use fxhash::{FxHashMap, FxHasher};

/// Number of shards in the symbol table (power of two).
const NUM_SHARDS: usize = 16;

const SHARD_MASK: usize = NUM_SHARDS - 1;

struct Interned {
    name: &'static str,
    hash: u64,
}

type Shard = RwLock<FxHashMap<&'static str, &'static Interned>>;

static TABLE: OnceLock<[Shard; NUM_SHARDS]> = OnceLock::new();

fn table() -> &'static [Shard; NUM_SHARDS] {
    TABLE.get_or_init(|| std::array::from_fn(|_| RwLock::new(FxHashMap::default())))
}

fn hash_name(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

/// An interned name.
///
/// # Example
///
/// ```
/// use marshal::Symbol;
///
/// let a = Symbol::intern("point");
/// let b: Symbol = "point".into();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "point");
/// ```
#[derive(Clone, Copy)]
pub struct Symbol(&'static Interned);

impl Symbol {
    /// Returns the symbol for `name`, interning it on first use.
    #[must_use]
    pub fn intern(name: &str) -> Self {
        let hash = hash_name(name);
        let shard = &table()[(hash as usize) & SHARD_MASK];

        if let Some(interned) = shard
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Symbol(*interned);
        }

        let mut map = shard.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race for the write lock.
        if let Some(interned) = map.get(name) {
            return Symbol(*interned);
        }

        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let interned: &'static Interned = Box::leak(Box::new(Interned { name, hash }));
        map.insert(name, interned);
        Symbol(interned)
    }

    /// The symbol's name.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.0.name
    }

    /// Precomputed hash of the name.
    #[inline]
    #[must_use]
    pub fn hash_value(self) -> u64 {
        self.0.hash
    }
}

impl PartialEq for Symbol {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::intern(name)
    }
}

impl From<&String> for Symbol {
    fn from(name: &String) -> Self {
        Symbol::intern(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol::intern(&name)
    }
}
