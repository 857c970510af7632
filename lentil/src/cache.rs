//! Parameter-keyed memoization.
//!
//! A [`Memo`] maps a [`CacheKey`] to a lazily computed, shared value. The
//! slot for a key is created atomically through the map's entry API and
//! guarded by its own mutex, so concurrent callers asking for the same
//! key compute it at most once while other keys proceed in parallel.
//! Failed computations store nothing; their slot is removed unless
//! another caller is already waiting on it.

use crate::common::*;
use dashmap::DashMap;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Content fingerprint of an immutable input table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// FNV-1a over shape, identifiers and value bits
#[derive(Default)]
pub struct FingerprintBuilder {
    hasher: FnvHasher,
}

impl FingerprintBuilder {
    pub fn new(tag: &str) -> Self {
        let mut ret = Self::default();
        ret.str(tag);
        ret
    }

    pub fn usize(&mut self, x: usize) -> &mut Self {
        self.hasher.write_u64(x as u64);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        // length prefix keeps ["ab","c"] apart from ["a","bc"]
        self.usize(s.len());
        self.hasher.write(s.as_bytes());
        self
    }

    pub fn strs<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        self.usize(names.len());
        for s in names {
            self.str(s.as_ref());
        }
        self
    }

    pub fn f32s<'a>(&mut self, values: impl IntoIterator<Item = &'a f32>) -> &mut Self {
        for x in values {
            self.hasher.write_u32(x.to_bits());
        }
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.hasher.finish())
    }
}

/// Which computation a cache entry belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    SelectFeatures,
    UmapModel,
    UmapEmbedding,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SelectFeatures => "select_features",
            Operation::UmapModel => "umap_model",
            Operation::UmapEmbedding => "umap_embedding",
        }
    }
}

/// One element of an ordered parameter tuple
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    Count(usize),
    Seed(u64),
    /// IEEE bits of a real parameter, with `-0.0` folded into `0.0`
    Real(u32),
    Absent,
}

impl Param {
    pub fn real(x: f32) -> Self {
        Param::Real((x + 0.0).to_bits())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: Operation,
    pub params: Vec<Param>,
    pub input: Option<Fingerprint>,
}

impl CacheKey {
    pub fn new(operation: Operation, params: Vec<Param>, input: Option<Fingerprint>) -> Self {
        Self {
            operation,
            params,
            input,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

pub struct Memo<V> {
    name: &'static str,
    slots: DashMap<CacheKey, Slot<V>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    stored: AtomicUsize,
}

impl<V> Memo<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: DashMap::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
        }
    }

    /// Return the stored value for `key`, or run `compute`, store its
    /// result and return it. `compute` runs at most once per key unless
    /// it fails; errors are returned to the caller and not stored.
    pub fn get_or_try_compute<E, F>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> std::result::Result<Arc<V>, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        let slot: Slot<V> = Arc::clone(&*self.slots.entry(key.clone()).or_default());

        // a panic inside `compute` poisons the slot with `None` still in it
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(value) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("{}: cache hit", self.name);
            return Ok(Arc::clone(value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("{}: cache miss", self.name);

        match compute() {
            Ok(value) => {
                let value = Arc::new(value);
                *guard = Some(Arc::clone(&value));
                self.stored.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                // drop the slot unless another caller is waiting on it
                self.slots.remove_if(&key, |_, s| {
                    Arc::ptr_eq(s, &slot) && Arc::strong_count(s) == 2
                });
                drop(guard);
                Err(e)
            }
        }
    }

    /// Number of keys holding a value; never waits on a computation
    pub fn len(&self) -> usize {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
