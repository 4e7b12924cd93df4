//! Content-addressed cache of loaded assemblies.
//!
//! Every successfully loaded assembly is recorded together with the SHA-256 digest of the exact
//! bytes it was loaded from. Before loading, the digest of the incoming bytes is looked up; a hit
//! reuses the recorded entry point handle instead of loading the same assembly again. Buffers
//! differing in a single byte hash differently and are always loaded on their own.
//!
//! # Key Components
//!
//! - [`ContentHash`] - SHA-256 digest of an assembly buffer
//! - [`AssemblyRecord`] - An entry point handle and the digest that produced it
//! - [`AssemblyCache`] - The insertion-ordered record collection
//!
//! The cache only ever grows by appending and shrinks by [`AssemblyCache::drain`]; there is no
//! per-record eviction. No two records share a digest: [`AssemblyCache::get_or_try_insert_with`]
//! performs the lookup, the load and the append as one step on the exclusively borrowed cache.

use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};

use crate::Result;

/// SHA-256 digest of an assembly byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Computes the digest of `data`
    pub fn of(data: &[u8]) -> Self {
        ContentHash(Sha256::digest(data).into())
    }

    /// Returns the raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A loaded assembly: its entry point handle and the digest of the bytes it came from.
///
/// Records are immutable after creation and own their handle until teardown releases it.
#[derive(Debug)]
pub struct AssemblyRecord<M> {
    method: M,
    hash: ContentHash,
}

impl<M> AssemblyRecord<M> {
    /// Returns the entry point handle
    pub fn method(&self) -> &M {
        &self.method
    }

    /// Returns the digest of the bytes this record was loaded from
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Consumes the record and hands back ownership of the entry point handle
    pub fn into_method(self) -> M {
        self.method
    }
}

/// Shared reference to a cached [`AssemblyRecord`]
pub type AssemblyRecordRc<M> = Arc<AssemblyRecord<M>>;

/// Insertion-ordered collection of loaded assemblies, keyed by content digest.
#[derive(Debug)]
pub struct AssemblyCache<M> {
    records: Vec<AssemblyRecordRc<M>>,
}

impl<M> Default for AssemblyCache<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> AssemblyCache<M> {
    /// Creates an empty cache
    pub fn new() -> Self {
        AssemblyCache {
            records: Vec::new(),
        }
    }

    /// Returns the record loaded from bytes identical to `data`, if any
    pub fn lookup(&self, data: &[u8]) -> Option<&AssemblyRecordRc<M>> {
        self.find(&ContentHash::of(data))
    }

    /// Returns the record with the given digest, if any
    pub fn find(&self, hash: &ContentHash) -> Option<&AssemblyRecordRc<M>> {
        self.records.iter().find(|record| record.hash == *hash)
    }

    /// Appends a record for `method`, loaded from `data`.
    ///
    /// The caller must have seen [`AssemblyCache::lookup`] miss for `data`; inserting the same
    /// bytes twice would leave two records with one digest.
    pub fn insert(&mut self, method: M, data: &[u8]) -> AssemblyRecordRc<M> {
        self.push(method, ContentHash::of(data))
    }

    /// Returns the record for `data`, loading and appending it first on a miss.
    ///
    /// The boolean is true when `load` ran. A failing `load` leaves the cache untouched and its
    /// error is returned as is.
    ///
    /// # Arguments
    ///
    /// * `data` - The assembly bytes to look up
    /// * `load` - Produces the entry point handle for `data` on a miss
    ///
    /// # Errors
    ///
    /// Returns whatever error `load` produced.
    pub fn get_or_try_insert_with<F>(
        &mut self,
        data: &[u8],
        load: F,
    ) -> Result<(AssemblyRecordRc<M>, bool)>
    where
        F: FnOnce() -> Result<M>,
    {
        let hash = ContentHash::of(data);
        if let Some(record) = self.find(&hash) {
            return Ok((Arc::clone(record), false));
        }

        let method = load()?;
        Ok((self.push(method, hash), true))
    }

    /// Removes and returns every record, in insertion order
    pub fn drain(&mut self) -> Vec<AssemblyRecordRc<M>> {
        std::mem::take(&mut self.records)
    }

    /// Iterates over the records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &AssemblyRecordRc<M>> {
        self.records.iter()
    }

    /// Returns the number of cached assemblies
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no assembly is cached
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, method: M, hash: ContentHash) -> AssemblyRecordRc<M> {
        let record = Arc::new(AssemblyRecord { method, hash });
        self.records.push(Arc::clone(&record));
        record
    }
}
