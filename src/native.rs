//! The native map: lookup, ownership arbitration, mutation, deletion and the
//! bulk operators, all over a shared [`Storage`] handle.
//!
//! Every mutating operation takes an `is_unique` flag computed by the caller
//! from its handle. When the flag is false the table is copied before the
//! write ([`NativeMap::ensure_unique`]), so a table observed through any
//! other handle never changes.

use alloc::vec;
use alloc::vec::Vec;
use core::borrow::Borrow;
use core::convert::Infallible;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::hash::Hasher;
use core::iter::FusedIterator;
use core::mem;

use crate::bucket_index::Bucket;
use crate::bucket_index::OccupiedBuckets;
use crate::bucket_index::RelocationDelegate;
use crate::config::Verification;
use crate::diagnostics;
use crate::storage::Scale;
use crate::storage::Slots;
use crate::storage::Storage;

#[inline]
fn hash_with_seed<Q, S>(hash_builder: &S, seed: u64, key: &Q) -> u64
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    let mut hasher = hash_builder.build_hasher();
    hasher.write_u64(seed);
    key.hash(&mut hasher);
    hasher.finish()
}

/// A position of an entry in one generation of a map's table.
///
/// Obtained from [`HashMap::index_of`]. Removing any entry, or growing or
/// shrinking the table, invalidates every outstanding index; using a stale
/// index panics rather than silently naming another entry.
///
/// [`HashMap::index_of`]: crate::HashMap::index_of
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Index {
    bucket: Bucket,
    age: u32,
}

impl Index {
    /// The bucket this index refers to.
    pub fn bucket(self) -> Bucket {
        self.bucket
    }
}

pub(crate) struct NativeMap<K, V, S> {
    storage: Storage<K, V>,
    hash_builder: S,
}

impl<K, V, S> Clone for NativeMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K, V, S> NativeMap<K, V, S> {
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let storage = if capacity == 0 {
            Storage::empty()
        } else {
            Storage::allocate(capacity)
        };
        Self {
            storage,
            hash_builder,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.storage.count()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Whether this map may write its table in place.
    #[inline]
    pub(crate) fn is_unique(&self) -> bool {
        self.storage.is_unique()
    }

    pub(crate) fn shares_storage_with(&self, other: &Self) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn uses_empty_singleton(&self) -> bool {
        self.storage.is_singleton()
    }

    pub(crate) fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.storage,
            buckets: self.storage.bucket_index().into_occupied_buckets(),
            remaining: self.len(),
        }
    }

    /// A consuming cursor sharing this map's table.
    pub(crate) fn cursor(&self) -> IntoIter<K, V> {
        IntoIter {
            remaining: self.len(),
            storage: self.storage.clone(),
            offset: 0,
        }
    }

    pub(crate) fn into_cursor(self) -> IntoIter<K, V> {
        IntoIter {
            remaining: self.len(),
            storage: self.storage,
            offset: 0,
        }
    }

    #[inline]
    pub(crate) fn index_for(&self, bucket: Bucket) -> Index {
        Index {
            bucket,
            age: self.storage.age(),
        }
    }

    /// Resolves `index` against the current table, panicking if it is stale.
    pub(crate) fn validate(&self, index: Index) -> Bucket {
        if index.age != self.storage.age() || !self.storage.bucket_index().is_valid(index.bucket) {
            diagnostics::invalid_index();
        }
        index.bucket
    }

    pub(crate) fn entry_at(&self, index: Index) -> (&K, &V) {
        let bucket = self.validate(index);
        // SAFETY: `validate` checked the bucket is occupied.
        unsafe { (self.storage.key_at(bucket), self.storage.value_at(bucket)) }
    }

    /// Drops every entry.
    pub(crate) fn remove_all(&mut self, is_unique: bool) {
        if !is_unique {
            self.storage = Storage::allocate_after(&self.storage, self.storage.scale());
            return;
        }
        self.storage.clear();
    }
}

impl<K, V, S> NativeMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        hash_with_seed(&self.hash_builder, self.storage.seed(), key)
    }

    /// Finds the bucket holding `key`, or the vacant bucket where it would
    /// be inserted.
    ///
    /// An empty table answers without hashing, and the bucket it reports is
    /// then not an insertion point; use [`Self::probe`] for that.
    pub(crate) fn find<Q>(&self, key: &Q) -> (Bucket, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.storage.count() == 0 {
            return (Bucket::new(0), false);
        }
        self.probe(key)
    }

    /// Walks the probe sequence of `key` to its bucket or the first vacancy.
    fn probe<Q>(&self, key: &Q) -> (Bucket, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        let index = self.storage.bucket_index();
        let mut bucket = index.ideal_bucket(hash);
        while index.is_occupied(bucket) {
            // SAFETY: The bucket is occupied.
            if unsafe { self.storage.key_at(bucket) }.borrow() == key {
                return (bucket, true);
            }
            bucket = index.next_probe(bucket);
        }
        (bucket, false)
    }

    #[inline]
    pub(crate) fn lookup<Q>(&self, key: &Q) -> Option<Bucket>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            (bucket, true) => Some(bucket),
            _ => None,
        }
    }

    pub(crate) fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bucket = self.lookup(key)?;
        // SAFETY: `lookup` only returns occupied buckets.
        unsafe { Some((self.storage.key_at(bucket), self.storage.value_at(bucket))) }
    }

    pub(crate) fn index_of<Q>(&self, key: &Q) -> Option<Index>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(key).map(|bucket| self.index_for(bucket))
    }

    /// Moves every entry of this uniquely held table into a larger one.
    #[cold]
    #[inline(never)]
    fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(self.capacity());
        let target = Storage::allocate_after(&self.storage, Scale::for_capacity(capacity));
        self.rehash_move_into(target);
    }

    fn rehash_move_into(&mut self, mut target: Storage<K, V>) {
        debug_assert!(target.capacity() >= self.len());
        if self.storage.count() > 0 {
            let seed = target.seed();
            let mut offset = 0;
            loop {
                let Some(bucket) = self.storage.bucket_index().next_occupied(offset) else {
                    break;
                };
                offset = bucket.offset() + 1;

                self.storage.bucket_index_mut().remove(bucket);
                let count = self.storage.count();
                self.storage.set_count(count - 1);
                // SAFETY: The bucket held an entry and is now marked vacant,
                // so the entry is moved out exactly once.
                let (key, value) = unsafe { self.storage.take_entry_unchecked(bucket) };

                let hash = hash_with_seed(&self.hash_builder, seed, &key);
                let target_bucket = target.bucket_index_mut().insert_new(hash);
                // SAFETY: `insert_new` just claimed a vacant bucket.
                unsafe { target.initialize_entry(target_bucket, key, value) };
                let count = target.count();
                target.set_count(count + 1);
            }
        }
        self.storage = target;
    }

    /// Inserts into a uniquely held table with room for one more entry.
    fn insert_new_unique(&mut self, key: K, value: V, verification: Verification) -> Bucket {
        debug_assert!(self.len() < self.capacity());
        let bucket = match verification {
            Verification::Checked => {
                let (bucket, found) = self.probe(&key);
                if found {
                    diagnostics::duplicate_keys::<K>();
                }
                self.storage.bucket_index_mut().insert(bucket);
                bucket
            }
            Verification::Unchecked => {
                let hash = self.hash_key(&key);
                self.storage.bucket_index_mut().insert_new(hash)
            }
        };
        // SAFETY: The bucket was vacant until just now.
        unsafe { self.storage.initialize_entry(bucket, key, value) };
        let count = self.storage.count();
        self.storage.set_count(count + 1);
        bucket
    }

    /// Fills the vacant `bucket` returned by a lookup on a unique table.
    fn insert_at(&mut self, bucket: Bucket, key: K, value: V) {
        debug_assert!(self.len() < self.capacity());
        self.storage.bucket_index_mut().insert(bucket);
        // SAFETY: The bucket was vacant until just now.
        unsafe { self.storage.initialize_entry(bucket, key, value) };
        let count = self.storage.count();
        self.storage.set_count(count + 1);
    }

    /// Removes the entry at the occupied `bucket` of a unique table.
    fn remove_unique(&mut self, bucket: Bucket) -> (K, V) {
        // SAFETY: The bucket is occupied, the table unique, and `delete`
        // below marks the bucket vacant or refills it.
        let entry = unsafe { self.storage.take_entry(bucket) };
        let count = self.storage.count();
        self.storage.set_count(count - 1);
        self.storage.bump_age();

        let seed = self.storage.seed();
        let (mut index, slots) = self.storage.split_mut();
        let mut relocator = Relocator {
            slots,
            hash_builder: &self.hash_builder,
            seed,
        };
        index.delete(bucket, &mut relocator);
        entry
    }

    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn probe_histogram(&self) -> Vec<usize> {
        let index = self.storage.bucket_index();
        let mut histogram = Vec::new();
        for bucket in index.occupied_buckets() {
            // SAFETY: The bucket is occupied.
            let hash = self.hash_key(unsafe { self.storage.key_at(bucket) });
            let ideal = index.ideal_bucket(hash);
            let distance = bucket.offset().wrapping_sub(ideal.offset()) & (index.bucket_count() - 1);
            if histogram.len() <= distance {
                histogram.resize(distance + 1, 0);
            }
            histogram[distance] += 1;
        }
        histogram
    }

    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn debug_stats(&self) -> DebugStats {
        let histogram = self.probe_histogram();
        let bucket_count = self.storage.bucket_count();
        DebugStats {
            count: self.len(),
            capacity: self.capacity(),
            bucket_count,
            scale: self.storage.scale().exponent(),
            load_factor: self.len() as f64 / bucket_count as f64,
            longest_probe: histogram.len().saturating_sub(1),
            shared: !self.is_unique() && !self.uses_empty_singleton(),
            allocated_bytes: self.storage.allocated_bytes(),
        }
    }
}

impl<K, V, S> NativeMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Makes the table uniquely held with room for `capacity` entries.
    ///
    /// Returns `true` if the entries were rehashed into a table of a
    /// different scale, in which case previously found buckets are invalid.
    #[inline]
    pub(crate) fn ensure_unique(&mut self, is_unique: bool, capacity: usize) -> bool {
        if is_unique {
            if capacity <= self.capacity() {
                return false;
            }
            self.resize(capacity);
            return true;
        }
        self.copy_and_resize(capacity)
    }

    #[cold]
    #[inline(never)]
    fn copy_and_resize(&mut self, capacity: usize) -> bool {
        let capacity = capacity.max(self.capacity());
        let (mut target, rehash) = Storage::reallocate(&self.storage, capacity);
        if rehash {
            self.rehash_clone_into(target);
        } else {
            let Ok(()) = fill_verbatim(&self.storage, &mut target, |value| {
                Ok::<_, Infallible>(value.clone())
            });
            self.storage = target;
        }
        rehash
    }

    fn rehash_clone_into(&mut self, mut target: Storage<K, V>) {
        debug_assert!(target.capacity() >= self.len());
        let seed = target.seed();
        for bucket in self.storage.bucket_index().occupied_buckets() {
            // SAFETY: The bucket is occupied.
            let (key, value) = unsafe {
                (
                    self.storage.key_at(bucket).clone(),
                    self.storage.value_at(bucket).clone(),
                )
            };
            let hash = hash_with_seed(&self.hash_builder, seed, &key);
            let target_bucket = target.bucket_index_mut().insert_new(hash);
            // SAFETY: `insert_new` just claimed a vacant bucket.
            unsafe { target.initialize_entry(target_bucket, key, value) };
            let count = target.count();
            target.set_count(count + 1);
        }
        self.storage = target;
    }

    /// Finds `key` for a write: the table is made unique with room for the
    /// key if it is missing.
    pub(crate) fn mutating_find(&mut self, key: &K, is_unique: bool) -> (Bucket, bool) {
        let (bucket, found) = self.find(key);
        let required = if found { self.len() } else { self.len() + 1 };
        if !self.ensure_unique(is_unique, required) {
            if !found && self.len() == 0 {
                return (self.probe(key).0, false);
            }
            return (bucket, found);
        }

        let (bucket, refound) = self.probe(key);
        if refound != found {
            diagnostics::duplicate_keys::<K>();
        }
        (bucket, found)
    }

    /// Inserts a key the caller asserts is absent.
    pub(crate) fn insert_new(
        &mut self,
        key: K,
        value: V,
        is_unique: bool,
        verification: Verification,
    ) -> Bucket {
        self.ensure_unique(is_unique, self.len() + 1);
        self.insert_new_unique(key, value, verification)
    }

    /// Inserts or replaces, returning the previous value.
    ///
    /// On a match the stored key is also replaced by `key`.
    pub(crate) fn update_value(&mut self, value: V, key: K, is_unique: bool) -> Option<V> {
        let (bucket, found) = self.mutating_find(&key, is_unique);
        if !found {
            self.insert_at(bucket, key, value);
            return None;
        }

        // SAFETY: The bucket is occupied and the table unique after
        // `mutating_find`.
        unsafe {
            drop(self.storage.replace_key(bucket, key));
            Some(mem::replace(self.storage.value_at_mut(bucket), value))
        }
    }

    /// Inserts or overwrites in place. On a match the stored key is also
    /// replaced by `key`.
    pub(crate) fn set_value(&mut self, value: V, key: K, is_unique: bool) {
        let (bucket, found) = self.mutating_find(&key, is_unique);
        if !found {
            self.insert_at(bucket, key, value);
            return;
        }

        // SAFETY: As in `update_value`.
        unsafe {
            drop(self.storage.replace_key(bucket, key));
            *self.storage.value_at_mut(bucket) = value;
        }
    }

    pub(crate) fn get_mut<Q>(&mut self, key: &Q, is_unique: bool) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bucket = self.lookup(key)?;
        let rehashed = self.ensure_unique(is_unique, self.capacity());
        debug_assert!(!rehashed);
        // SAFETY: The bucket is occupied, and a same-scale copy keeps every
        // entry in its bucket.
        Some(unsafe { self.storage.value_at_mut(bucket) })
    }

    /// Removes the entry at `bucket`, panicking if it is not occupied.
    pub(crate) fn remove_at(&mut self, bucket: Bucket, is_unique: bool) -> (K, V) {
        if !self.storage.bucket_index().is_valid(bucket) {
            diagnostics::invalid_index();
        }
        let rehashed = self.ensure_unique(is_unique, self.capacity());
        debug_assert!(!rehashed);
        self.remove_unique(bucket)
    }

    /// Removes `key` if present. A miss never copies a shared table.
    pub(crate) fn remove<Q>(&mut self, key: &Q, is_unique: bool) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bucket = self.lookup(key)?;
        let rehashed = self.ensure_unique(is_unique, self.capacity());
        debug_assert!(!rehashed);
        Some(self.remove_unique(bucket))
    }

    pub(crate) fn reserve(&mut self, additional: usize, is_unique: bool) {
        let required = self
            .len()
            .checked_add(additional)
            .expect("Allocation Error: capacity overflow");
        if required <= self.capacity() {
            return;
        }
        self.ensure_unique(is_unique, required);
    }

    pub(crate) fn shrink_to_fit(&mut self, is_unique: bool) {
        if self.is_empty() {
            self.storage = Storage::empty();
            return;
        }

        let scale = Scale::for_capacity(self.len());
        if scale >= self.storage.scale() {
            return;
        }
        let target = Storage::allocate_after(&self.storage, scale);
        if is_unique {
            self.rehash_move_into(target);
        } else {
            self.rehash_clone_into(target);
        }
    }

    /// Folds `pairs` into the map; `combine` resolves keys already present.
    ///
    /// Stops at the first error, keeping the pairs merged so far.
    pub(crate) fn try_merge<I, F, E>(
        &mut self,
        pairs: I,
        mut is_unique: bool,
        mut combine: F,
    ) -> Result<(), E>
    where
        I: IntoIterator<Item = (K, V)>,
        F: FnMut(&V, V) -> Result<V, E>,
    {
        for (key, value) in pairs {
            let (bucket, found) = self.mutating_find(&key, is_unique);
            is_unique = true;
            if found {
                // SAFETY: The bucket is occupied and the table unique.
                let merged = combine(unsafe { self.storage.value_at(bucket) }, value)?;
                // SAFETY: As above.
                unsafe { *self.storage.value_at_mut(bucket) = merged };
            } else {
                self.insert_at(bucket, key, value);
            }
        }
        Ok(())
    }

    /// A map with the same keys and transformed values, in the same buckets.
    pub(crate) fn try_map_values<T, F, E>(&self, transform: F) -> Result<NativeMap<K, T, S>, E>
    where
        F: FnMut(&V) -> Result<T, E>,
        S: Clone,
    {
        let mut storage = Storage::allocate_like(&self.storage);
        fill_verbatim(&self.storage, &mut storage, transform)?;
        Ok(NativeMap {
            storage,
            hash_builder: self.hash_builder.clone(),
        })
    }

    /// A map of the entries whose transformed value is `Some`.
    pub(crate) fn try_compact_map_values<T, F, E>(
        &self,
        mut transform: F,
        verification: Verification,
    ) -> Result<NativeMap<K, T, S>, E>
    where
        F: FnMut(&V) -> Result<Option<T>, E>,
        S: Clone,
    {
        let mut result = NativeMap::with_capacity_and_hasher(self.len(), self.hash_builder.clone());
        for (key, value) in self.iter() {
            if let Some(value) = transform(value)? {
                result.insert_new_unique(key.clone(), value, verification);
            }
        }
        Ok(result)
    }

    /// A map of the entries satisfying `predicate`, sized to fit them.
    pub(crate) fn filter<F>(&self, mut predicate: F, verification: Verification) -> Self
    where
        F: FnMut(&K, &V) -> bool,
        S: Clone,
    {
        let kept: Vec<Bucket> = self
            .storage
            .bucket_index()
            .occupied_buckets()
            .filter(|&bucket| {
                // SAFETY: The bucket is occupied.
                unsafe { predicate(self.storage.key_at(bucket), self.storage.value_at(bucket)) }
            })
            .collect();

        let mut result = Self::with_capacity_and_hasher(kept.len(), self.hash_builder.clone());
        for bucket in kept {
            // SAFETY: The bucket is occupied.
            let (key, value) = unsafe {
                (
                    self.storage.key_at(bucket).clone(),
                    self.storage.value_at(bucket).clone(),
                )
            };
            result.insert_new_unique(key, value, verification);
        }
        result
    }
}

impl<K, V, S> NativeMap<K, Vec<V>, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Groups `values` by the key `key_for_value` computes for each, keeping
    /// encounter order within a group.
    pub(crate) fn try_grouping<I, F, E>(
        values: I,
        hash_builder: S,
        mut key_for_value: F,
    ) -> Result<Self, E>
    where
        I: IntoIterator<Item = V>,
        F: FnMut(&V) -> Result<K, E>,
    {
        let mut result = Self::with_capacity_and_hasher(0, hash_builder);
        for value in values {
            let key = key_for_value(&value)?;
            let (bucket, found) = result.mutating_find(&key, true);
            if found {
                // SAFETY: The bucket is occupied and the table unique.
                unsafe { result.storage.value_at_mut(bucket) }.push(value);
            } else {
                result.insert_at(bucket, key, vec![value]);
            }
        }
        Ok(result)
    }
}

/// Fills `target`, a fresh table with the scale and seed of `source`, with
/// every key of `source` and its transformed value, bucket for bucket.
///
/// On error or panic `target` holds exactly the entries filled so far.
fn fill_verbatim<K, V, T, F, E>(
    source: &Storage<K, V>,
    target: &mut Storage<K, T>,
    mut transform: F,
) -> Result<(), E>
where
    K: Clone,
    F: FnMut(&V) -> Result<T, E>,
{
    if source.count() == 0 {
        return Ok(());
    }
    debug_assert_eq!(source.bucket_count(), target.bucket_count());
    debug_assert_eq!(source.seed(), target.seed());

    target
        .bucket_index_mut()
        .copy_contents_from(&source.bucket_index());
    let mut guard = FillGuard {
        storage: target,
        filled: 0,
        pending: None,
    };
    for bucket in source.bucket_index().occupied_buckets() {
        guard.pending = Some(bucket);
        // SAFETY: The bucket is occupied in `source`.
        let (key, value) = unsafe { (source.key_at(bucket), source.value_at(bucket)) };
        let value = transform(value)?;
        let key = key.clone();
        // SAFETY: The bucket is marked occupied in `target` but its slots
        // have not been written yet.
        unsafe { guard.storage.initialize_entry(bucket, key, value) };
        guard.filled += 1;
    }
    guard.pending = None;
    Ok(())
}

struct FillGuard<'a, K, V> {
    storage: &'a mut Storage<K, V>,
    filled: usize,
    pending: Option<Bucket>,
}

impl<K, V> Drop for FillGuard<'_, K, V> {
    fn drop(&mut self) {
        // Buckets from `pending` on were copied from the source's index but
        // never filled.
        if let Some(bucket) = self.pending {
            self.storage.bucket_index_mut().clear_from(bucket);
        }
        self.storage.set_count(self.filled);
    }
}

struct Relocator<'a, K, V, S> {
    slots: Slots<'a, K, V>,
    hash_builder: &'a S,
    seed: u64,
}

impl<K, V, S> RelocationDelegate for Relocator<'_, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    fn hash_of_entry_at(&self, bucket: Bucket) -> u64 {
        // SAFETY: The index only asks about occupied buckets.
        hash_with_seed(self.hash_builder, self.seed, unsafe { self.slots.key(bucket) })
    }

    fn relocate_entry(&mut self, from: Bucket, to: Bucket) {
        // SAFETY: The index moves occupied buckets into the vacant hole.
        unsafe { self.slots.relocate(from, to) }
    }
}

/// An iterator over the entries of a map, in bucket order.
pub struct Iter<'a, K, V> {
    storage: &'a Storage<K, V>,
    buckets: OccupiedBuckets<'a>,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            buckets: self.buckets.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let bucket = self.buckets.next()?;
        self.remaining -= 1;
        let storage = self.storage;
        // SAFETY: The bucket is occupied, and the table cannot change while
        // it is borrowed.
        unsafe { Some((storage.key_at(bucket), storage.value_at(bucket))) }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// An owning iterator over the entries of a map, in bucket order.
///
/// The iterator holds its own handle to the table. Entries are moved out
/// while that handle is the only one, and cloned while the table is still
/// shared with a map.
pub struct IntoIter<K, V> {
    storage: Storage<K, V>,
    offset: usize,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let bucket = self.storage.bucket_index().next_occupied(self.offset)?;
        self.offset = bucket.offset() + 1;
        self.remaining -= 1;

        if self.storage.is_unique() {
            // Nothing else can look this table up again, so buckets are
            // vacated without repairing probe chains.
            self.storage.bucket_index_mut().remove(bucket);
            let count = self.storage.count();
            self.storage.set_count(count - 1);
            // SAFETY: The bucket held an entry and is now marked vacant.
            Some(unsafe { self.storage.take_entry_unchecked(bucket) })
        } else {
            // SAFETY: The bucket is occupied.
            unsafe {
                Some((
                    self.storage.key_at(bucket).clone(),
                    self.storage.value_at(bucket).clone(),
                ))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for IntoIter<K, V> {}

impl<K: Clone, V: Clone> FusedIterator for IntoIter<K, V> {}

/// A snapshot of a map's table, for tuning and debugging.
#[cfg(any(test, feature = "stats"))]
#[derive(Clone, Debug, PartialEq)]
pub struct DebugStats {
    /// Number of entries.
    pub count: usize,
    /// Number of entries the table holds before growing.
    pub capacity: usize,
    /// Number of buckets.
    pub bucket_count: usize,
    /// Base two logarithm of the bucket count.
    pub scale: u8,
    /// `count / bucket_count`.
    pub load_factor: f64,
    /// Largest distance of any entry from its ideal bucket.
    pub longest_probe: usize,
    /// Whether another map shares the table.
    pub shared: bool,
    /// Size of the table's allocation in bytes.
    pub allocated_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Prints the statistics to standard output.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Table Statistics ===");
        println!("Entries:         {}", self.count);
        println!("Capacity:        {}", self.capacity);
        println!("Buckets:         {} (scale {})", self.bucket_count, self.scale);
        println!("Load factor:     {:.2}%", self.load_factor * 100.0);
        println!("Longest probe:   {}", self.longest_probe);
        println!("Shared:          {}", self.shared);
        println!("Allocated bytes: {}", self.allocated_bytes);
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use core::cell::Cell;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    type Map<K, V> = NativeMap<K, V, SipHashBuilder>;

    fn new_map<K, V>() -> Map<K, V> {
        with_capacity(0)
    }

    fn with_capacity<K, V>(capacity: usize) -> Map<K, V> {
        NativeMap::with_capacity_and_hasher(capacity, SipHashBuilder::default())
    }

    fn insert<K, V>(map: &mut Map<K, V>, key: K, value: V) -> Option<V>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        let is_unique = map.is_unique();
        map.update_value(value, key, is_unique)
    }

    fn get<'a, K, V>(map: &'a Map<K, V>, key: &K) -> Option<&'a V>
    where
        K: Hash + Eq,
    {
        map.get_key_value(key).map(|(_, v)| v)
    }

    #[derive(Clone)]
    struct Counted {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    /// Equal by `id` only, so tests can tell instances apart.
    #[derive(Clone, Debug)]
    struct Tagged {
        id: u32,
        tag: &'static str,
    }

    impl PartialEq for Tagged {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl Eq for Tagged {}

    impl Hash for Tagged {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    /// Hashes to a constant and compares unequal only on the first
    /// comparison made through a shared counter.
    #[derive(Clone)]
    struct Fickle {
        comparisons: Rc<Cell<usize>>,
    }

    impl PartialEq for Fickle {
        fn eq(&self, _: &Self) -> bool {
            let seen = self.comparisons.get();
            self.comparisons.set(seen + 1);
            seen > 0
        }
    }

    impl Eq for Fickle {}

    impl Hash for Fickle {
        fn hash<H: Hasher>(&self, state: &mut H) {
            0u8.hash(state);
        }
    }

    #[test]
    fn test_find_on_empty_does_not_hash() {
        let map: Map<Fickle, u32> = new_map();
        let key = Fickle {
            comparisons: Rc::new(Cell::new(0)),
        };
        assert_eq!(map.find(&key), (Bucket::new(0), false));
        assert_eq!(key.comparisons.get(), 0);
    }

    #[test]
    fn test_insert_into_emptied_table_uses_probe_position() {
        let mut map: Map<u32, u32> = with_capacity(64);
        for round in 0..3 {
            for i in 0..40 {
                insert(&mut map, i, i + round);
            }
            for i in 0..40 {
                assert_eq!(get(&map, &i), Some(&(i + round)));
            }
            map.remove_all(true);
            assert!(map.is_empty());
        }

        let is_unique = map.is_unique();
        map.insert_new(5, 5, is_unique, Verification::Checked);
        assert_eq!(get(&map, &5), Some(&5));
    }

    #[test]
    fn test_unique_with_room_is_a_no_op() {
        let mut map: Map<u32, u32> = with_capacity(8);
        insert(&mut map, 1, 1);
        let seed = map.storage.seed();
        assert!(!map.ensure_unique(true, map.capacity()));
        assert_eq!(map.storage.seed(), seed);
    }

    #[test]
    fn test_unique_resize_always_rehashes() {
        let mut map: Map<u32, String> = new_map();
        for i in 0..3 {
            insert(&mut map, i, i.to_string());
        }
        let capacity = map.capacity();
        assert!(map.ensure_unique(true, capacity + 1));
        assert!(map.capacity() > capacity);
        assert_eq!(map.len(), 3);
        for i in 0..3 {
            assert_eq!(get(&map, &i), Some(&i.to_string()));
        }
    }

    #[test]
    fn test_shared_same_scale_copy_keeps_buckets() {
        let mut map: Map<u32, String> = with_capacity(32);
        for i in 0..20 {
            insert(&mut map, i, i.to_string());
        }
        let snapshot = map.clone();
        let before: Vec<(Bucket, u32)> = (0..20).map(|i| (map.lookup(&i).unwrap(), i)).collect();

        assert!(!map.is_unique());
        assert!(!map.ensure_unique(false, map.capacity()));
        assert!(map.is_unique());
        assert!(!map.shares_storage_with(&snapshot));
        for (bucket, key) in before {
            assert_eq!(map.lookup(&key), Some(bucket));
        }
        assert_eq!(map.storage.age(), snapshot.storage.age());
    }

    #[test]
    fn test_shared_growing_copy_rehashes() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..5 {
            insert(&mut map, i, i * 10);
        }
        let snapshot = map.clone();
        assert!(map.ensure_unique(false, map.capacity() + 1));
        assert_eq!(map.len(), 5);
        assert_eq!(snapshot.len(), 5);
        for i in 0..5 {
            assert_eq!(get(&map, &i), Some(&(i * 10)));
            assert_eq!(get(&snapshot, &i), Some(&(i * 10)));
        }
    }

    #[test]
    fn test_copy_of_singleton_allocates() {
        let mut map: Map<u32, u32> = new_map();
        assert!(map.uses_empty_singleton());
        assert!(map.ensure_unique(false, 0));
        assert!(map.is_unique());
        assert!(map.capacity() >= 1);
    }

    #[test]
    fn test_fill_verbatim_error_keeps_filled_prefix() {
        let drops = Rc::new(Cell::new(0));
        let mut map: Map<u32, Counted> = with_capacity(16);
        for i in 0..10 {
            insert(
                &mut map,
                i,
                Counted {
                    drops: drops.clone(),
                },
            );
        }

        let mut target: Storage<u32, u32> = Storage::allocate_like(&map.storage);
        let mut calls = 0;
        let result = fill_verbatim(&map.storage, &mut target, |_| {
            calls += 1;
            if calls == 4 { Err("stop") } else { Ok(calls) }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(target.count(), 3);
        assert_eq!(target.bucket_index().occupied_count(), 3);
        drop(target);

        drop(map);
        assert_eq!(drops.get(), 10);
    }

    #[test]
    fn test_mutating_find_grows_for_missing_key_only() {
        let mut map: Map<u32, u32> = new_map();
        insert(&mut map, 1, 1);
        let capacity = map.capacity();
        for i in 2..=capacity as u32 {
            insert(&mut map, i, i);
        }
        assert_eq!(map.len(), capacity);

        let (_, found) = map.mutating_find(&1, true);
        assert!(found);
        assert_eq!(map.capacity(), capacity);

        let (bucket, found) = map.mutating_find(&1000, true);
        assert!(!found);
        assert!(map.capacity() > capacity);
        assert!(!map.storage.bucket_index().is_occupied(bucket));
    }

    #[test]
    #[should_panic(expected = "duplicate keys")]
    fn test_mutating_find_detects_inconsistent_keys() {
        let comparisons = Rc::new(Cell::new(0));
        let mut map: Map<Fickle, u32> = new_map();
        map.insert_new(
            Fickle {
                comparisons: comparisons.clone(),
            },
            1,
            false,
            Verification::Unchecked,
        );
        assert_eq!(map.capacity(), 1);

        // The first comparison says "different", so the map grows; after
        // the rehash the same key compares equal.
        map.update_value(2, Fickle { comparisons }, true);
    }

    #[test]
    fn test_insert_new_both_verification_paths() {
        for verification in [Verification::Checked, Verification::Unchecked] {
            let mut map: Map<u32, u32> = new_map();
            for i in 0..200 {
                let is_unique = map.is_unique();
                map.insert_new(i, i + 1, is_unique, verification);
            }
            assert_eq!(map.len(), 200);
            for i in 0..200 {
                assert_eq!(get(&map, &i), Some(&(i + 1)));
            }
        }
    }

    #[test]
    #[should_panic(expected = "duplicate keys of type 'u32'")]
    fn test_checked_insert_new_rejects_duplicate() {
        let mut map: Map<u32, u32> = new_map();
        map.insert_new(7, 1, false, Verification::Checked);
        map.insert_new(7, 2, true, Verification::Checked);
    }

    #[test]
    fn test_update_value_restamps_key() {
        let mut map: Map<Tagged, u32> = new_map();
        assert_eq!(insert(&mut map, Tagged { id: 1, tag: "old" }, 10), None);
        assert_eq!(insert(&mut map, Tagged { id: 1, tag: "new" }, 20), Some(10));
        assert_eq!(map.len(), 1);

        let (key, value) = map.get_key_value(&Tagged { id: 1, tag: "" }).unwrap();
        assert_eq!(key.tag, "new");
        assert_eq!(*value, 20);

        let is_unique = map.is_unique();
        map.set_value(30, Tagged { id: 1, tag: "newer" }, is_unique);
        let (key, value) = map.get_key_value(&Tagged { id: 1, tag: "" }).unwrap();
        assert_eq!(key.tag, "newer");
        assert_eq!(*value, 30);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_update_value_on_shared_leaves_original() {
        let mut map: Map<u32, u32> = new_map();
        insert(&mut map, 1, 1);
        let snapshot = map.clone();
        assert_eq!(insert(&mut map, 1, 2), Some(1));
        assert_eq!(get(&snapshot, &1), Some(&1));
        assert_eq!(get(&map, &1), Some(&2));
    }

    #[test]
    fn test_remove_at_relocates_and_bumps_age() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..500 {
            insert(&mut map, i, i);
        }
        let age = map.storage.age();
        for i in (0..500).step_by(2) {
            let bucket = map.lookup(&i).unwrap();
            let is_unique = map.is_unique();
            assert_eq!(map.remove_at(bucket, is_unique), (i, i));
        }
        assert_eq!(map.len(), 250);
        assert_ne!(map.storage.age(), age);
        for i in 0..500 {
            assert_eq!(get(&map, &i).is_some(), i % 2 == 1, "key {i}");
        }
        assert_eq!(map.storage.bucket_index().occupied_count(), 250);
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn test_remove_at_vacant_bucket_panics() {
        let mut map: Map<u32, u32> = with_capacity(8);
        insert(&mut map, 1, 1);
        let vacant = (0..map.storage.bucket_count())
            .map(Bucket::new)
            .find(|&b| !map.storage.bucket_index().is_occupied(b))
            .unwrap();
        map.remove_at(vacant, true);
    }

    #[test]
    fn test_remove_miss_does_not_copy() {
        let mut map: Map<u32, u32> = new_map();
        insert(&mut map, 1, 1);
        let snapshot = map.clone();
        assert_eq!(map.remove(&2, false), None);
        assert!(map.shares_storage_with(&snapshot));

        assert_eq!(map.remove(&1, false), Some((1, 1)));
        assert!(!map.shares_storage_with(&snapshot));
        assert_eq!(get(&snapshot, &1), Some(&1));
    }

    #[test]
    fn test_remove_all_shared_and_unique() {
        let drops = Rc::new(Cell::new(0));
        let mut map: Map<u32, Counted> = new_map();
        for i in 0..10 {
            insert(
                &mut map,
                i,
                Counted {
                    drops: drops.clone(),
                },
            );
        }
        let scale = map.storage.scale();
        let snapshot = map.clone();

        map.remove_all(false);
        assert!(map.is_empty());
        assert_eq!(map.storage.scale(), scale);
        assert_eq!(snapshot.len(), 10);
        assert_eq!(drops.get(), 0);

        drop(map);
        let mut map = snapshot;
        let capacity = map.capacity();
        map.remove_all(true);
        assert_eq!(drops.get(), 10);
        assert_eq!(map.capacity(), capacity);
    }

    #[test]
    fn test_map_values_keeps_layout_and_skips_empty_slots() {
        let mut map: Map<u32, u32> = with_capacity(64);
        for i in 0..30 {
            insert(&mut map, i, i);
        }
        let mut calls = 0;
        let mapped = map
            .try_map_values(|v| {
                calls += 1;
                Ok::<_, Infallible>(v.to_string())
            })
            .unwrap();
        assert_eq!(calls, 30);
        assert_eq!(mapped.len(), 30);
        for i in 0..30 {
            assert_eq!(mapped.lookup(&i), map.lookup(&i));
            assert_eq!(get(&mapped, &i), Some(&i.to_string()));
        }
    }

    #[test]
    fn test_map_values_of_empty_singleton() {
        let map: Map<u32, u32> = new_map();
        let mapped = map.try_map_values(|v| Ok::<_, Infallible>(*v)).unwrap();
        assert!(mapped.uses_empty_singleton());
    }

    #[test]
    fn test_merge_combines_and_inserts() {
        let mut map: Map<String, u32> = new_map();
        insert(&mut map, "x".to_string(), 1);
        let snapshot = map.clone();

        let pairs = vec![("x".to_string(), 2), ("y".to_string(), 3)];
        map.try_merge(pairs, false, |a, b| Ok::<_, Infallible>(a + b))
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(get(&map, &"x".to_string()), Some(&3));
        assert_eq!(get(&map, &"y".to_string()), Some(&3));
        assert_eq!(get(&snapshot, &"x".to_string()), Some(&1));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_merge_error_keeps_applied_pairs() {
        let mut map: Map<u32, u32> = new_map();
        insert(&mut map, 1, 1);
        let pairs = vec![(2, 2), (1, 5), (3, 3)];
        let result = map.try_merge(pairs, true, |_, _| Err("conflict"));
        assert_eq!(result, Err("conflict"));
        assert_eq!(map.len(), 2);
        assert_eq!(get(&map, &1), Some(&1));
        assert_eq!(get(&map, &2), Some(&2));
        assert_eq!(get(&map, &3), None);
    }

    #[test]
    fn test_grouping_by_parity() {
        let groups: Map<&'static str, Vec<u32>> = NativeMap::try_grouping(
            [1, 2, 3, 4],
            SipHashBuilder::default(),
            |v| Ok::<_, Infallible>(if v % 2 == 0 { "even" } else { "odd" }),
        )
        .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(get(&groups, &"even"), Some(&vec![2, 4]));
        assert_eq!(get(&groups, &"odd"), Some(&vec![1, 3]));
    }

    #[test]
    fn test_grouping_error_stops() {
        let result: Result<Map<u32, Vec<u32>>, u32> = NativeMap::try_grouping(
            [1, 2, 3],
            SipHashBuilder::default(),
            |&v| if v == 2 { Err(v) } else { Ok(v) },
        );
        assert_eq!(result.err(), Some(2));
    }

    #[test]
    fn test_compact_map_values_and_filter() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..50 {
            insert(&mut map, i, i);
        }
        let evens = map
            .try_compact_map_values(
                |v| Ok::<_, Infallible>((v % 2 == 0).then(|| v * 2)),
                Verification::Checked,
            )
            .unwrap();
        assert_eq!(evens.len(), 25);
        assert_eq!(get(&evens, &10), Some(&20));
        assert_eq!(get(&evens, &11), None);

        let small = map.filter(|k, _| *k < 5, Verification::Unchecked);
        assert_eq!(small.len(), 5);
        assert!(small.capacity() < map.capacity());
        for i in 0..5 {
            assert_eq!(get(&small, &i), Some(&i));
        }

        let none = map.filter(|_, _| false, Verification::Checked);
        assert!(none.uses_empty_singleton());
    }

    #[test]
    fn test_reserve_and_shrink() {
        let mut map: Map<u32, u32> = new_map();
        map.reserve(0, false);
        assert!(map.uses_empty_singleton());

        map.reserve(100, false);
        assert!(map.capacity() >= 100);
        for i in 0..10 {
            insert(&mut map, i, i);
        }

        let snapshot = map.clone();
        map.shrink_to_fit(false);
        assert!(map.capacity() < snapshot.capacity());
        assert!(snapshot.capacity() >= 100);
        for i in 0..10 {
            assert_eq!(get(&map, &i), Some(&i));
        }

        map.shrink_to_fit(true);
        map.remove_all(true);
        map.shrink_to_fit(true);
        assert!(map.uses_empty_singleton());
    }

    #[test]
    fn test_get_mut_copies_shared() {
        let mut map: Map<u32, String> = new_map();
        insert(&mut map, 1, "a".to_string());
        let snapshot = map.clone();
        map.get_mut(&1, false).unwrap().push('b');
        assert_eq!(get(&map, &1).map(String::as_str), Some("ab"));
        assert_eq!(get(&snapshot, &1).map(String::as_str), Some("a"));
        assert!(map.get_mut(&2, true).is_none());
    }

    #[test]
    fn test_cursor_clones_while_shared_and_moves_when_unique() {
        let drops = Rc::new(Cell::new(0));
        let mut map: Map<u32, Counted> = new_map();
        for i in 0..8 {
            insert(
                &mut map,
                i,
                Counted {
                    drops: drops.clone(),
                },
            );
        }

        let mut cursor = map.cursor();
        assert_eq!(cursor.len(), 8);
        let (first, _) = cursor.next().unwrap();
        assert!(first < 8);
        assert_eq!(drops.get(), 1);
        assert_eq!(map.len(), 8);

        drop(map);
        let rest: Vec<u32> = cursor.by_ref().map(|(k, _)| k).collect();
        assert_eq!(rest.len(), 7);
        assert!(!rest.contains(&first));
        assert_eq!(drops.get(), 8);
        assert!(cursor.next().is_none());

        // The entry that was cloned while shared is still in the table.
        drop(cursor);
        assert_eq!(drops.get(), 9);
    }

    #[test]
    fn test_iter_visits_each_entry_once() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..100 {
            insert(&mut map, i, i * 3);
        }
        let mut seen: Vec<u32> = map
            .iter()
            .map(|(k, v)| {
                assert_eq!(*v, k * 3);
                *k
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(map.iter().len(), 100);
    }

    #[test]
    fn test_index_goes_stale_after_removal() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..10 {
            insert(&mut map, i, i);
        }
        let index = map.index_of(&3).unwrap();
        assert_eq!(map.entry_at(index), (&3, &3));
        insert(&mut map, 3, 4);
        assert_eq!(map.entry_at(index), (&3, &4));

        map.remove(&9, true);
        let age = map.storage.age();
        assert_ne!(index.age, age);
    }

    #[test]
    fn test_index_stale_across_resize_round_trips() {
        // Each round frees tables of the same scales, so the allocator is
        // likely to reuse their addresses.
        for _ in 0..200 {
            let mut map: Map<u32, u32> = with_capacity(6);
            for i in 0..6 {
                insert(&mut map, i, i);
            }
            let index = map.index_of(&0).unwrap();
            map.reserve(1000, true);
            map.remove(&0, true);
            map.shrink_to_fit(true);
            assert_ne!(map.storage.age(), index.age);
        }
    }

    #[test]
    fn test_remove_all_in_place_ages_the_table() {
        let mut map: Map<u32, u32> = with_capacity(8);
        insert(&mut map, 1, 1);
        let index = map.index_of(&1).unwrap();
        map.remove_all(true);
        assert_ne!(map.storage.age(), index.age);
    }

    #[test]
    fn test_debug_stats() {
        let mut map: Map<u32, u32> = new_map();
        for i in 0..40 {
            insert(&mut map, i, i);
        }
        let stats = map.debug_stats();
        assert_eq!(stats.count, 40);
        assert_eq!(stats.capacity, map.capacity());
        assert_eq!(stats.bucket_count, 1 << stats.scale);
        assert!(!stats.shared);
        assert_eq!(map.probe_histogram().iter().sum::<usize>(), 40);

        let snapshot = map.clone();
        assert!(snapshot.debug_stats().shared);
    }
}
