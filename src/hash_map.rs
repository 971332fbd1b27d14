use alloc::vec::Vec;
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;

use crate::config::Verification;
#[cfg(any(test, feature = "stats"))]
use crate::native::DebugStats;
use crate::native::Index;
use crate::native::IntoIter;
use crate::native::Iter;
use crate::native::NativeMap;

/// A copy-on-write hash map with unique keys.
///
/// Cloning a `HashMap` is constant time: the clone shares the original's
/// table. The first mutation through either map copies the table, so
/// neither map ever observes the other's changes. A map that has never
/// held anything shares a process-wide empty table and allocates nothing.
///
/// Entries live in a single open-addressed table with linear probing.
/// Removal shifts later entries of the same probe run backwards, so the
/// table never accumulates tombstones.
///
/// Because a shared table is copied by cloning its entries, every operation
/// that may write requires `K: Clone` and `V: Clone`.
///
/// # Examples
///
/// ```rust
/// # use core::hash::BuildHasher;
/// # use siphasher::sip::SipHasher;
/// #
/// # use cow_hash::HashMap;
/// #
/// # #[derive(Clone, Default)]
/// # struct SimpleHasher;
/// # impl BuildHasher for SimpleHasher {
/// #     type Hasher = SipHasher;
/// #
/// #     fn build_hasher(&self) -> Self::Hasher {
/// #         SipHasher::new()
/// #     }
/// # }
/// #
/// let mut original: HashMap<&str, i32, SimpleHasher> = HashMap::new();
/// original.insert("a", 1);
///
/// let mut copy = original.clone();
/// assert!(copy.shares_storage_with(&original));
///
/// copy.insert("b", 2);
/// assert!(!copy.shares_storage_with(&original));
/// assert_eq!(original.len(), 1);
/// assert_eq!(copy.len(), 2);
/// ```
#[derive(Clone)]
pub struct HashMap<K, V, S> {
    native: NativeMap<K, V, S>,
    verification: Verification,
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        if self.shares_storage_with(other) {
            return true;
        }
        self.iter()
            .all(|(k, v)| other.get(k).is_some_and(|other_v| v == other_v))
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns the number of entries in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<i32, &str, SimpleHasher> = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.native.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.native.is_empty()
    }

    /// Returns the number of entries the map can hold before its table
    /// grows.
    pub fn capacity(&self) -> usize {
        self.native.capacity()
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        self.native.hasher()
    }

    /// Returns how [`HashMap::insert_unique`] treats its key.
    pub fn verification(&self) -> Verification {
        self.verification
    }

    /// Returns `true` if both maps currently share one table.
    ///
    /// Clones share their source's table until one of them is mutated.
    /// Maps that have never held anything share the empty table.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.native.shares_storage_with(&other.native)
    }

    /// An iterator visiting all key-value pairs in table order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, i32, SimpleHasher> = [(1, 10), (2, 20)].into_iter().collect();
    /// let total: i32 = map.iter().map(|(k, v)| k + v).sum();
    /// assert_eq!(total, 33);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.native.iter()
    }

    /// An iterator visiting all keys in table order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// An iterator visiting all values in table order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// An owning iterator over a snapshot of the map.
    ///
    /// The cursor shares the map's table. Entries are cloned out while the
    /// map still holds the table and moved out once the cursor is its only
    /// holder. Later changes to the map are not visible to the cursor.
    pub fn cursor(&self) -> IntoIter<K, V> {
        self.native.cursor()
    }

    /// Returns the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is stale: an entry was removed, the map was
    /// cleared, or the table was resized since the index was obtained.
    pub fn get_at(&self, index: Index) -> (&K, &V) {
        self.native.entry_at(index)
    }

    /// Removes every entry.
    ///
    /// A table held only by this map keeps its allocation. A shared table
    /// is left to its other holders and replaced by an empty one of the
    /// same size.
    pub fn clear(&mut self) {
        let is_unique = self.native.is_unique();
        self.native.remove_all(is_unique);
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates an empty map with the given hasher builder.
    ///
    /// The map does not allocate until the first insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 0);
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty map able to hold at least `capacity` entries
    /// without growing.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            native: NativeMap::with_capacity_and_hasher(capacity, hash_builder),
            verification: Verification::default(),
        }
    }

    /// Sets how [`HashMap::insert_unique`] treats its key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// # use cow_hash::Verification;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<u32, u32, SimpleHasher> =
    ///     HashMap::new().with_verification(Verification::Unchecked);
    /// for i in 0..10 {
    ///     map.insert_unique(i, i * i);
    /// }
    /// assert_eq!(map.get(&3), Some(&9));
    /// ```
    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    /// Returns a reference to the value for `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<String, i32, SimpleHasher> = HashMap::new();
    /// map.insert("one".to_string(), 1);
    /// assert_eq!(map.get("one"), Some(&1));
    /// assert_eq!(map.get("two"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.native.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key and its value for `key`.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.native.get_key_value(key)
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.native.lookup(key).is_some()
    }

    /// Returns the position of `key` in the current table.
    ///
    /// The index stays valid across insertions that do not grow the table
    /// and is invalidated by any removal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<&str, i32, SimpleHasher> = HashMap::with_capacity(4);
    /// map.insert("a", 1);
    /// let index = map.index_of("a").unwrap();
    /// assert_eq!(map.get_at(index), (&"a", &1));
    /// assert_eq!(map.remove_at(index), ("a", 1));
    /// assert!(map.is_empty());
    /// ```
    pub fn index_of<Q>(&self, key: &Q) -> Option<Index>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.native.index_of(key)
    }

    /// Returns the number of entries at each distance from their ideal
    /// bucket.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> Vec<usize> {
        self.native.probe_histogram()
    }

    /// Returns statistics about the map's table.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        self.native.debug_stats()
    }

    /// Prints the probe length histogram as a horizontal bar chart.
    #[cfg(all(any(test, feature = "stats"), feature = "std"))]
    pub fn print_probe_histogram(&self) {
        let hist = self.probe_histogram();
        let max = hist.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        println!("probe histogram ({} entries):", self.len());
        for (distance, &count) in hist.iter().enumerate() {
            let width = (count * max_bar).div_ceil(max);
            println!("{distance:>4} | {:<max_bar$} {count}", "█".repeat(width));
        }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Inserts a key-value pair, returning the previous value for an equal
    /// key.
    ///
    /// When an equal key is present, both the value and the stored key are
    /// replaced by the ones passed in.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<i32, &str, SimpleHasher> = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let is_unique = self.native.is_unique();
        self.native.update_value(value, key, is_unique)
    }

    /// Inserts a key-value pair, overwriting any value for an equal key in
    /// place.
    pub fn set(&mut self, key: K, value: V) {
        let is_unique = self.native.is_unique();
        self.native.set_value(value, key, is_unique);
    }

    /// Inserts a key the caller knows is not in the map, returning its
    /// index.
    ///
    /// With [`Verification::Checked`] the key is looked up first.
    /// With [`Verification::Unchecked`] it is not, and inserting a key that
    /// is already present leaves two equal keys in the map.
    ///
    /// # Panics
    ///
    /// With [`Verification::Checked`], panics if the key is present.
    pub fn insert_unique(&mut self, key: K, value: V) -> Index {
        let is_unique = self.native.is_unique();
        let bucket = self
            .native
            .insert_new(key, value, is_unique, self.verification);
        self.native.index_for(bucket)
    }

    /// Returns a mutable reference to the value for `key`, copying a shared
    /// table first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<i32, String, SimpleHasher> = HashMap::new();
    /// map.insert(1, "hello".to_string());
    /// let snapshot = map.clone();
    ///
    /// map.get_mut(&1).unwrap().push_str(" world");
    /// assert_eq!(map.get(&1).unwrap(), "hello world");
    /// assert_eq!(snapshot.get(&1).unwrap(), "hello");
    /// ```
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let is_unique = self.native.is_unique();
        self.native.get_mut(key, is_unique)
    }

    /// Removes `key`, returning its value.
    ///
    /// Removing a missing key never copies a shared table.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key`, returning the stored key and its value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let is_unique = self.native.is_unique();
        self.native.remove(key, is_unique)
    }

    /// Removes the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is stale.
    pub fn remove_at(&mut self, index: Index) -> (K, V) {
        let bucket = self.native.validate(index);
        let is_unique = self.native.is_unique();
        self.native.remove_at(bucket, is_unique)
    }

    /// Makes room for at least `additional` more entries.
    ///
    /// A shared table is only copied if it is too small.
    pub fn reserve(&mut self, additional: usize) {
        let is_unique = self.native.is_unique();
        self.native.reserve(additional, is_unique);
    }

    /// Shrinks the table to the smallest size holding the current entries.
    ///
    /// An empty map releases its table entirely.
    pub fn shrink_to_fit(&mut self) {
        let is_unique = self.native.is_unique();
        self.native.shrink_to_fit(is_unique);
    }

    /// Returns a map with the same keys and each value transformed.
    ///
    /// The result reuses the layout of this map's table, so no key is
    /// hashed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<&str, i32, SimpleHasher> = [("a", 1), ("b", 2)].into_iter().collect();
    /// let doubled = map.map_values(|v| v * 2);
    /// assert_eq!(doubled.get("b"), Some(&4));
    /// ```
    pub fn map_values<T, F>(&self, mut transform: F) -> HashMap<K, T, S>
    where
        F: FnMut(&V) -> T,
        S: Clone,
    {
        let Ok(mapped) = self.try_map_values(|v| Ok::<_, Infallible>(transform(v)));
        mapped
    }

    /// Like [`HashMap::map_values`], stopping at the first error.
    pub fn try_map_values<T, F, E>(&self, transform: F) -> Result<HashMap<K, T, S>, E>
    where
        F: FnMut(&V) -> Result<T, E>,
        S: Clone,
    {
        Ok(HashMap {
            native: self.native.try_map_values(transform)?,
            verification: self.verification,
        })
    }

    /// Returns a map of the entries whose transformed value is `Some`.
    pub fn compact_map_values<T, F>(&self, mut transform: F) -> HashMap<K, T, S>
    where
        F: FnMut(&V) -> Option<T>,
        S: Clone,
    {
        let Ok(native) = self
            .native
            .try_compact_map_values(|v| Ok::<_, Infallible>(transform(v)), self.verification);
        HashMap {
            native,
            verification: self.verification,
        }
    }

    /// Returns a map of the entries satisfying `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: FnMut(&K, &V) -> bool,
        S: Clone,
    {
        Self {
            native: self.native.filter(predicate, self.verification),
            verification: self.verification,
        }
    }

    /// Inserts every pair, resolving keys already present with
    /// `combine(existing, incoming)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map: HashMap<&str, i32, SimpleHasher> = [("x", 1)].into_iter().collect();
    /// map.merge([("x", 2), ("y", 3)], |a, b| a + b);
    /// assert_eq!(map.get("x"), Some(&3));
    /// assert_eq!(map.get("y"), Some(&3));
    /// ```
    pub fn merge<I, F>(&mut self, pairs: I, mut combine: F)
    where
        I: IntoIterator<Item = (K, V)>,
        F: FnMut(&V, V) -> V,
    {
        let Ok(()) = self.try_merge(pairs, |a, b| Ok::<_, Infallible>(combine(a, b)));
    }

    /// Like [`HashMap::merge`], stopping at the first error. Pairs merged
    /// before the error stay in the map.
    pub fn try_merge<I, F, E>(&mut self, pairs: I, combine: F) -> Result<(), E>
    where
        I: IntoIterator<Item = (K, V)>,
        F: FnMut(&V, V) -> Result<V, E>,
    {
        let is_unique = self.native.is_unique();
        self.native.try_merge(pairs, is_unique, combine)
    }
}

impl<K, V, S> HashMap<K, Vec<V>, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Groups `values` by the key computed for each, keeping the order of
    /// values within a group.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Clone, Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let groups: HashMap<&str, Vec<i32>, SimpleHasher> =
    ///     HashMap::grouping([1, 2, 3, 4], |v| if v % 2 == 0 { "even" } else { "odd" });
    /// assert_eq!(groups.get("even"), Some(&vec![2, 4]));
    /// assert_eq!(groups.get("odd"), Some(&vec![1, 3]));
    /// ```
    pub fn grouping<I, F>(values: I, key_for_value: F) -> Self
    where
        I: IntoIterator<Item = V>,
        F: FnMut(&V) -> K,
        S: Default,
    {
        Self::grouping_with_hasher(values, S::default(), key_for_value)
    }

    /// Like [`HashMap::grouping`], with the given hasher builder.
    pub fn grouping_with_hasher<I, F>(values: I, hash_builder: S, mut key_for_value: F) -> Self
    where
        I: IntoIterator<Item = V>,
        F: FnMut(&V) -> K,
    {
        let Ok(native) = NativeMap::try_grouping(values, hash_builder, |v| {
            Ok::<_, Infallible>(key_for_value(v))
        });
        Self {
            native,
            verification: Verification::default(),
        }
    }

    /// Like [`HashMap::grouping`], stopping at the first error.
    pub fn try_grouping<I, F, E>(values: I, key_for_value: F) -> Result<Self, E>
    where
        I: IntoIterator<Item = V>,
        F: FnMut(&V) -> Result<K, E>,
        S: Default,
    {
        Ok(Self {
            native: NativeMap::try_grouping(values, S::default(), key_for_value)?,
            verification: Verification::default(),
        })
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    /// Creates an empty map using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use cow_hash::HashMap;
    /// #
    /// # #[derive(Default)]
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let a: HashMap<i32, String, SimpleHasher> = HashMap::new();
    /// let b: HashMap<i32, String, SimpleHasher> = HashMap::new();
    /// assert!(a.is_empty());
    /// assert!(a.shares_storage_with(&b));
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map able to hold at least `capacity` entries
    /// without growing, using the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        if lower > 0 {
            self.reserve(lower);
        }
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S> IntoIterator for HashMap<K, V, S>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.native.into_cursor()
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

impl<K, V> FusedIterator for Values<'_, K, V> {}
