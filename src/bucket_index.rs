//! Occupancy index for an open-addressed table.
//!
//! A [`BucketIndex`] is a bitmap over a power-of-two number of buckets. It
//! knows nothing about keys or values: it computes ideal buckets from hashes,
//! walks the linear probe sequence with wrap-around, and tracks which buckets
//! are occupied. Deletion needs to move entries to keep probe chains intact,
//! so it borrows that ability from the owner of the slots through a
//! [`RelocationDelegate`].

use core::fmt::Debug;

const WORD_BITS: usize = u64::BITS as usize;

/// Number of bitmap words needed to track `bucket_count` buckets.
#[inline(always)]
pub(crate) fn word_count(bucket_count: usize) -> usize {
    bucket_count.div_ceil(WORD_BITS)
}

/// A slot number in one particular table.
///
/// Buckets are only meaningful for the allocation they were obtained from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    offset: usize,
}

impl Bucket {
    #[inline(always)]
    pub(crate) const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// The position of this bucket in the table.
    #[inline(always)]
    pub fn offset(self) -> usize {
        self.offset
    }
}

/// Operations the index needs from the owner of the slots while deleting.
///
/// Deleting from a linear-probing table leaves a hole that may cut later
/// entries off from their ideal bucket. The index repairs this by asking for
/// the hash of the entries following the hole and moving those that belong
/// before it.
pub trait RelocationDelegate {
    /// Returns the hash of the entry stored in the occupied `bucket`.
    fn hash_of_entry_at(&self, bucket: Bucket) -> u64;

    /// Moves the entry in the occupied `from` into the vacant `to`.
    fn relocate_entry(&mut self, from: Bucket, to: Bucket);
}

/// Occupancy bitmap plus probe arithmetic for a table of `bucket_count`
/// buckets.
///
/// `W` is `&[u64]` for read-only views and `&mut [u64]` for views that may
/// insert or delete.
pub struct BucketIndex<W> {
    words: W,
    bucket_mask: usize,
}

impl<W> Debug for BucketIndex<W>
where
    W: AsRef<[u64]>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BucketIndex")
            .field("bucket_count", &self.bucket_count())
            .field("occupied", &self.occupied_count())
            .finish()
    }
}

impl<W> BucketIndex<W>
where
    W: AsRef<[u64]>,
{
    /// Wraps `words` as the bitmap of a table with `bucket_count` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is not a power of two or `words` has the
    /// wrong length.
    pub fn new(words: W, bucket_count: usize) -> Self {
        assert!(bucket_count.is_power_of_two());
        assert_eq!(words.as_ref().len(), word_count(bucket_count));
        Self {
            words,
            bucket_mask: bucket_count - 1,
        }
    }

    /// Number of buckets in the table.
    #[inline(always)]
    pub fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    /// The first bucket probed for an entry with this hash.
    #[inline(always)]
    pub fn ideal_bucket(&self, hash: u64) -> Bucket {
        Bucket::new(hash as usize & self.bucket_mask)
    }

    /// The bucket probed after `bucket`, wrapping past the end of the table.
    #[inline(always)]
    pub fn next_probe(&self, bucket: Bucket) -> Bucket {
        Bucket::new((bucket.offset + 1) & self.bucket_mask)
    }

    #[inline(always)]
    fn previous(&self, bucket: Bucket) -> Bucket {
        Bucket::new(bucket.offset.wrapping_sub(1) & self.bucket_mask)
    }

    /// Returns `true` if `bucket` holds an entry.
    #[inline(always)]
    pub fn is_occupied(&self, bucket: Bucket) -> bool {
        debug_assert!(bucket.offset <= self.bucket_mask);
        let word = self.words.as_ref()[bucket.offset / WORD_BITS];
        word & (1u64 << (bucket.offset % WORD_BITS)) != 0
    }

    /// Returns `true` if `bucket` is inside the table and holds an entry.
    #[inline]
    pub fn is_valid(&self, bucket: Bucket) -> bool {
        bucket.offset <= self.bucket_mask && self.is_occupied(bucket)
    }

    /// Number of occupied buckets.
    pub fn occupied_count(&self) -> usize {
        self.words
            .as_ref()
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// The first occupied bucket at or after `offset`, if any.
    pub fn next_occupied(&self, offset: usize) -> Option<Bucket> {
        if offset > self.bucket_mask {
            return None;
        }

        let words = self.words.as_ref();
        let mut word_index = offset / WORD_BITS;
        let mut word = words[word_index] & (!0u64 << (offset % WORD_BITS));
        loop {
            if word != 0 {
                let offset = word_index * WORD_BITS + word.trailing_zeros() as usize;
                return Some(Bucket::new(offset));
            }
            word_index += 1;
            if word_index == words.len() {
                return None;
            }
            word = words[word_index];
        }
    }

    /// Iterates over the occupied buckets in increasing bucket order.
    pub fn occupied_buckets(&self) -> OccupiedBuckets<'_> {
        let words = self.words.as_ref();
        OccupiedBuckets {
            words,
            word_index: 0,
            current: words.first().copied().unwrap_or(0),
        }
    }

    /// Walks backwards from `bucket` to the nearest unoccupied bucket.
    fn previous_hole(&self, bucket: Bucket) -> Bucket {
        let mut bucket = self.previous(bucket);
        while self.is_occupied(bucket) {
            bucket = self.previous(bucket);
        }
        bucket
    }
}

impl<W> BucketIndex<W>
where
    W: AsRef<[u64]> + AsMut<[u64]>,
{
    /// Marks the unoccupied `bucket` as occupied.
    #[inline(always)]
    pub fn insert(&mut self, bucket: Bucket) {
        debug_assert!(!self.is_occupied(bucket));
        self.words.as_mut()[bucket.offset / WORD_BITS] |= 1u64 << (bucket.offset % WORD_BITS);
    }

    /// Marks the occupied `bucket` as unoccupied without repairing probe
    /// chains.
    #[inline(always)]
    pub fn remove(&mut self, bucket: Bucket) {
        debug_assert!(self.is_occupied(bucket));
        self.words.as_mut()[bucket.offset / WORD_BITS] &= !(1u64 << (bucket.offset % WORD_BITS));
    }

    /// Claims the first free bucket in the probe sequence of `hash`.
    ///
    /// The caller asserts that no entry equal to the one being inserted is
    /// present, and that the table has at least one free bucket.
    #[inline]
    pub fn insert_new(&mut self, hash: u64) -> Bucket {
        let mut bucket = self.ideal_bucket(hash);
        while self.is_occupied(bucket) {
            bucket = self.next_probe(bucket);
        }
        self.insert(bucket);
        bucket
    }

    /// Deletes the entry at the occupied `bucket`.
    ///
    /// The entry's contents must already have been moved out. Entries later
    /// in the same run of occupied buckets are shifted back through
    /// `delegate` when their ideal bucket lies at or before the hole, so
    /// every remaining entry stays reachable from its ideal bucket.
    pub fn delete<D>(&mut self, bucket: Bucket, delegate: &mut D)
    where
        D: RelocationDelegate,
    {
        debug_assert!(self.is_occupied(bucket));

        // The run containing `bucket` starts right after the previous hole.
        let start = self.next_probe(self.previous_hole(bucket));
        let mut candidate = self.next_probe(bucket);

        // Whatever bucket is the hole when this goes out of scope is vacant,
        // including when the delegate panics part way through.
        let mut hole = Hole {
            index: self,
            bucket,
        };

        while hole.index.is_occupied(candidate) {
            let ideal = hole
                .index
                .ideal_bucket(delegate.hash_of_entry_at(candidate));

            // [start, hole] may wrap around the end of the table.
            let after_start = ideal.offset >= start.offset;
            let before_hole = ideal.offset <= hole.bucket.offset;
            let belongs_before_hole = if start.offset <= hole.bucket.offset {
                after_start && before_hole
            } else {
                after_start || before_hole
            };

            if belongs_before_hole {
                delegate.relocate_entry(candidate, hole.bucket);
                hole.bucket = candidate;
            }
            candidate = hole.index.next_probe(candidate);
        }
    }

    /// Copies the occupancy of `other`, which must have the same bucket
    /// count.
    pub fn copy_contents_from<O>(&mut self, other: &BucketIndex<O>)
    where
        O: AsRef<[u64]>,
    {
        assert_eq!(self.bucket_mask, other.bucket_mask);
        self.words.as_mut().copy_from_slice(other.words.as_ref());
    }

    /// Marks every bucket unoccupied.
    pub fn clear(&mut self) {
        self.words.as_mut().fill(0);
    }

    /// Marks `bucket` and every bucket after it unoccupied.
    pub fn clear_from(&mut self, bucket: Bucket) {
        let words = self.words.as_mut();
        let first = bucket.offset / WORD_BITS;
        words[first] &= !(!0u64 << (bucket.offset % WORD_BITS));
        words[first + 1..].fill(0);
    }
}

struct Hole<'i, W>
where
    W: AsRef<[u64]> + AsMut<[u64]>,
{
    index: &'i mut BucketIndex<W>,
    bucket: Bucket,
}

impl<W> Drop for Hole<'_, W>
where
    W: AsRef<[u64]> + AsMut<[u64]>,
{
    fn drop(&mut self) {
        self.index.remove(self.bucket);
    }
}

impl<'a> BucketIndex<&'a [u64]> {
    /// Like [`BucketIndex::occupied_buckets`], but borrowing the words for
    /// as long as the view itself does.
    pub fn into_occupied_buckets(self) -> OccupiedBuckets<'a> {
        OccupiedBuckets {
            words: self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Iterator over the occupied buckets of a [`BucketIndex`], in bucket
/// order.
#[derive(Clone)]
pub struct OccupiedBuckets<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for OccupiedBuckets<'_> {
    type Item = Bucket;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current == 0 {
            self.word_index += 1;
            if self.word_index >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_index];
        }

        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        Some(Bucket::new(self.word_index * WORD_BITS + bit))
    }
}
