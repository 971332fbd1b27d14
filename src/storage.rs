//! Backing storage: one reference-counted allocation per table.
//!
//! Every table lives in a single allocation laid out as
//!
//! ```text
//! [ Header | occupancy words | keys: [K; buckets] | values: [V; buckets] ]
//! ```
//!
//! A [`Storage`] is a counted handle to that allocation. Cloning a handle
//! shares the table; the table is only written through a handle for which
//! [`Storage::is_unique`] holds. Tables that have never held anything share a
//! process-wide, zero-capacity singleton that is never written or freed.

use alloc::alloc::alloc;
use alloc::alloc::dealloc;
use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;
use core::ptr::NonNull;
use core::sync::atomic;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::bucket_index::Bucket;
use crate::bucket_index::BucketIndex;
use crate::bucket_index::word_count;
use crate::config::max_load;

/// Size class of a table: the table has `1 << scale` buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Scale(u8);

impl Scale {
    /// The scale of the empty singleton: one bucket, no capacity.
    pub(crate) const EMPTY: Scale = Scale(0);

    const MIN_ALLOCATED: u8 = 1;

    /// The smallest scale able to hold `capacity` entries (at least one).
    pub(crate) fn for_capacity(capacity: usize) -> Scale {
        let capacity = capacity.max(1);
        let mut exponent = Self::MIN_ALLOCATED;
        while max_load(1usize << exponent) < capacity {
            exponent += 1;
            assert!(
                (exponent as u32) < usize::BITS - 1,
                "Allocation Error: capacity overflow"
            );
        }
        Scale(exponent)
    }

    #[inline(always)]
    pub(crate) fn bucket_count(self) -> usize {
        1 << self.0
    }

    #[inline(always)]
    pub(crate) fn capacity(self) -> usize {
        max_load(self.bucket_count())
    }

    #[cfg(any(test, feature = "stats"))]
    #[inline(always)]
    pub(crate) fn exponent(self) -> u8 {
        self.0
    }
}

#[repr(C)]
struct Header {
    ref_count: AtomicUsize,
    capacity: usize,
    count: usize,
    keys_offset: usize,
    values_offset: usize,
    seed: u64,
    age: u32,
    scale: u8,
}

/// Offset of the occupancy words from the start of any allocation.
const WORDS_OFFSET: usize = size_of::<Header>().next_multiple_of(align_of::<u64>());

#[repr(C)]
struct EmptySingleton {
    header: Header,
    word: u64,
}

static EMPTY_SINGLETON: EmptySingleton = EmptySingleton {
    header: Header {
        ref_count: AtomicUsize::new(1),
        capacity: 0,
        count: 0,
        keys_offset: 0,
        values_offset: 0,
        seed: 0,
        age: 0,
        scale: 0,
    },
    word: 0,
};

#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    keys_offset: usize,
    values_offset: usize,
}

impl DataLayout {
    fn new<K, V>(scale: Scale) -> Self {
        let bucket_count = scale.bucket_count();
        let words_layout =
            Layout::array::<u64>(word_count(bucket_count)).expect("allocation size overflow");
        let keys_layout =
            Layout::array::<MaybeUninit<K>>(bucket_count).expect("allocation size overflow");
        let values_layout =
            Layout::array::<MaybeUninit<V>>(bucket_count).expect("allocation size overflow");

        let (layout, words_offset) = Layout::new::<Header>()
            .extend(words_layout)
            .expect("allocation size overflow");
        debug_assert_eq!(words_offset, WORDS_OFFSET);
        let (layout, keys_offset) = layout
            .extend(keys_layout)
            .expect("allocation size overflow");
        let (layout, values_offset) = layout
            .extend(values_layout)
            .expect("allocation size overflow");

        DataLayout {
            layout: layout.pad_to_align(),
            keys_offset,
            values_offset,
        }
    }
}

/// Number of tables allocated so far by this process.
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

/// Where a new table's seed and age come from.
#[derive(Clone, Copy)]
enum Lineage {
    /// An unrelated table: fresh seed, fresh age.
    Fresh,
    /// Replaces a table of the given age: fresh seed, next age.
    Successor(u32),
    /// Receives a verbatim copy: same seed and age.
    Copy(u64, u32),
}

/// Mixes an allocation address and the allocation serial into a per-table
/// hash seed. Returns the seed and the serial.
fn fresh_seed(address: usize, scale: Scale) -> (u64, u32) {
    let serial = ALLOCATIONS.fetch_add(1, Ordering::Relaxed) as u64;
    let x = (address as u64)
        ^ ((scale.0 as u64) << 56)
        ^ serial.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ 0x243f_6a88_85a3_08d3;
    let full = x as u128 * 0x1319_8a2e_0370_7345_u128;
    ((full as u64) ^ ((full >> 64) as u64), serial as u32)
}

/// A counted handle to a table allocation.
pub(crate) struct Storage<K, V> {
    header: NonNull<Header>,
    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The reference count is atomic and tables are only written through a
// unique handle, so handles may move between and be shared by threads
// whenever the keys and values themselves may.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Storage<K, V> {}
// SAFETY: See above.
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Storage<K, V> {}

impl<K, V> Clone for Storage<K, V> {
    fn clone(&self) -> Self {
        if !self.is_singleton() {
            let previous = self.header().ref_count.fetch_add(1, Ordering::Relaxed);
            assert!(previous < isize::MAX as usize, "reference count overflow");
        }

        Self {
            header: self.header,
            _phantom: PhantomData,
        }
    }
}

impl<K, V> Drop for Storage<K, V> {
    fn drop(&mut self) {
        if self.is_singleton() {
            return;
        }
        if self.header().ref_count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        let layout = DataLayout::new::<K, V>(self.scale());
        // SAFETY: This was the last handle, so nothing else can observe the
        // allocation. Exactly the occupied slots are initialized.
        unsafe {
            if core::mem::needs_drop::<K>() || core::mem::needs_drop::<V>() {
                let keys = self.keys_ptr();
                let values = self.values_ptr();
                for bucket in self.bucket_index().occupied_buckets() {
                    (*keys.add(bucket.offset())).assume_init_drop();
                    (*values.add(bucket.offset())).assume_init_drop();
                }
            }
            dealloc(self.header.as_ptr().cast(), layout.layout);
        }
    }
}

impl<K, V> Storage<K, V> {
    /// A handle to the shared empty singleton.
    #[inline]
    pub(crate) fn empty() -> Self {
        Self {
            header: NonNull::from(&EMPTY_SINGLETON).cast(),
            _phantom: PhantomData,
        }
    }

    /// A fresh table able to hold at least `capacity` entries.
    pub(crate) fn allocate(capacity: usize) -> Self {
        Self::allocate_scale(Scale::for_capacity(capacity))
    }

    /// A fresh, empty table of the given scale.
    pub(crate) fn allocate_scale(scale: Scale) -> Self {
        if scale == Scale::EMPTY {
            return Self::empty();
        }
        Self::allocate_with(scale, Lineage::Fresh)
    }

    /// A fresh, empty table of the given scale that replaces `previous`.
    ///
    /// The new table's age follows `previous`'s, so indices into `previous`
    /// are stale in it.
    pub(crate) fn allocate_after(previous: &Self, scale: Scale) -> Self {
        if scale == Scale::EMPTY {
            return Self::empty();
        }
        Self::allocate_with(scale, Lineage::Successor(previous.age()))
    }

    /// A fresh table able to hold `capacity` entries, meant to receive the
    /// contents of `original`.
    ///
    /// Returns `true` alongside the table when its scale differs from the
    /// original's, in which case every entry must be rehashed and the table
    /// is aged past the original. Otherwise the table shares the original's
    /// seed and age, so bucket numbers carry over unchanged.
    pub(crate) fn reallocate(original: &Self, capacity: usize) -> (Self, bool) {
        let scale = Scale::for_capacity(capacity);
        let rehash = scale != original.scale();
        let lineage = if rehash {
            Lineage::Successor(original.age())
        } else {
            Lineage::Copy(original.seed(), original.age())
        };
        (Self::allocate_with(scale, lineage), rehash)
    }

    /// A fresh, empty table with the scale, seed and age of `original`, so
    /// that entries copied bucket for bucket stay reachable.
    pub(crate) fn allocate_like<K2, V2>(original: &Storage<K2, V2>) -> Self {
        let scale = original.scale();
        if scale == Scale::EMPTY {
            return Self::empty();
        }
        Self::allocate_with(scale, Lineage::Copy(original.seed(), original.age()))
    }

    fn allocate_with(scale: Scale, lineage: Lineage) -> Self {
        debug_assert!(scale != Scale::EMPTY);
        let layout = DataLayout::new::<K, V>(scale);

        // SAFETY: The layout starts with the header, so it has a non-zero
        // size. Allocation failure is handled before the pointer is used, and
        // the header and words are fully initialized before the handle is
        // returned.
        unsafe {
            let raw_alloc = alloc(layout.layout);
            if raw_alloc.is_null() {
                handle_alloc_error(layout.layout);
            }

            let (seed, age) = match lineage {
                Lineage::Fresh => fresh_seed(raw_alloc as usize, scale),
                Lineage::Successor(previous) => {
                    (fresh_seed(raw_alloc as usize, scale).0, previous.wrapping_add(1))
                }
                Lineage::Copy(seed, age) => (seed, age),
            };
            raw_alloc.cast::<Header>().write(Header {
                ref_count: AtomicUsize::new(1),
                capacity: scale.capacity(),
                count: 0,
                keys_offset: layout.keys_offset,
                values_offset: layout.values_offset,
                seed,
                age,
                scale: scale.0,
            });
            ptr::write_bytes(
                raw_alloc.add(WORDS_OFFSET).cast::<u64>(),
                0,
                word_count(scale.bucket_count()),
            );

            Self {
                header: NonNull::new_unchecked(raw_alloc.cast()),
                _phantom: PhantomData,
            }
        }
    }

    #[inline(always)]
    fn header(&self) -> &Header {
        // SAFETY: The header outlives every handle to it.
        unsafe { self.header.as_ref() }
    }

    /// Returns `true` if this handle refers to the empty singleton.
    #[inline]
    pub(crate) fn is_singleton(&self) -> bool {
        ptr::eq(
            self.header.as_ptr().cast_const(),
            ptr::addr_of!(EMPTY_SINGLETON).cast::<Header>(),
        )
    }

    /// Returns `true` if no other handle shares this table, so it may be
    /// written in place.
    #[inline]
    pub(crate) fn is_unique(&self) -> bool {
        !self.is_singleton() && self.header().ref_count.load(Ordering::Acquire) == 1
    }

    /// Returns `true` if both handles refer to the same table.
    #[inline]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        self.header == other.header
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.header().capacity
    }

    #[inline(always)]
    pub(crate) fn count(&self) -> usize {
        self.header().count
    }

    #[inline(always)]
    pub(crate) fn seed(&self) -> u64 {
        self.header().seed
    }

    #[inline(always)]
    pub(crate) fn age(&self) -> u32 {
        self.header().age
    }

    #[inline(always)]
    pub(crate) fn scale(&self) -> Scale {
        Scale(self.header().scale)
    }

    #[inline(always)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.scale().bucket_count()
    }

    /// Bytes held by this table's allocation.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn allocated_bytes(&self) -> usize {
        if self.is_singleton() {
            0
        } else {
            DataLayout::new::<K, V>(self.scale()).layout.size()
        }
    }

    #[inline(always)]
    pub(crate) fn set_count(&mut self, count: usize) {
        debug_assert!(self.is_unique());
        debug_assert!(count <= self.capacity());
        // SAFETY: The handle is unique, so no other handle reads the count.
        unsafe { ptr::addr_of_mut!((*self.header.as_ptr()).count).write(count) }
    }

    /// Marks every outstanding index into this table as stale.
    #[inline]
    pub(crate) fn bump_age(&mut self) {
        debug_assert!(self.is_unique());
        // SAFETY: The handle is unique, so no other handle reads the age.
        unsafe {
            let age = ptr::addr_of_mut!((*self.header.as_ptr()).age);
            age.write(age.read().wrapping_add(1));
        }
    }

    #[inline(always)]
    fn words_ptr(&self) -> *mut u64 {
        // SAFETY: Every allocation, the singleton included, has its words
        // right after the header.
        unsafe { self.header.as_ptr().cast::<u8>().add(WORDS_OFFSET).cast() }
    }

    #[inline(always)]
    fn keys_ptr(&self) -> *mut MaybeUninit<K> {
        self.header
            .as_ptr()
            .cast::<u8>()
            .wrapping_add(self.header().keys_offset)
            .cast()
    }

    #[inline(always)]
    fn values_ptr(&self) -> *mut MaybeUninit<V> {
        self.header
            .as_ptr()
            .cast::<u8>()
            .wrapping_add(self.header().values_offset)
            .cast()
    }

    /// A read-only view of the occupancy index.
    #[inline]
    pub(crate) fn bucket_index(&self) -> BucketIndex<&[u64]> {
        let bucket_count = self.bucket_count();
        // SAFETY: The words are initialized for the table's lifetime and only
        // written through a unique handle, which cannot coexist with this
        // borrow.
        let words =
            unsafe { core::slice::from_raw_parts(self.words_ptr(), word_count(bucket_count)) };
        BucketIndex::new(words, bucket_count)
    }

    /// A writable view of the occupancy index.
    #[inline]
    pub(crate) fn bucket_index_mut(&mut self) -> BucketIndex<&mut [u64]> {
        debug_assert!(self.is_unique());
        let bucket_count = self.bucket_count();
        // SAFETY: The handle is unique and borrowed mutably, so nothing else
        // reads or writes the words while the view lives.
        let words = unsafe {
            core::slice::from_raw_parts_mut(self.words_ptr(), word_count(bucket_count))
        };
        BucketIndex::new(words, bucket_count)
    }

    /// Splits a unique table into its occupancy index and its slots.
    pub(crate) fn split_mut(&mut self) -> (BucketIndex<&mut [u64]>, Slots<'_, K, V>) {
        let slots = Slots {
            keys: self.keys_ptr(),
            values: self.values_ptr(),
            _phantom: PhantomData,
        };
        let bucket_count = self.bucket_count();
        debug_assert!(self.is_unique());
        // SAFETY: As in `bucket_index_mut`. The slot arrays do not overlap the
        // words.
        let words = unsafe {
            core::slice::from_raw_parts_mut(self.words_ptr(), word_count(bucket_count))
        };
        (BucketIndex::new(words, bucket_count), slots)
    }

    /// Returns the key stored in `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied in this table.
    #[inline(always)]
    pub(crate) unsafe fn key_at(&self, bucket: Bucket) -> &K {
        debug_assert!(self.bucket_index().is_valid(bucket));
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { (*self.keys_ptr().add(bucket.offset())).assume_init_ref() }
    }

    /// Returns the value stored in `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied in this table.
    #[inline(always)]
    pub(crate) unsafe fn value_at(&self, bucket: Bucket) -> &V {
        debug_assert!(self.bucket_index().is_valid(bucket));
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { (*self.values_ptr().add(bucket.offset())).assume_init_ref() }
    }

    /// Returns the value stored in `bucket` for writing.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied in this table, and the handle unique.
    #[inline(always)]
    pub(crate) unsafe fn value_at_mut(&mut self, bucket: Bucket) -> &mut V {
        debug_assert!(self.is_unique());
        debug_assert!(self.bucket_index().is_valid(bucket));
        // SAFETY: Caller guarantees the slot is initialized and unshared.
        unsafe { (*self.values_ptr().add(bucket.offset())).assume_init_mut() }
    }

    /// Writes a key and value into the slots of `bucket` without touching
    /// the occupancy index or the count.
    ///
    /// # Safety
    ///
    /// `bucket` must be within the table and its slots uninitialized, and
    /// the handle unique.
    #[inline(always)]
    pub(crate) unsafe fn initialize_entry(&mut self, bucket: Bucket, key: K, value: V) {
        debug_assert!(self.is_unique());
        debug_assert!(bucket.offset() < self.bucket_count());
        // SAFETY: Caller guarantees the slots are in bounds and vacant.
        unsafe {
            (*self.keys_ptr().add(bucket.offset())).write(key);
            (*self.values_ptr().add(bucket.offset())).write(value);
        }
    }

    /// Moves the key and value out of `bucket`, leaving its slots
    /// uninitialized. The occupancy index and count are not touched.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied, the handle unique, and the caller must mark
    /// the bucket unoccupied (or refill it) before the table is used again.
    #[inline(always)]
    pub(crate) unsafe fn take_entry(&mut self, bucket: Bucket) -> (K, V) {
        debug_assert!(self.is_unique());
        debug_assert!(self.bucket_index().is_valid(bucket));
        // SAFETY: Caller guarantees the slots are initialized and will be
        // treated as vacant afterwards.
        unsafe {
            (
                (*self.keys_ptr().add(bucket.offset())).assume_init_read(),
                (*self.values_ptr().add(bucket.offset())).assume_init_read(),
            )
        }
    }

    /// Replaces the key stored in `bucket`, returning the previous one.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied and the handle unique.
    #[inline(always)]
    pub(crate) unsafe fn replace_key(&mut self, bucket: Bucket, key: K) -> K {
        debug_assert!(self.is_unique());
        debug_assert!(self.bucket_index().is_valid(bucket));
        // SAFETY: Caller guarantees the slot is initialized and unshared.
        unsafe { ptr::replace(self.keys_ptr().add(bucket.offset()).cast::<K>(), key) }
    }

    /// Drops every entry in place, keeping the allocation. Indices into the
    /// table become stale.
    pub(crate) fn clear(&mut self) {
        self.bump_age();
        if self.count() == 0 {
            return;
        }
        if !core::mem::needs_drop::<K>() && !core::mem::needs_drop::<V>() {
            self.bucket_index_mut().clear();
            self.set_count(0);
            return;
        }

        let mut offset = 0;
        loop {
            let Some(bucket) = self.bucket_index().next_occupied(offset) else {
                break;
            };
            self.bucket_index_mut().remove(bucket);
            let count = self.count();
            self.set_count(count - 1);
            // SAFETY: The bucket was occupied and is now marked vacant.
            drop(unsafe { self.take_entry_unchecked(bucket) });
            offset = bucket.offset() + 1;
        }
        debug_assert_eq!(self.count(), 0);
    }

    /// `take_entry` for a bucket the caller has already marked vacant.
    ///
    /// # Safety
    ///
    /// The slots of `bucket` must hold an entry that nothing else will read
    /// or drop.
    #[inline(always)]
    pub(crate) unsafe fn take_entry_unchecked(&mut self, bucket: Bucket) -> (K, V) {
        debug_assert!(self.is_unique());
        // SAFETY: Caller guarantees the slots are initialized and abandoned.
        unsafe {
            (
                (*self.keys_ptr().add(bucket.offset())).assume_init_read(),
                (*self.values_ptr().add(bucket.offset())).assume_init_read(),
            )
        }
    }
}

/// Raw access to the slots of a unique table, split from its occupancy
/// index.
pub(crate) struct Slots<'a, K, V> {
    keys: *mut MaybeUninit<K>,
    values: *mut MaybeUninit<V>,
    _phantom: PhantomData<&'a mut (K, V)>,
}

impl<K, V> Slots<'_, K, V> {
    /// Returns the key stored in `bucket`.
    ///
    /// # Safety
    ///
    /// The slots of `bucket` must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn key(&self, bucket: Bucket) -> &K {
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { (*self.keys.add(bucket.offset())).assume_init_ref() }
    }

    /// Moves the entry in `from` to `to` without dropping anything.
    ///
    /// # Safety
    ///
    /// The slots of `from` must be initialized and those of `to` vacant.
    /// Afterwards `from` is vacant.
    #[inline(always)]
    pub(crate) unsafe fn relocate(&mut self, from: Bucket, to: Bucket) {
        debug_assert!(from != to);
        // SAFETY: Caller guarantees both buckets are in bounds; distinct
        // buckets never overlap.
        unsafe {
            ptr::copy_nonoverlapping(self.keys.add(from.offset()), self.keys.add(to.offset()), 1);
            ptr::copy_nonoverlapping(
                self.values.add(from.offset()),
                self.values.add(to.offset()),
                1,
            );
        }
    }
}
