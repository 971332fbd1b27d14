//! Build and runtime configuration.

cfg_if::cfg_if! {
    if #[cfg(feature = "load-factor-eighty-seven-point-five")] {
        const MAX_LOAD_NUMERATOR: usize = 7;
        const MAX_LOAD_DENOMINATOR: usize = 8;
    } else {
        const MAX_LOAD_NUMERATOR: usize = 3;
        const MAX_LOAD_DENOMINATOR: usize = 4;
    }
}

/// Number of live entries a table of `bucket_count` buckets may hold.
///
/// Always strictly less than `bucket_count`, so probing for a free bucket
/// terminates.
#[inline(always)]
pub(crate) fn max_load(bucket_count: usize) -> usize {
    ((bucket_count as u128 * MAX_LOAD_NUMERATOR as u128) / MAX_LOAD_DENOMINATOR as u128) as usize
}

/// Controls whether [`HashMap::insert_unique`] verifies that the key is
/// actually absent before inserting it.
///
/// The checked path performs a full lookup and panics on a duplicate key.
/// The unchecked path trusts the caller and claims the first free bucket in
/// the key's probe sequence. An unchecked insert of a key that is already
/// present leaves the map holding two equal keys.
///
/// The default is [`Verification::Checked`] in builds with debug
/// assertions or with the `verify-unique-inserts` feature, and
/// [`Verification::Unchecked`] otherwise.
///
/// [`HashMap::insert_unique`]: crate::HashMap::insert_unique
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verification {
    /// Look the key up first and panic if it is present.
    Checked,
    /// Insert without looking for an existing equal key.
    Unchecked,
}

impl Default for Verification {
    fn default() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(any(debug_assertions, feature = "verify-unique-inserts"))] {
                Verification::Checked
            } else {
                Verification::Unchecked
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = std::hash::RandomState;
    }
}
