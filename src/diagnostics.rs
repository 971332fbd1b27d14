//! Fatal diagnostics for broken map contracts.
//!
//! Both reporters panic. Neither condition is recoverable: a stale index may
//! name a bucket that now holds a different entry, and a key type whose
//! `Hash` disagrees with its `Eq` may already have misplaced every entry.

/// Reports an index that does not name a live entry of the current
/// allocation.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn invalid_index() -> ! {
    panic!("attempted to access a HashMap entry through an invalid index")
}

/// Reports two equal keys of type `K` in one map.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn duplicate_keys<K: ?Sized>() -> ! {
    panic!(
        "duplicate keys of type '{}' were found in a HashMap. This usually means either that the \
         type violates Hash's requirements, or that members of such a map were mutated after \
         insertion.",
        core::any::type_name::<K>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "invalid index")]
    fn invalid_index_panics() {
        invalid_index();
    }

    #[test]
    #[should_panic(expected = "duplicate keys of type 'alloc::string::String'")]
    fn duplicate_keys_names_the_key_type() {
        duplicate_keys::<alloc::string::String>();
    }
}
