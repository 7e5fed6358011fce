use std::{
    hash::{BuildHasher as _, Hash, Hasher as _},
    sync::LazyLock,
};

/// [`BuildHasher`][std::hash::BuildHasher] for the fast, non-cryptographic hasher used throughout the crate.
///
/// Currently, [`foldhash`][foldhash] is used as the underlying implementation.
///
/// [foldhash]: http://github.com/orlp/foldhash
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A hash map based on `hashbrown` ([`HashMap`][hashbrown::HashMap]) using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

// Single global hasher state so that `hash_single_fast` is consistent for the lifetime of the process.
static BUILD_HASHER: LazyLock<FastBuildHasher> = LazyLock::new(FastBuildHasher::default);

/// Hashes a single value, returning the 64-bit hash.
///
/// Hashes are consistent within the same process, but not across runs.
#[inline]
pub fn hash_single_fast<H: Hash>(value: H) -> u64 {
    let mut hasher = BUILD_HASHER.build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}
