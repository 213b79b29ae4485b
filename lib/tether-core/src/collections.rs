//! Collection aliases.

/// A fast, non-cryptographic hash builder.
pub(crate) type FastBuildHasher = foldhash::quality::RandomState;

/// An insertion-ordered hash map using [`FastBuildHasher`].
pub(crate) type FastIndexMap<K, V> = indexmap::IndexMap<K, V, FastBuildHasher>;
