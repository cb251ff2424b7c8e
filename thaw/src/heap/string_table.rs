use {crate::object::ObjectRef, std::collections::HashMap};

/// Table of canonical internalized strings, keyed by contents.
#[derive(Debug, Default)]
pub struct StringTable
{
    entries: HashMap<Vec<u8>, ObjectRef>,
}

impl StringTable
{
    /// Create an empty string table.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Find the canonical string with the given contents.
    pub fn lookup(&self, bytes: &[u8]) -> Option<ObjectRef>
    {
        self.entries.get(bytes).copied()
    }

    /// Make `string` the canonical string with the given contents.
    pub (super) fn insert(&mut self, bytes: Vec<u8>, string: ObjectRef)
    {
        self.entries.insert(bytes, string);
    }

    /// The number of canonical strings.
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether there are no canonical strings.
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

/// Compute the hash of a string with the given seed.
///
/// This is Jenkins' one-at-a-time hash, with the seed folded into
/// the initial state. The result is never zero, so that a computed
/// hash can be told apart from a cleared hash field.
pub fn string_hash(seed: u64, bytes: &[u8]) -> u32
{
    let mut hash = (seed ^ seed >> 32) as u32;
    for &byte in bytes {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash &= (1 << 30) - 1;
    if hash == 0 { 27 } else { hash }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn seed_changes_hash()
    {
        assert_ne!(string_hash(0, b"hello"), string_hash(1, b"hello"));
        assert_eq!(string_hash(7, b"hello"), string_hash(7, b"hello"));
    }

    proptest!
    {
        #[test]
        fn hash_is_never_zero(seed: u64, bytes: Vec<u8>)
        {
            let hash = string_hash(seed, &bytes);
            assert_ne!(hash, 0);
            assert!(hash < 1 << 30);
        }
    }
}
