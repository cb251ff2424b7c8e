//! Hash tables keyed by strings.
//!
//! Entries are placed by the hash of their key,
//! and the hash depends on the heap's hash seed.
//! Tables restored from a snapshot therefore need to be rebuilt
//! before they can be used; see [`rehash`].

use {
    super::{ObjectKind, ObjectRef, Reference, layout::{hash_table, string}},
    crate::{FormatError, Result, heap::{Heap, string_hash}},
};

/// Capacity of the table, which must be a power of two.
fn capacity(heap: &Heap, table: ObjectRef) -> Result<usize>
{
    let capacity = heap.read_smi_field(table, hash_table::CAPACITY)?;
    match usize::try_from(capacity) {
        Ok(capacity) if capacity.is_power_of_two() => Ok(capacity),
        _ => Err(malformed(table, "capacity is not a power of two")),
    }
}

fn malformed(table: ObjectRef, reason: &'static str) -> crate::Error
{
    FormatError::MalformedObject{object: table.address(), reason}.into()
}

/// The string that a key word refers to.
fn key_string(heap: &Heap, table: ObjectRef, key: u64) -> Result<ObjectRef>
{
    match Reference::from_word(key) {
        Some(Reference::Strong(object)) if heap.kind_of(object)?.is_string() =>
            Ok(object),
        _ => Err(malformed(table, "key is not a string")),
    }
}

/// Rebuild a table with the heap's current hash seed.
///
/// Every entry is removed and inserted again.
/// The hash field of every key is updated as a side effect.
pub fn rehash(heap: &mut Heap, table: ObjectRef) -> Result<()>
{
    if heap.kind_of(table)? != ObjectKind::HashTable {
        return Err(malformed(table, "not a hash table"));
    }

    let capacity = capacity(heap, table)?;

    let mut entries = Vec::new();
    for entry in 0 .. capacity {
        let key = heap.read_word(table.field(hash_table::key(entry)))?;
        if key == 0 {
            continue;
        }
        let value = heap.read_word(table.field(hash_table::value(entry)))?;
        entries.push((key, value));
    }

    for entry in 0 .. capacity {
        heap.write_word(table.field(hash_table::key(entry)), 0)?;
        heap.write_word(table.field(hash_table::value(entry)), 0)?;
    }

    for (key, value) in entries {
        let string = key_string(heap, table, key)?;
        let hash = string_hash(heap.hash_seed(), heap.string_bytes(string)?);
        heap.write_word(string.field(string::HASH_FIELD), string::hash_field(hash))?;

        let entry = probe(heap, table, capacity, hash, |word| word == 0)?
            .ok_or_else(|| malformed(table, "table is full"))?;

        let key_slot = table.field(hash_table::key(entry));
        let value_slot = table.field(hash_table::value(entry));
        heap.write_word(key_slot, key)?;
        heap.write_word(value_slot, value)?;

        if !heap.in_young_generation(table.address()) {
            for (slot, word) in [(key_slot, key), (value_slot, value)] {
                let target = Reference::from_word(word).and_then(Reference::object);
                if target.map_or(false, |t| heap.in_young_generation(t.address())) {
                    heap.record_write(table, slot);
                }
            }
        }
    }

    Ok(())
}

/// Find the value associated with a key.
///
/// Returns the raw value word, or [`None`] if there is no such key.
pub fn lookup(heap: &Heap, table: ObjectRef, key: &[u8]) -> Result<Option<u64>>
{
    let capacity = capacity(heap, table)?;
    let hash = string_hash(heap.hash_seed(), key);
    let found = probe(heap, table, capacity, hash, |word| {
        word == 0 || key_string(heap, table, word)
            .and_then(|string| heap.string_bytes(string))
            .map_or(false, |bytes| bytes == key)
    })?;
    match found {
        Some(entry) => {
            let key_word = heap.read_word(table.field(hash_table::key(entry)))?;
            if key_word == 0 {
                return Ok(None);
            }
            heap.read_word(table.field(hash_table::value(entry))).map(Some)
        },
        None => Ok(None),
    }
}

/// Linear probing starting at the entry for `hash`.
///
/// Returns the first entry whose key word satisfies `stop`.
fn probe<F>(heap: &Heap, table: ObjectRef, capacity: usize, hash: u32, mut stop: F)
    -> Result<Option<usize>>
    where F: FnMut(u64) -> bool
{
    let mask = capacity - 1;
    let mut entry = hash as usize & mask;
    for _ in 0 .. capacity {
        let key = heap.read_word(table.field(hash_table::key(entry)))?;
        if stop(key) {
            return Ok(Some(entry));
        }
        entry = (entry + 1) & mask;
    }
    Ok(None)
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::{heap::Space, object::smi_to_word}, proptest::proptest};

    fn build_table(heap: &mut Heap, capacity: usize, keys: &[&[u8]])
        -> Result<ObjectRef>
    {
        let table = heap.new_hash_table(Space::Old, capacity)?;
        // Fill entries front to back, ignoring hashes,
        // like a table built with a different seed.
        for (entry, key) in keys.iter().enumerate() {
            let string = heap.new_string(Space::Old, key, ObjectKind::InternalizedString)?;
            let key_word = Reference::Strong(string).to_word();
            heap.write_word(table.field(hash_table::key(entry)), key_word)?;
            heap.write_word(table.field(hash_table::value(entry)),
                            smi_to_word(entry as i64))?;
        }
        heap.write_smi_field(table, hash_table::COUNT, keys.len() as i64)?;
        Ok(table)
    }

    #[test]
    fn rehash_makes_keys_findable()
    {
        let mut heap = Heap::new(0x5eed, None);
        let keys: [&[u8]; 5] = [b"alpha", b"beta", b"gamma", b"delta", b"epsilon"];
        let table = build_table(&mut heap, 8, &keys).unwrap();

        rehash(&mut heap, table).unwrap();

        for (index, key) in keys.iter().enumerate() {
            let value = lookup(&heap, table, key).unwrap();
            assert_eq!(value, Some(smi_to_word(index as i64)));
        }
        assert_eq!(lookup(&heap, table, b"zeta").unwrap(), None);
    }

    #[test]
    fn rehash_records_young_values()
    {
        let mut heap = Heap::new(0, None);
        let table = build_table(&mut heap, 4, &[b"key"]).unwrap();
        let young = heap.new_fixed_array(Space::Young, &[]).unwrap();
        let value_word = Reference::Strong(young).to_word();
        heap.write_word(table.field(hash_table::value(0)), value_word).unwrap();

        rehash(&mut heap, table).unwrap();

        let slots: Vec<_> = heap.remembered_set().iter().copied().collect();
        assert_eq!(slots.len(), 1);
        assert_eq!(heap.read_word(slots[0]).unwrap(), value_word);
    }

    #[test]
    fn rejects_bad_capacity()
    {
        let mut heap = Heap::new(0, None);
        let table = heap.new_hash_table(Space::Old, 3).unwrap();
        assert!(rehash(&mut heap, table).is_err());
    }

    proptest!
    {
        #[test]
        fn rehash_is_idempotent_for_lookups(
            seed: u64,
            keys in proptest::collection::btree_set("[a-z]{1,12}", 0 .. 16),
        )
        {
            let mut heap = Heap::new(seed, None);
            let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
            let table = build_table(&mut heap, 16, &keys).unwrap();
            rehash(&mut heap, table).unwrap();
            rehash(&mut heap, table).unwrap();
            for (index, key) in keys.iter().enumerate() {
                let value = lookup(&heap, table, key).unwrap();
                assert_eq!(value, Some(smi_to_word(index as i64)));
            }
        }
    }
}
