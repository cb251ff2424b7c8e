//! The heap that snapshots are restored into.
//!
//! The heap is divided into [spaces][`Space`], each made up of chunks.
//! A chunk is a contiguous range of memory obtained in one go;
//! objects are carved out of chunks by the deserializer's allocator.
//! Memory that does not belong to any space, such as the backing stores
//! of array buffers, is allocated in separate off-heap blocks.
//!
//! All memory is addressed through [`Address`]es,
//! and all accesses are bounds checked.
//! An access that does not lie entirely within one chunk
//! fails with [`Error::BadAddress`].

pub use self::{space::*, string_table::*};

use {
    self::off_heap::OffHeap,
    crate::{
        Error,
        FormatError,
        Result,
        object::{ObjectKind, ObjectRef, Reference, layout, smi_to_word, word_to_smi},
    },
    std::collections::BTreeSet,
    tracing::trace,
};

mod off_heap;
mod space;
mod string_table;

/// Garbage-collected heap.
pub struct Heap
{
    /// Chunks of each space, indexed by [`Space::index`].
    spaces: [Vec<Vec<u8>>; Space::COUNT],

    off_heap: OffHeap,

    /// Slots outside the young space that refer to young objects.
    remembered_set: BTreeSet<Address>,

    string_table: StringTable,
    external_strings: Vec<ObjectRef>,
    array_buffers: Vec<ObjectRef>,

    /// Bytes of memory owned by objects but allocated elsewhere.
    external_memory: usize,

    hash_seed: u64,
    read_only_committed: bool,
    instruction_cache_flushes: Vec<Vec<(Address, usize)>>,
    poisoned: bool,
}

impl Heap
{
    /// Create an empty heap.
    ///
    /// At most `max_off_heap_bytes` bytes of backing stores
    /// can be allocated, or any amount if [`None`].
    pub fn new(hash_seed: u64, max_off_heap_bytes: Option<usize>) -> Self
    {
        Self{
            spaces:                    Default::default(),
            off_heap:                  OffHeap::new(max_off_heap_bytes),
            remembered_set:            BTreeSet::new(),
            string_table:              StringTable::new(),
            external_strings:          Vec::new(),
            array_buffers:             Vec::new(),
            external_memory:           0,
            hash_seed,
            read_only_committed:       false,
            instruction_cache_flushes: Vec::new(),
            poisoned:                  false,
        }
    }

    /// Seed for string hashes.
    pub fn hash_seed(&self) -> u64
    {
        self.hash_seed
    }

    /* -------------------------------------------------------------------- */
    /*                               Chunks                                 */
    /* -------------------------------------------------------------------- */

    /// Add a zeroed chunk of `size` bytes to a space.
    pub fn allocate_chunk(&mut self, space: Space, size: usize) -> Result<Address>
    {
        let chunks = &mut self.spaces[space.index()];
        let exhausted = || Error::ReservationExhausted{
            space,
            reason: "chunk cannot be addressed",
        };
        let chunk = u16::try_from(chunks.len()).map_err(|_| exhausted())?;
        u32::try_from(size).map_err(|_| exhausted())?;
        chunks.push(vec![0; size]);
        trace!(?space, chunk, size, "allocated chunk");
        Ok(Address::compose(space.region(), chunk, 0))
    }

    /// The start and size of every chunk of a space, in allocation order.
    pub fn chunks(&self, space: Space) -> impl Iterator<Item=(Address, usize)> + '_
    {
        self.spaces[space.index()].iter().enumerate().map(move |(i, chunk)| {
            (Address::compose(space.region(), i as u16, 0), chunk.len())
        })
    }

    /// The space an address lies in, if any.
    pub fn space_of(&self, address: Address) -> Option<Space>
    {
        Space::from_region(address.region())
    }

    /// Whether an address lies in the young space.
    pub fn in_young_generation(&self, address: Address) -> bool
    {
        self.space_of(address) == Some(Space::Young)
    }

    /// Mark the read-only space as complete.
    ///
    /// From then on, back references into the read-only space
    /// are resolved by walking its chunks rather than through
    /// the reservations of a deserializer.
    pub fn commit_read_only_space(&mut self)
    {
        self.read_only_committed = true;
    }

    /// Whether [`commit_read_only_space`] was called.
    ///
    /// [`commit_read_only_space`]: `Self::commit_read_only_space`
    pub fn read_only_committed(&self) -> bool
    {
        self.read_only_committed
    }

    /* -------------------------------------------------------------------- */
    /*                               Off-heap                               */
    /* -------------------------------------------------------------------- */

    /// Allocate a zeroed block for a backing store.
    ///
    /// Fails with [`Error::ResourceExhausted`]
    /// if the off-heap budget does not allow it.
    pub fn allocate_off_heap(&mut self, len: usize) -> Result<Address>
    {
        self.off_heap.allocate(len, true)
    }

    /// Allocate slots that live outside the heap, such as root slots.
    ///
    /// The slots do not count against the off-heap budget.
    pub fn allocate_root_slots(&mut self, count: usize) -> Result<Address>
    {
        let len = count.checked_mul(WORD_SIZE)
            .ok_or(Error::ResourceExhausted{requested: usize::MAX})?;
        self.off_heap.allocate(len, false)
    }

    /* -------------------------------------------------------------------- */
    /*                            Memory access                             */
    /* -------------------------------------------------------------------- */

    fn memory(&self, address: Address, len: usize) -> Result<&[u8]>
    {
        let block = match Space::from_region(address.region()) {
            Some(space) => self.spaces[space.index()]
                .get(address.chunk() as usize)
                .map(Vec::as_slice),
            None if address.region() == space::OFF_HEAP_REGION =>
                self.off_heap.block(address.chunk()),
            None => None,
        };
        let start = address.chunk_offset() as usize;
        block
            .and_then(|block| block.get(start .. start.checked_add(len)?))
            .ok_or(Error::BadAddress(address))
    }

    fn memory_mut(&mut self, address: Address, len: usize) -> Result<&mut [u8]>
    {
        let block = match Space::from_region(address.region()) {
            Some(space) => self.spaces[space.index()]
                .get_mut(address.chunk() as usize)
                .map(Vec::as_mut_slice),
            None if address.region() == space::OFF_HEAP_REGION =>
                self.off_heap.block_mut(address.chunk()),
            None => None,
        };
        let start = address.chunk_offset() as usize;
        block
            .and_then(|block| block.get_mut(start .. start.checked_add(len)?))
            .ok_or(Error::BadAddress(address))
    }

    /// Read `len` bytes.
    pub fn read_bytes(&self, address: Address, len: usize) -> Result<&[u8]>
    {
        self.memory(address, len)
    }

    /// Overwrite bytes.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<()>
    {
        self.memory_mut(address, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Read a little-endian word.
    pub fn read_word(&self, address: Address) -> Result<u64>
    {
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(self.memory(address, WORD_SIZE)?);
        Ok(u64::from_le_bytes(word))
    }

    /// Write a little-endian word.
    pub fn write_word(&mut self, address: Address, word: u64) -> Result<()>
    {
        self.write_bytes(address, &word.to_le_bytes())
    }

    /// Read a slot that holds a reference.
    ///
    /// Returns [`None`] if the slot holds a small integer.
    pub fn read_reference(&self, slot: Address) -> Result<Option<Reference>>
    {
        self.read_word(slot).map(Reference::from_word)
    }

    /// Write a reference into a slot.
    ///
    /// This does not record the write; see [`record_write`].
    ///
    /// [`record_write`]: `Self::record_write`
    pub fn write_reference(&mut self, slot: Address, reference: Reference)
        -> Result<()>
    {
        self.write_word(slot, reference.to_word())
    }

    /* -------------------------------------------------------------------- */
    /*                            Write barrier                             */
    /* -------------------------------------------------------------------- */

    /// Remember that a slot of `host` refers to a young object.
    pub fn record_write(&mut self, host: ObjectRef, slot: Address)
    {
        trace!(?host, ?slot, "recorded old-to-young reference");
        self.remembered_set.insert(slot);
    }

    /// Slots outside the young space that refer to young objects.
    pub fn remembered_set(&self) -> &BTreeSet<Address>
    {
        &self.remembered_set
    }

    /* -------------------------------------------------------------------- */
    /*                            Object fields                             */
    /* -------------------------------------------------------------------- */

    /// The kind of an object, as found in its header.
    pub fn kind_of(&self, object: ObjectRef) -> Result<ObjectKind>
    {
        let header = self.read_word(object.address())?;
        word_to_smi(header)
            .and_then(ObjectKind::from_id)
            .ok_or(FormatError::InvalidHeader{object: object.address()}.into())
    }

    /// Read a field that holds a small integer.
    pub fn read_smi_field(&self, object: ObjectRef, offset: usize) -> Result<i64>
    {
        let word = self.read_word(object.field(offset))?;
        word_to_smi(word).ok_or_else(|| FormatError::MalformedObject{
            object: object.address(),
            reason: "expected a small integer field",
        }.into())
    }

    /// Write a small integer into a field.
    pub fn write_smi_field(&mut self, object: ObjectRef, offset: usize, value: i64)
        -> Result<()>
    {
        self.write_word(object.field(offset), smi_to_word(value))
    }

    /// Read a field that must hold a strong reference.
    pub fn read_object_field(&self, object: ObjectRef, offset: usize)
        -> Result<ObjectRef>
    {
        match self.read_reference(object.field(offset))? {
            Some(Reference::Strong(target)) => Ok(target),
            _ => Err(FormatError::MalformedObject{
                object: object.address(),
                reason: "expected a strong reference field",
            }.into()),
        }
    }

    /// A length field, which must be a non-negative small integer.
    pub fn read_length_field(&self, object: ObjectRef, offset: usize)
        -> Result<usize>
    {
        let length = self.read_smi_field(object, offset)?;
        usize::try_from(length).map_err(|_| FormatError::MalformedObject{
            object: object.address(),
            reason: "negative length",
        }.into())
    }

    /* -------------------------------------------------------------------- */
    /*                               Strings                                */
    /* -------------------------------------------------------------------- */

    /// The contents of a string, following thin strings.
    pub fn string_bytes(&self, string: ObjectRef) -> Result<&[u8]>
    {
        match self.kind_of(string)? {
            ObjectKind::SeqString | ObjectKind::InternalizedString => {
                let len = self.read_length_field(string, layout::string::LENGTH)?;
                self.read_bytes(string.field(layout::string::CHARS), len)
            },
            ObjectKind::ThinString => {
                let actual = self.read_object_field(string, layout::thin_string::ACTUAL)?;
                match self.kind_of(actual)? {
                    ObjectKind::ThinString => Err(FormatError::MalformedObject{
                        object: string.address(),
                        reason: "thin string refers to a thin string",
                    }.into()),
                    _ => self.string_bytes(actual),
                }
            },
            _ => Err(FormatError::MalformedObject{
                object: string.address(),
                reason: "string contents are not in the heap",
            }.into()),
        }
    }

    /// The canonical internalized strings.
    pub fn string_table(&self) -> &StringTable
    {
        &self.string_table
    }

    /// Canonicalize an internalized string.
    ///
    /// If there already is a canonical string with the same contents,
    /// that string is returned. Otherwise `string` becomes canonical,
    /// its hash field is computed, and [`None`] is returned.
    pub fn intern_string(&mut self, string: ObjectRef) -> Result<Option<ObjectRef>>
    {
        let bytes = self.string_bytes(string)?.to_vec();
        if let Some(canonical) = self.string_table.lookup(&bytes) {
            if canonical != string {
                return Ok(Some(canonical));
            }
            return Ok(None);
        }
        let hash = string_hash(self.hash_seed, &bytes);
        self.write_word(string.field(layout::string::HASH_FIELD),
                        layout::string::hash_field(hash))?;
        self.string_table.insert(bytes, string);
        Ok(None)
    }

    /// Turn a string into a thin string that forwards to `actual`.
    ///
    /// Every string is at least as large as a thin string,
    /// so this never needs to move anything.
    pub fn make_thin(&mut self, string: ObjectRef, actual: ObjectRef) -> Result<()>
    {
        self.write_word(string.address(), layout::header_word(ObjectKind::ThinString))?;
        self.write_reference(string.field(layout::thin_string::ACTUAL),
                             Reference::Strong(actual))?;
        if self.in_young_generation(actual.address())
            && !self.in_young_generation(string.address())
        {
            self.record_write(string, string.field(layout::thin_string::ACTUAL));
        }
        Ok(())
    }

    /// Start tracking an external string.
    ///
    /// The string's payload is accounted as external memory.
    pub fn register_external_string(&mut self, string: ObjectRef) -> Result<()>
    {
        let payload = self.read_length_field(string, layout::string::LENGTH)?;
        self.external_memory += payload;
        self.external_strings.push(string);
        Ok(())
    }

    /// External strings tracked by the heap.
    pub fn external_strings(&self) -> &[ObjectRef]
    {
        &self.external_strings
    }

    /* -------------------------------------------------------------------- */
    /*                            Array buffers                             */
    /* -------------------------------------------------------------------- */

    /// Start tracking an array buffer with an off-heap backing store.
    pub fn register_array_buffer(&mut self, buffer: ObjectRef) -> Result<()>
    {
        let byte_length =
            self.read_length_field(buffer, layout::array_buffer::BYTE_LENGTH)?;
        self.external_memory += byte_length;
        self.array_buffers.push(buffer);
        Ok(())
    }

    /// Array buffers tracked by the heap.
    pub fn array_buffers(&self) -> &[ObjectRef]
    {
        &self.array_buffers
    }

    /// Bytes of memory owned by external strings and array buffers.
    pub fn external_memory(&self) -> usize
    {
        self.external_memory
    }

    /* -------------------------------------------------------------------- */
    /*                              Code pages                              */
    /* -------------------------------------------------------------------- */

    /// Flush the instruction cache for the given ranges,
    /// so that freshly written code becomes visible.
    pub fn flush_instruction_cache(&mut self, ranges: Vec<(Address, usize)>)
    {
        trace!(ranges = ranges.len(), "flushed instruction cache");
        self.instruction_cache_flushes.push(ranges);
    }

    /// The ranges of each instruction cache flush so far.
    pub fn instruction_cache_flushes(&self) -> &[Vec<(Address, usize)>]
    {
        &self.instruction_cache_flushes
    }

    /* -------------------------------------------------------------------- */
    /*                              Poisoning                               */
    /* -------------------------------------------------------------------- */

    /// Mark the heap as unusable after a failed deserialization.
    pub fn poison(&mut self)
    {
        self.poisoned = true;
    }

    /// Whether a deserialization into this heap has failed.
    ///
    /// The contents of a poisoned heap are unspecified.
    pub fn is_poisoned(&self) -> bool
    {
        self.poisoned
    }

    /* -------------------------------------------------------------------- */
    /*                              Factories                               */
    /* -------------------------------------------------------------------- */

    /// Allocate an object in its own chunk with the given header.
    fn new_object(&mut self, space: Space, kind: ObjectKind, size: usize)
        -> Result<ObjectRef>
    {
        let object = ObjectRef::from_address(self.allocate_chunk(space, size)?);
        self.write_word(object.address(), layout::header_word(kind))?;
        Ok(object)
    }

    /// Create a fixed array with the given elements.
    pub fn new_fixed_array(&mut self, space: Space, elements: &[Reference])
        -> Result<ObjectRef>
    {
        use layout::fixed_array::*;
        let array = self.new_object(space, ObjectKind::FixedArray, size(elements.len()))?;
        self.write_smi_field(array, LENGTH, elements.len() as i64)?;
        for (i, &element) in elements.iter().enumerate() {
            self.write_reference(array.field(ELEMENTS + i * WORD_SIZE), element)?;
        }
        Ok(array)
    }

    /// Create a sequential string.
    ///
    /// The kind must be [`ObjectKind::SeqString`]
    /// or [`ObjectKind::InternalizedString`].
    /// The string is not added to the string table.
    pub fn new_string(&mut self, space: Space, bytes: &[u8], kind: ObjectKind)
        -> Result<ObjectRef>
    {
        use layout::string::*;
        let string = self.new_object(space, kind, size(bytes.len()))?;
        self.write_word(string.field(HASH_FIELD), EMPTY_HASH_FIELD)?;
        self.write_smi_field(string, LENGTH, bytes.len() as i64)?;
        self.write_bytes(string.field(CHARS), bytes)?;
        Ok(string)
    }

    /// Create an empty hash table.
    pub fn new_hash_table(&mut self, space: Space, capacity: usize)
        -> Result<ObjectRef>
    {
        use layout::hash_table::*;
        let table = self.new_object(space, ObjectKind::HashTable, size(capacity))?;
        self.write_smi_field(table, CAPACITY, capacity as i64)?;
        self.write_smi_field(table, COUNT, 0)?;
        Ok(table)
    }
}
