use {
    super::opcode::{self, BackReference, DeferredEntry, Opcode, byte},
    crate::{heap::{Space, WORD_SIZE}, object::{ObjectKind, layout, smi_to_word}},
};

/// Builder of snapshot byte streams.
///
/// The sink picks the most compact encoding for each opcode.
/// It does not check that the stream makes sense as a whole;
/// that is up to the deserializer.
#[derive(Clone, Debug, Default)]
pub struct SnapshotSink
{
    data: Vec<u8>,
}

impl SnapshotSink
{
    /// Create an empty sink.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// The number of bytes written so far.
    pub fn position(&self) -> usize
    {
        self.data.len()
    }

    /// Append a byte.
    pub fn put(&mut self, byte: u8)
    {
        self.data.push(byte);
    }

    /// Append a variable-length integer.
    ///
    /// # Panics
    ///
    /// If `value` does not fit in 30 bits.
    pub fn put_int(&mut self, value: u32)
    {
        assert!(value < 1 << 30, "Integer {value} is too large for a snapshot");
        let len = match value {
            0 ..= 0x3f       => 1,
            0 ..= 0x3fff     => 2,
            0 ..= 0x3f_ffff  => 3,
            _                => 4,
        };
        let word = value << 2 | (len - 1) as u32;
        self.data.extend_from_slice(&word.to_le_bytes()[.. len]);
    }

    /// Append bytes verbatim, without an opcode.
    pub fn put_raw(&mut self, bytes: &[u8])
    {
        self.data.extend_from_slice(bytes);
    }

    /// Append an opcode and its operands.
    ///
    /// # Panics
    ///
    /// If an operand is out of range for the opcode,
    /// such as a hot object index of eight or more.
    pub fn put_opcode(&mut self, opcode: &Opcode)
    {
        match *opcode {
            Opcode::NewObject{space, size_in_words} => {
                self.put(byte::NEW_OBJECT + space.index() as u8);
                self.put_int(size_in_words);
            },
            Opcode::BackReference{space, reference} => {
                self.put(byte::BACK_REFERENCE + space.index() as u8);
                self.put_back_reference(reference);
            },
            Opcode::RootArray{index} => {
                self.put(byte::ROOT_ARRAY);
                self.put_int(index);
            },
            Opcode::PartialSnapshotCache{index} => {
                self.put(byte::PARTIAL_SNAPSHOT_CACHE);
                self.put_int(index);
            },
            Opcode::ReadOnlyObjectCache{index} => {
                self.put(byte::READ_ONLY_OBJECT_CACHE);
                self.put_int(index);
            },
            Opcode::AttachedReference{index} => {
                self.put(byte::ATTACHED_REFERENCE);
                self.put_int(index);
            },
            Opcode::RootConstant{index} => {
                assert!(index < opcode::ROOT_CONSTANT_COUNT);
                self.put(byte::ROOT_CONSTANT + index as u8);
            },
            Opcode::HotObject{index} => {
                assert!(index < opcode::HOT_OBJECT_COUNT);
                self.put(byte::HOT_OBJECT + index);
            },
            Opcode::ExternalReference{id} => {
                self.put(byte::EXTERNAL_REFERENCE);
                self.put_int(id);
            },
            Opcode::ApiReference{id} => {
                self.put(byte::API_REFERENCE);
                self.put_int(id);
            },
            Opcode::InternalReference{encoded, pc_offset, target_offset} => {
                self.put(if encoded {
                    byte::INTERNAL_REFERENCE_ENCODED
                } else {
                    byte::INTERNAL_REFERENCE
                });
                self.put_int(pc_offset);
                self.put_int(target_offset);
            },
            Opcode::OffHeapTarget{builtin} => {
                self.put(byte::OFF_HEAP_TARGET);
                self.put_int(builtin);
            },
            Opcode::RawData{bytes} => {
                let words = bytes.len() / WORD_SIZE;
                if bytes.len() % WORD_SIZE == 0
                    && (1 ..= opcode::FIXED_RAW_DATA_MAX_WORDS).contains(&words)
                {
                    self.put(byte::FIXED_RAW_DATA + (words - 1) as u8);
                } else {
                    self.put(byte::VARIABLE_RAW_DATA);
                    self.put_int(payload_len(bytes));
                }
                self.put_raw(bytes);
            },
            Opcode::RawCode{bytes} => {
                self.put(byte::VARIABLE_RAW_CODE);
                self.put_int(payload_len(bytes));
                self.put_raw(bytes);
            },
            Opcode::Repeat{count} => {
                if (opcode::FIXED_REPEAT_MIN ..= opcode::FIXED_REPEAT_MAX).contains(&count) {
                    self.put(byte::FIXED_REPEAT + (count - opcode::FIXED_REPEAT_MIN) as u8);
                } else {
                    self.put(byte::VARIABLE_REPEAT);
                    self.put_int(count);
                }
            },
            Opcode::OffHeapBackingStore{bytes} => {
                self.put(byte::OFF_HEAP_BACKING_STORE);
                self.put_int(payload_len(bytes));
                self.put_raw(bytes);
            },
            Opcode::ClearedWeakReference =>
                self.put(byte::CLEARED_WEAK_REFERENCE),
            Opcode::WeakPrefix =>
                self.put(byte::WEAK_PREFIX),
            Opcode::AlignmentPrefix(alignment) =>
                if let Some(code) = opcode::alignment_to_byte(alignment) {
                    self.put(code);
                },
            Opcode::NextChunk{space} => {
                self.put(byte::NEXT_CHUNK);
                self.put(space.index() as u8);
            },
            Opcode::Deferred =>
                self.put(byte::DEFERRED),
            Opcode::Synchronize =>
                self.put(byte::SYNCHRONIZE),
            Opcode::Nop =>
                self.put(byte::NOP),
        }
    }

    fn put_back_reference(&mut self, reference: BackReference)
    {
        match reference {
            BackReference::Chunk{chunk_index, chunk_offset} => {
                self.put_int(chunk_index);
                self.put_int(chunk_offset);
            },
            BackReference::Index(index) =>
                self.put_int(index),
        }
    }

    /// Append an entry of the list of deferred objects.
    pub fn put_deferred_entry(&mut self, entry: &DeferredEntry)
    {
        match *entry {
            DeferredEntry::Alignment(alignment) =>
                self.put_opcode(&Opcode::AlignmentPrefix(alignment)),
            DeferredEntry::Object{space, reference, size_in_words} => {
                self.put(byte::NEW_OBJECT + space.index() as u8);
                self.put_back_reference(reference);
                self.put_int(size_in_words);
            },
            DeferredEntry::End =>
                self.put(byte::SYNCHRONIZE),
        }
    }

    /// Append raw data with the given bytes.
    pub fn put_raw_data(&mut self, bytes: &[u8])
    {
        self.put_opcode(&Opcode::RawData{bytes});
    }

    /// Append raw data with a single word.
    pub fn put_word(&mut self, word: u64)
    {
        self.put_raw_data(&word.to_le_bytes());
    }

    /// Append raw data with an object header.
    pub fn put_header(&mut self, kind: ObjectKind)
    {
        self.put_word(layout::header_word(kind));
    }

    /// Append raw data with a small integer.
    pub fn put_smi(&mut self, value: i64)
    {
        self.put_word(smi_to_word(value));
    }

    /// Append a new object opcode for an object of `size` bytes.
    ///
    /// # Panics
    ///
    /// If `size` is not a multiple of the word size.
    pub fn put_new_object(&mut self, space: Space, size: usize)
    {
        assert_eq!(size % WORD_SIZE, 0, "Object size must be word aligned");
        let size_in_words = u32::try_from(size / WORD_SIZE)
            .expect("Object is too large for a snapshot");
        self.put_opcode(&Opcode::NewObject{space, size_in_words});
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8]
    {
        &self.data
    }

    /// Finish writing and return the stream.
    pub fn into_bytes(self) -> Vec<u8>
    {
        self.data
    }
}

fn payload_len(bytes: &[u8]) -> u32
{
    u32::try_from(bytes.len()).expect("Payload is too large for a snapshot")
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{heap::Alignment, snapshot::SnapshotByteSource},
        proptest::proptest,
    };

    fn decode_all(data: &[u8]) -> Vec<Opcode>
    {
        let mut source = SnapshotByteSource::new(data);
        let mut opcodes = Vec::new();
        while source.has_more() {
            opcodes.push(source.next_opcode().unwrap());
        }
        opcodes
    }

    #[test]
    fn picks_compact_encodings()
    {
        let mut sink = SnapshotSink::new();
        sink.put_opcode(&Opcode::Repeat{count: 16});
        sink.put_opcode(&Opcode::Repeat{count: 17});
        sink.put_raw_data(&[0; 8 * 32]);
        sink.put_raw_data(&[0; 8 * 33]);
        sink.put_raw_data(&[0; 3]);
        let data = sink.into_bytes();
        assert_eq!(data[0], 0x76);
        assert_eq!(data[1], byte::VARIABLE_REPEAT);
        assert_eq!(data[3], 0x9f);
        assert_eq!(data[4 + 256], byte::VARIABLE_RAW_DATA);
    }

    #[test]
    fn opcodes_survive_the_stream()
    {
        let payload = [9, 8, 7];
        let opcodes = [
            Opcode::NewObject{space: Space::Code, size_in_words: 70_000},
            Opcode::BackReference{
                space: Space::Young,
                reference: BackReference::Chunk{chunk_index: 2, chunk_offset: 4096},
            },
            Opcode::BackReference{space: Space::LargeObject, reference: BackReference::Index(3)},
            Opcode::HotObject{index: 7},
            Opcode::RootConstant{index: 31},
            Opcode::InternalReference{encoded: true, pc_offset: 4, target_offset: 12},
            Opcode::RawCode{bytes: &payload},
            Opcode::OffHeapBackingStore{bytes: &payload},
            Opcode::AlignmentPrefix(Alignment::Code),
            Opcode::NextChunk{space: Space::ReadOnly},
            Opcode::Repeat{count: 1000},
        ];
        let mut sink = SnapshotSink::new();
        for opcode in &opcodes {
            sink.put_opcode(opcode);
        }
        assert_eq!(decode_all(sink.as_bytes()), opcodes);
    }

    proptest!
    {
        #[test]
        fn varints_round_trip(values in proptest::collection::vec(0u32 .. 1 << 30, 0 .. 32))
        {
            let mut sink = SnapshotSink::new();
            for &value in &values {
                sink.put_int(value);
            }
            let data = sink.into_bytes();
            let mut source = SnapshotByteSource::new(&data);
            for &value in &values {
                assert_eq!(source.get_int(), Ok(value));
            }
            assert!(!source.has_more());
        }
    }
}
