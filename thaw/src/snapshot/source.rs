use {
    super::opcode::{self, BackReference, DeferredEntry, Opcode, byte},
    crate::{FormatError, heap::Space},
};

type Result<T> = std::result::Result<T, FormatError>;

/// Sequential reader of a snapshot byte stream.
#[derive(Clone, Debug)]
pub struct SnapshotByteSource<'a>
{
    data: &'a [u8],
    position: usize,
}

impl<'a> SnapshotByteSource<'a>
{
    /// Start reading at the beginning of the data.
    pub fn new(data: &'a [u8]) -> Self
    {
        Self{data, position: 0}
    }

    /// The offset of the next byte to be read.
    pub fn position(&self) -> usize
    {
        self.position
    }

    /// Whether there are bytes left.
    pub fn has_more(&self) -> bool
    {
        self.position < self.data.len()
    }

    /// The next byte, without consuming it.
    pub fn peek(&self) -> Result<u8>
    {
        self.data.get(self.position).copied()
            .ok_or(FormatError::UnexpectedEnd{position: self.position})
    }

    /// Consume the next byte.
    pub fn get(&mut self) -> Result<u8>
    {
        let byte = self.peek()?;
        self.position += 1;
        Ok(byte)
    }

    /// Consume a variable-length integer.
    ///
    /// The low two bits of the first byte hold the number of bytes
    /// minus one; the remaining bits hold the value, little endian.
    pub fn get_int(&mut self) -> Result<u32>
    {
        let len = (self.peek()? & 0b11) as usize + 1;
        let bytes = self.copy_raw(len)?;
        let mut word = [0; 4];
        word[.. len].copy_from_slice(bytes);
        Ok(u32::from_le_bytes(word) >> 2)
    }

    /// Consume `len` bytes.
    pub fn copy_raw(&mut self, len: usize) -> Result<&'a [u8]>
    {
        let end = self.position.checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::UnexpectedEnd{position: self.data.len()})?;
        let bytes = &self.data[self.position .. end];
        self.position = end;
        Ok(bytes)
    }

    fn get_space(&mut self) -> Result<Space>
    {
        let index = self.get()?;
        Space::from_index(index).ok_or(FormatError::UnknownSpace(index))
    }

    fn get_back_reference(&mut self, space: Space) -> Result<BackReference>
    {
        if space.is_indexed() {
            Ok(BackReference::Index(self.get_int()?))
        } else {
            let chunk_index = self.get_int()?;
            let chunk_offset = self.get_int()?;
            Ok(BackReference::Chunk{chunk_index, chunk_offset})
        }
    }

    fn get_raw_payload(&mut self) -> Result<&'a [u8]>
    {
        let len = self.get_int()?;
        self.copy_raw(len as usize)
    }

    /// Consume an opcode and its operands.
    pub fn next_opcode(&mut self) -> Result<Opcode<'a>>
    {
        let position = self.position;
        let code = self.get()?;
        let unknown = FormatError::UnknownOpcode{byte: code, position};
        let space_of = |code: u8| {
            Space::from_index(code & byte::SPACE_MASK).ok_or(unknown.clone())
        };

        let opcode = match code {
            0x00 ..= 0x07 => {
                let space = space_of(code)?;
                Opcode::NewObject{space, size_in_words: self.get_int()?}
            },
            0x08 ..= 0x0f => {
                let space = space_of(code)?;
                Opcode::BackReference{space, reference: self.get_back_reference(space)?}
            },
            byte::ROOT_ARRAY =>
                Opcode::RootArray{index: self.get_int()?},
            byte::PARTIAL_SNAPSHOT_CACHE =>
                Opcode::PartialSnapshotCache{index: self.get_int()?},
            byte::READ_ONLY_OBJECT_CACHE =>
                Opcode::ReadOnlyObjectCache{index: self.get_int()?},
            byte::ATTACHED_REFERENCE =>
                Opcode::AttachedReference{index: self.get_int()?},
            byte::EXTERNAL_REFERENCE =>
                Opcode::ExternalReference{id: self.get_int()?},
            byte::API_REFERENCE =>
                Opcode::ApiReference{id: self.get_int()?},
            byte::INTERNAL_REFERENCE | byte::INTERNAL_REFERENCE_ENCODED => {
                let pc_offset = self.get_int()?;
                let target_offset = self.get_int()?;
                let encoded = code == byte::INTERNAL_REFERENCE_ENCODED;
                Opcode::InternalReference{encoded, pc_offset, target_offset}
            },
            byte::OFF_HEAP_TARGET =>
                Opcode::OffHeapTarget{builtin: self.get_int()?},
            byte::NOP =>
                Opcode::Nop,
            byte::NEXT_CHUNK =>
                Opcode::NextChunk{space: self.get_space()?},
            byte::DEFERRED =>
                Opcode::Deferred,
            byte::SYNCHRONIZE =>
                Opcode::Synchronize,
            byte::VARIABLE_RAW_DATA =>
                Opcode::RawData{bytes: self.get_raw_payload()?},
            byte::VARIABLE_RAW_CODE =>
                Opcode::RawCode{bytes: self.get_raw_payload()?},
            byte::VARIABLE_REPEAT =>
                Opcode::Repeat{count: self.get_int()?},
            byte::OFF_HEAP_BACKING_STORE =>
                Opcode::OffHeapBackingStore{bytes: self.get_raw_payload()?},
            byte::CLEARED_WEAK_REFERENCE =>
                Opcode::ClearedWeakReference,
            byte::WEAK_PREFIX =>
                Opcode::WeakPrefix,
            0x23 ..= 0x25 =>
                Opcode::AlignmentPrefix(
                    opcode::alignment_from_byte(code).ok_or(unknown)?),
            0x40 ..= 0x5f =>
                Opcode::RootConstant{index: (code - byte::ROOT_CONSTANT) as u32},
            0x60 ..= 0x67 =>
                Opcode::HotObject{index: code - byte::HOT_OBJECT},
            0x68 ..= 0x76 => {
                let count = (code - byte::FIXED_REPEAT) as u32
                    + opcode::FIXED_REPEAT_MIN;
                Opcode::Repeat{count}
            },
            0x80 ..= 0x9f => {
                let words = (code - byte::FIXED_RAW_DATA) as usize + 1;
                Opcode::RawData{bytes: self.copy_raw(words * crate::heap::WORD_SIZE)?}
            },
            _ => return Err(unknown),
        };

        Ok(opcode)
    }

    /// Consume an entry of the list of deferred objects.
    pub fn next_deferred_entry(&mut self) -> Result<DeferredEntry>
    {
        let position = self.position;
        let code = self.get()?;
        if code == byte::SYNCHRONIZE {
            return Ok(DeferredEntry::End);
        }
        if let Some(alignment) = opcode::alignment_from_byte(code) {
            return Ok(DeferredEntry::Alignment(alignment));
        }
        if code & !byte::SPACE_MASK != byte::NEW_OBJECT {
            return Err(FormatError::ExpectedOpcode{
                expected: "deferred object",
                position,
            });
        }
        let space = Space::from_index(code & byte::SPACE_MASK)
            .ok_or(FormatError::UnknownSpace(code & byte::SPACE_MASK))?;
        let reference = self.get_back_reference(space)?;
        let size_in_words = self.get_int()?;
        Ok(DeferredEntry::Object{space, reference, size_in_words})
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::heap::Alignment};

    #[test]
    fn varints()
    {
        // 1 << 2 | 0, then 300 << 2 | 1 over two bytes.
        let data = [0x04, 0xb1, 0x04];
        let mut source = SnapshotByteSource::new(&data);
        assert_eq!(source.get_int(), Ok(1));
        assert_eq!(source.get_int(), Ok(300));
        assert!(!source.has_more());
        assert_eq!(source.get_int(), Err(FormatError::UnexpectedEnd{position: 3}));
    }

    #[test]
    fn truncated_varint()
    {
        let data = [0x03, 0x00];
        let mut source = SnapshotByteSource::new(&data);
        assert_eq!(source.get_int(), Err(FormatError::UnexpectedEnd{position: 2}));
    }

    #[test]
    fn compact_opcodes()
    {
        let data = [0x45, 0x62, 0x6b, 0x80, 1, 2, 3, 4, 5, 6, 7, 8, 0x24];
        let mut source = SnapshotByteSource::new(&data);
        assert_eq!(source.next_opcode(), Ok(Opcode::RootConstant{index: 5}));
        assert_eq!(source.next_opcode(), Ok(Opcode::HotObject{index: 2}));
        assert_eq!(source.next_opcode(), Ok(Opcode::Repeat{count: 5}));
        assert_eq!(source.next_opcode(),
                   Ok(Opcode::RawData{bytes: &[1, 2, 3, 4, 5, 6, 7, 8]}));
        assert_eq!(source.position(), 12);
        assert_eq!(source.next_opcode(),
                   Ok(Opcode::AlignmentPrefix(Alignment::DoubleUnaligned)));
    }

    #[test]
    fn back_references_depend_on_space()
    {
        // Old space: chunk 1, offset 16. Type descriptor space: index 2.
        let data = [0x09, 0x04, 0x40, 0x0b, 0x08];
        let mut source = SnapshotByteSource::new(&data);
        assert_eq!(source.next_opcode(), Ok(Opcode::BackReference{
            space: Space::Old,
            reference: BackReference::Chunk{chunk_index: 1, chunk_offset: 16},
        }));
        assert_eq!(source.next_opcode(), Ok(Opcode::BackReference{
            space: Space::TypeDescriptor,
            reference: BackReference::Index(2),
        }));
    }

    #[test]
    fn unknown_opcodes()
    {
        for code in [0x06, 0x0e, 0x26, 0x3f, 0x77, 0x7f, 0xa0, 0xff] {
            let data = [code, 0, 0, 0];
            let mut source = SnapshotByteSource::new(&data);
            assert_eq!(source.next_opcode(),
                       Err(FormatError::UnknownOpcode{byte: code, position: 0}));
        }
    }

    #[test]
    fn deferred_entries()
    {
        let data = [0x23, 0x01, 0x00, 0x08, 0x0c, 0x1c, 0x19];
        let mut source = SnapshotByteSource::new(&data);
        assert_eq!(source.next_deferred_entry(),
                   Ok(DeferredEntry::Alignment(Alignment::Double)));
        assert_eq!(source.next_deferred_entry(), Ok(DeferredEntry::Object{
            space: Space::Old,
            reference: BackReference::Chunk{chunk_index: 0, chunk_offset: 2},
            size_in_words: 3,
        }));
        assert_eq!(source.next_deferred_entry(), Ok(DeferredEntry::End));
        assert_eq!(source.next_deferred_entry(),
                   Err(FormatError::ExpectedOpcode{expected: "deferred object",
                                                   position: 6}));
    }
}
