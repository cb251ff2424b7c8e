//! Relocation of code objects.
//!
//! Instructions are stored in the snapshot with holes where they refer
//! to other code, heap objects, or runtime addresses. A code object's
//! relocation info lists these holes; for each of them the snapshot
//! contains the opcodes that say what to fill in.

use {
    super::Deserializer,
    crate::{
        ConfigurationError,
        FormatError,
        Result,
        heap::{Address, Space, WORD_SIZE},
        object::{ObjectKind, ObjectRef, Reference, layout},
        snapshot::Opcode,
    },
    bitflags::bitflags,
    smallvec::SmallVec,
    tracing::trace,
};

/// Size of one relocation record: a mode byte and a 32-bit pc offset.
pub const RELOC_INFO_SIZE: usize = 5;

/// What a relocation record patches.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RelocMode
{
    /// Branch to the entry of another code object.
    CodeTarget = 0,
    EmbeddedObject = 1,
    ExternalReference = 2,
    /// Absolute address within the same code object.
    InternalReference = 3,
    /// Address within the same code object, split over immediates.
    InternalReferenceEncoded = 4,
    /// Entry of a builtin in the embedded blob.
    OffHeapTarget = 5,
    RuntimeEntry = 6,
    Comment = 7,
    ConstPool = 8,
}

impl RelocMode
{
    const ALL: [Self; 9] = [
        Self::CodeTarget,
        Self::EmbeddedObject,
        Self::ExternalReference,
        Self::InternalReference,
        Self::InternalReferenceEncoded,
        Self::OffHeapTarget,
        Self::RuntimeEntry,
        Self::Comment,
        Self::ConstPool,
    ];

    /// Look up a mode by the byte that encodes it.
    pub fn from_byte(byte: u8) -> Option<Self>
    {
        Self::ALL.get(byte as usize).copied()
    }

    /// The mask that contains only this mode.
    pub fn mask(self) -> RelocModeMask
    {
        RelocModeMask::from_bits_truncate(1 << self as u8)
    }
}

bitflags!
{
    /// Set of relocation modes.
    pub struct RelocModeMask: u16
    {
        #[allow(missing_docs)] const CODE_TARGET                = 1 << 0;
        #[allow(missing_docs)] const EMBEDDED_OBJECT            = 1 << 1;
        #[allow(missing_docs)] const EXTERNAL_REFERENCE         = 1 << 2;
        #[allow(missing_docs)] const INTERNAL_REFERENCE         = 1 << 3;
        #[allow(missing_docs)] const INTERNAL_REFERENCE_ENCODED = 1 << 4;
        #[allow(missing_docs)] const OFF_HEAP_TARGET            = 1 << 5;
        #[allow(missing_docs)] const RUNTIME_ENTRY              = 1 << 6;
        #[allow(missing_docs)] const COMMENT                    = 1 << 7;
        #[allow(missing_docs)] const CONST_POOL                 = 1 << 8;

        /// Modes the deserializer fills in.
        const VISITED = Self::CODE_TARGET.bits
                      | Self::EMBEDDED_OBJECT.bits
                      | Self::EXTERNAL_REFERENCE.bits
                      | Self::INTERNAL_REFERENCE.bits
                      | Self::INTERNAL_REFERENCE_ENCODED.bits
                      | Self::OFF_HEAP_TARGET.bits
                      | Self::RUNTIME_ENTRY.bits;
    }
}

/// One relocation record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelocInfo
{
    /// What the hole is filled with.
    pub mode: RelocMode,

    /// Offset of the hole from the first instruction.
    pub pc_offset: u32,
}

impl RelocInfo
{
    /// Encode the record as stored in a relocation info byte array.
    pub fn encode(self) -> [u8; RELOC_INFO_SIZE]
    {
        let pc = self.pc_offset.to_le_bytes();
        [self.mode as u8, pc[0], pc[1], pc[2], pc[3]]
    }

    /// Decode a record from exactly [`RELOC_INFO_SIZE`] bytes.
    pub fn decode(bytes: &[u8; RELOC_INFO_SIZE]) -> Result<Self, FormatError>
    {
        let mode = RelocMode::from_byte(bytes[0])
            .ok_or(FormatError::InvalidRelocationMode(bytes[0]))?;
        let pc_offset = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Ok(Self{mode, pc_offset})
    }
}

/// Encode an address as it appears in instructions.
///
/// If `split` is set, the address is split over two 32-bit immediates,
/// the high half first. Otherwise it is a plain little-endian word.
pub fn encode_target(target: Address, split: bool) -> [u8; WORD_SIZE]
{
    if split {
        let high = ((target.0 >> 32) as u32).to_le_bytes();
        let low = (target.0 as u32).to_le_bytes();
        [high[0], high[1], high[2], high[3], low[0], low[1], low[2], low[3]]
    } else {
        target.0.to_le_bytes()
    }
}

/// Inverse of [`encode_target`].
pub fn decode_target(bytes: [u8; WORD_SIZE], split: bool) -> Address
{
    if split {
        let high = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let low = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Address((high as u64) << 32 | low as u64)
    } else {
        Address(u64::from_le_bytes(bytes))
    }
}

impl<'i, 's> Deserializer<'i, 's>
{
    /// Decode the header fields and relocations of a code object
    /// whose instructions were just copied into place.
    pub (super) fn read_code_object_body(
        &mut self,
        code: ObjectRef,
        space: Space,
        instructions_len: usize,
    ) -> Result<()>
    {
        let header_start = code.field(layout::code::RELOCATION_INFO);
        let header_end = code.field(layout::code::DATA_START);
        let saved = self.code_header_of.replace(code);
        let result = self.read_data(header_start, header_end, space, Some(code));
        self.code_header_of = saved;
        result?;

        let heap = &self.isolate.heap;
        let instruction_size = heap.read_length_field(code, layout::code::INSTRUCTION_SIZE)?;
        if instruction_size > instructions_len {
            return Err(FormatError::MalformedObject{
                object: code.address(),
                reason: "instruction size exceeds the instructions",
            }.into());
        }

        let entry = code.field(layout::code::DATA_START);
        self.code_ranges.push((entry, instructions_len));

        let records = self.relocation_records(code)?;
        trace!(?code, records = records.len(), "relocating code object");
        for info in records {
            if info.pc_offset as usize + WORD_SIZE > instruction_size {
                return Err(FormatError::RelocationOutOfBounds{
                    pc_offset: info.pc_offset,
                }.into());
            }
            self.relocate(code, entry, instruction_size, info)?;
        }

        Ok(())
    }

    /// The relocation records of a code object that must be filled in.
    fn relocation_records(&self, code: ObjectRef) -> Result<SmallVec<[RelocInfo; 16]>>
    {
        let heap = &self.isolate.heap;
        let info = heap.read_object_field(code, layout::code::RELOCATION_INFO)?;
        if heap.kind_of(info)? != ObjectKind::ByteArray {
            return Err(FormatError::MalformedObject{
                object: code.address(),
                reason: "relocation info is not a byte array",
            }.into());
        }

        let len = heap.read_length_field(info, layout::byte_array::LENGTH)?;
        let bytes = heap.read_bytes(info.field(layout::byte_array::DATA), len)?;
        if len % RELOC_INFO_SIZE != 0 {
            return Err(FormatError::MalformedObject{
                object: info.address(),
                reason: "truncated relocation record",
            }.into());
        }

        let mut records = SmallVec::new();
        for chunk in bytes.chunks_exact(RELOC_INFO_SIZE) {
            let mut record = [0; RELOC_INFO_SIZE];
            record.copy_from_slice(chunk);
            let record = RelocInfo::decode(&record)?;
            if RelocModeMask::VISITED.intersects(record.mode.mask()) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn relocate(
        &mut self,
        code: ObjectRef,
        entry: Address,
        instruction_size: usize,
        info: RelocInfo,
    ) -> Result<()>
    {
        let pc = entry.offset(info.pc_offset as usize);
        let split = self.isolate.flags.code_arch.codes_specially();

        match info.mode {
            RelocMode::CodeTarget => {
                let target = match self.read_object_reference()? {
                    Reference::Strong(target) => target,
                    _ => return Err(FormatError::MalformedObject{
                        object: code.address(),
                        reason: "code target is not a strong reference",
                    }.into()),
                };
                if self.isolate.heap.kind_of(target)? != ObjectKind::Code {
                    return Err(FormatError::MalformedObject{
                        object: code.address(),
                        reason: "code target is not a code object",
                    }.into());
                }
                let target_entry = target.field(layout::code::DATA_START);
                self.isolate.heap.write_bytes(pc, &encode_target(target_entry, split))?;
            },

            RelocMode::EmbeddedObject => {
                let object = match self.read_object_reference()? {
                    Reference::Strong(object) => object,
                    _ => return Err(FormatError::WeakEmbeddedObject.into()),
                };
                let heap = &mut self.isolate.heap;
                heap.write_reference(pc, Reference::Strong(object))?;
                if heap.in_young_generation(object.address()) {
                    heap.record_write(code, pc);
                }
            },

            RelocMode::ExternalReference => {
                let position = self.source.position();
                let id = match self.source.next_opcode()? {
                    Opcode::ExternalReference{id} => id,
                    _ => return Err(FormatError::ExpectedOpcode{
                        expected: "external reference",
                        position,
                    }.into()),
                };
                let address = self.external_reference(id)?;
                self.isolate.heap.write_bytes(pc, &encode_target(address, split))?;
            },

            RelocMode::InternalReference | RelocMode::InternalReferenceEncoded => {
                let expect_encoded = info.mode == RelocMode::InternalReferenceEncoded;
                let position = self.source.position();
                let (pc_offset, target_offset) = match self.source.next_opcode()? {
                    Opcode::InternalReference{encoded, pc_offset, target_offset}
                        if encoded == expect_encoded => (pc_offset, target_offset),
                    _ => return Err(FormatError::ExpectedOpcode{
                        expected: "internal reference",
                        position,
                    }.into()),
                };
                if pc_offset != info.pc_offset
                    || target_offset as usize > instruction_size
                {
                    return Err(FormatError::RelocationOutOfBounds{pc_offset}.into());
                }
                let target = entry.offset(target_offset as usize);
                self.isolate.heap.write_bytes(pc, &encode_target(target, expect_encoded))?;
            },

            RelocMode::OffHeapTarget => {
                let position = self.source.position();
                let builtin = match self.source.next_opcode()? {
                    Opcode::OffHeapTarget{builtin} => builtin,
                    _ => return Err(FormatError::ExpectedOpcode{
                        expected: "off-heap target",
                        position,
                    }.into()),
                };
                let blob = self.isolate.embedded_blob.as_ref()
                    .ok_or(ConfigurationError::NoEmbeddedBlob)?;
                let address = blob.instruction_start_of_builtin(builtin)
                    .ok_or(FormatError::IndexOutOfRange{
                        table: "embedded blob",
                        index: builtin,
                    })?;
                self.isolate.heap.write_bytes(pc, &encode_target(address, split))?;
            },

            RelocMode::RuntimeEntry =>
                return Err(FormatError::RuntimeEntryRelocation.into()),

            RelocMode::Comment | RelocMode::ConstPool => (),
        }

        Ok(())
    }
}
