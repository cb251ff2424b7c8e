//! Opcodes of the snapshot byte stream.
//!
//! Many opcodes pack an operand into the opcode byte itself,
//! such as the space of a new object or the index of a hot object.
//! Those packings are private to this module and the byte source and sink;
//! the rest of the crate works with the decoded [`Opcode`] enum.

use crate::heap::{Alignment, Space};

/// Number of roots that can be referred to with a single byte.
pub const ROOT_CONSTANT_COUNT: u32 = 32;

/// Number of entries in the hot object cache.
pub const HOT_OBJECT_COUNT: u8 = 8;

/// Range of repeat counts with a single-byte encoding.
pub (super) const FIXED_REPEAT_MIN: u32 = 2;
pub (super) const FIXED_REPEAT_MAX: u32 = 16;

/// Range of raw data word counts with a single-byte encoding.
pub (super) const FIXED_RAW_DATA_MAX_WORDS: usize = 32;

#[allow(missing_docs)]
pub (super) mod byte
{
    pub const NEW_OBJECT:                 u8 = 0x00;
    pub const BACK_REFERENCE:             u8 = 0x08;
    pub const SPACE_MASK:                 u8 = 0x07;
    pub const ROOT_ARRAY:                 u8 = 0x10;
    pub const PARTIAL_SNAPSHOT_CACHE:     u8 = 0x11;
    pub const READ_ONLY_OBJECT_CACHE:     u8 = 0x12;
    pub const ATTACHED_REFERENCE:         u8 = 0x13;
    pub const EXTERNAL_REFERENCE:         u8 = 0x14;
    pub const API_REFERENCE:              u8 = 0x15;
    pub const INTERNAL_REFERENCE:         u8 = 0x16;
    pub const INTERNAL_REFERENCE_ENCODED: u8 = 0x17;
    pub const OFF_HEAP_TARGET:            u8 = 0x18;
    pub const NOP:                        u8 = 0x19;
    pub const NEXT_CHUNK:                 u8 = 0x1a;
    pub const DEFERRED:                   u8 = 0x1b;
    pub const SYNCHRONIZE:                u8 = 0x1c;
    pub const VARIABLE_RAW_DATA:          u8 = 0x1d;
    pub const VARIABLE_RAW_CODE:          u8 = 0x1e;
    pub const VARIABLE_REPEAT:            u8 = 0x1f;
    pub const OFF_HEAP_BACKING_STORE:     u8 = 0x20;
    pub const CLEARED_WEAK_REFERENCE:     u8 = 0x21;
    pub const WEAK_PREFIX:                u8 = 0x22;
    pub const ALIGNMENT_PREFIX:           u8 = 0x23;
    pub const ROOT_CONSTANT:              u8 = 0x40;
    pub const HOT_OBJECT:                 u8 = 0x60;
    pub const FIXED_REPEAT:               u8 = 0x68;
    pub const FIXED_RAW_DATA:             u8 = 0x80;
}

/// One decoded opcode with its operands.
///
/// Raw payloads borrow from the stream they were decoded from.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Opcode<'a>
{
    /// Allocate an object and decode its contents,
    /// then write a reference to it.
    NewObject{space: Space, size_in_words: u32},

    /// Write a reference to an object that was already decoded.
    BackReference{space: Space, reference: BackReference},

    /// Write a reference to a root.
    RootArray{index: u32},

    /// Write a reference to an entry of the partial snapshot cache.
    PartialSnapshotCache{index: u32},

    /// Write a reference to an entry of the read-only object cache.
    ReadOnlyObjectCache{index: u32},

    /// Write a reference to an object attached by the host.
    AttachedReference{index: u32},

    /// Write a reference to one of the first [`ROOT_CONSTANT_COUNT`] roots.
    RootConstant{index: u32},

    /// Write a reference to an entry of the hot object cache.
    HotObject{index: u8},

    /// Write an address from the external reference table.
    ExternalReference{id: u32},

    /// Write an address from the embedder's references.
    ApiReference{id: u32},

    /// Patch a reference to within the code object being relocated.
    InternalReference{encoded: bool, pc_offset: u32, target_offset: u32},

    /// Patch a reference to a builtin in the embedded blob.
    OffHeapTarget{builtin: u32},

    /// Copy bytes verbatim.
    RawData{bytes: &'a [u8]},

    /// Copy instructions into a code object and relocate them.
    RawCode{bytes: &'a [u8]},

    /// Decode one reference and write it into `count` slots.
    ///
    /// The reference follows this opcode in the stream.
    Repeat{count: u32},

    /// Allocate a backing store outside the heap with these contents.
    OffHeapBackingStore{bytes: &'a [u8]},

    /// Write a weak reference whose object was collected.
    ClearedWeakReference,

    /// Make the next reference weak.
    WeakPrefix,

    /// Align the next allocation or back reference.
    AlignmentPrefix(Alignment),

    /// Continue allocating in the next reserved chunk of a space.
    NextChunk{space: Space},

    /// The rest of the current object is decoded later.
    Deferred,

    /// Marks the end of a group of roots.
    Synchronize,

    /// Does nothing.
    Nop,
}

impl Opcode<'_>
{
    /// Whether the opcode writes a reference that a weak prefix applies to.
    pub fn takes_weak_prefix(&self) -> bool
    {
        matches!(
            self,
            Self::NewObject{..}
            | Self::BackReference{..}
            | Self::RootArray{..}
            | Self::PartialSnapshotCache{..}
            | Self::ReadOnlyObjectCache{..}
            | Self::AttachedReference{..}
            | Self::HotObject{..}
        )
    }

    /// Whether the opcode writes nothing and may thus appear
    /// between a weak prefix and the reference it applies to.
    pub fn is_transparent(&self) -> bool
    {
        matches!(
            self,
            Self::Nop | Self::NextChunk{..} | Self::AlignmentPrefix(..)
        )
    }

    /// Short description for error messages.
    pub fn name(&self) -> &'static str
    {
        match self {
            Self::NewObject{..}            => "new object",
            Self::BackReference{..}        => "back reference",
            Self::RootArray{..}            => "root array",
            Self::PartialSnapshotCache{..} => "partial snapshot cache",
            Self::ReadOnlyObjectCache{..}  => "read-only object cache",
            Self::AttachedReference{..}    => "attached reference",
            Self::RootConstant{..}         => "root constant",
            Self::HotObject{..}            => "hot object",
            Self::ExternalReference{..}    => "external reference",
            Self::ApiReference{..}         => "embedder reference",
            Self::InternalReference{..}    => "internal reference",
            Self::OffHeapTarget{..}        => "off-heap target",
            Self::RawData{..}              => "raw data",
            Self::RawCode{..}              => "raw code",
            Self::Repeat{..}               => "repeat",
            Self::OffHeapBackingStore{..}  => "off-heap backing store",
            Self::ClearedWeakReference     => "cleared weak reference",
            Self::WeakPrefix               => "weak prefix",
            Self::AlignmentPrefix(..)      => "alignment prefix",
            Self::NextChunk{..}            => "next chunk",
            Self::Deferred                 => "deferred",
            Self::Synchronize              => "synchronize",
            Self::Nop                      => "nop",
        }
    }
}

/// Location of an already decoded object.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackReference
{
    /// Byte offset within a reserved chunk.
    ///
    /// Used for spaces that are filled by bump allocation.
    Chunk{chunk_index: u32, chunk_offset: u32},

    /// Sequential number of the object within its space.
    ///
    /// Used for spaces that are allocated object by object;
    /// see [`Space::is_indexed`].
    Index(u32),
}

/// Entry in the list of deferred objects.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeferredEntry
{
    /// Align the address of the next object.
    Alignment(Alignment),

    /// Decode the remaining contents of a deferred object.
    Object{space: Space, reference: BackReference, size_in_words: u32},

    /// There are no more deferred objects.
    End,
}

/// The alignment selected by an alignment prefix byte.
pub (super) fn alignment_from_byte(byte: u8) -> Option<Alignment>
{
    match byte.checked_sub(byte::ALIGNMENT_PREFIX)? {
        0 => Some(Alignment::Double),
        1 => Some(Alignment::DoubleUnaligned),
        2 => Some(Alignment::Code),
        _ => None,
    }
}

/// The alignment prefix byte for an alignment.
///
/// Word alignment is the default and has no prefix.
pub (super) fn alignment_to_byte(alignment: Alignment) -> Option<u8>
{
    match alignment {
        Alignment::Word            => None,
        Alignment::Double          => Some(byte::ALIGNMENT_PREFIX),
        Alignment::DoubleUnaligned => Some(byte::ALIGNMENT_PREFIX + 1),
        Alignment::Code            => Some(byte::ALIGNMENT_PREFIX + 2),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn alignment_bytes_round_trip()
    {
        for alignment in [Alignment::Double, Alignment::DoubleUnaligned, Alignment::Code] {
            let byte = alignment_to_byte(alignment).unwrap();
            assert_eq!(alignment_from_byte(byte), Some(alignment));
        }
        assert_eq!(alignment_to_byte(Alignment::Word), None);
        assert_eq!(alignment_from_byte(byte::ALIGNMENT_PREFIX - 1), None);
        assert_eq!(alignment_from_byte(byte::ALIGNMENT_PREFIX + 3), None);
    }

    #[test]
    fn compact_ranges_do_not_overlap()
    {
        let hot_end = byte::HOT_OBJECT + HOT_OBJECT_COUNT;
        let root_end = byte::ROOT_CONSTANT + ROOT_CONSTANT_COUNT as u8;
        let repeat_end = byte::FIXED_REPEAT
            + (FIXED_REPEAT_MAX - FIXED_REPEAT_MIN + 1) as u8;
        assert!(root_end <= byte::HOT_OBJECT);
        assert!(hot_end <= byte::FIXED_REPEAT);
        assert!(repeat_end <= byte::FIXED_RAW_DATA);
        assert!(byte::ALIGNMENT_PREFIX + 3 <= byte::ROOT_CONSTANT);
    }
}
