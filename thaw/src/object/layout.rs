//! Field offsets of each kind of object.
//!
//! Offsets are in bytes from the start of the object.
//! Every object starts with a one-word header
//! holding its [kind][`super::ObjectKind`] as a small integer.

use {super::{ObjectKind, smi_to_word}, crate::heap::WORD_SIZE};

/// Size of the object header.
pub const HEADER_SIZE: usize = WORD_SIZE;

/// The header word of objects of the given kind.
pub fn header_word(kind: ObjectKind) -> u64
{
    smi_to_word(kind.id())
}

/// Round `size` up to a multiple of [`WORD_SIZE`].
pub const fn round_up_to_word(size: usize) -> usize
{
    (size + WORD_SIZE - 1) / WORD_SIZE * WORD_SIZE
}

#[allow(missing_docs)]
pub mod fixed_array
{
    use super::*;

    pub const LENGTH: usize = HEADER_SIZE;
    pub const ELEMENTS: usize = LENGTH + WORD_SIZE;

    pub const fn size(len: usize) -> usize
    {
        ELEMENTS + len * WORD_SIZE
    }
}

#[allow(missing_docs)]
pub mod byte_array
{
    use super::*;

    pub const LENGTH: usize = HEADER_SIZE;
    pub const DATA: usize = LENGTH + WORD_SIZE;

    pub const fn size(len: usize) -> usize
    {
        round_up_to_word(DATA + len)
    }
}

#[allow(missing_docs)]
pub mod heap_number
{
    use super::*;

    pub const VALUE: usize = HEADER_SIZE;
    pub const SIZE: usize = VALUE + WORD_SIZE;
}

/// Layout shared by all kinds of strings.
///
/// Every string is at least as large as a [thin string][`thin_string`],
/// so that any string can be forwarded in place.
#[allow(missing_docs)]
pub mod string
{
    use super::*;

    pub const HASH_FIELD: usize = HEADER_SIZE;
    pub const LENGTH: usize = HASH_FIELD + WORD_SIZE;
    pub const CHARS: usize = LENGTH + WORD_SIZE;

    /// Hash field value for a hash that has not been computed.
    pub const EMPTY_HASH_FIELD: u64 = 0b1;

    /// Size of a sequential string with `len` bytes.
    pub const fn size(len: usize) -> usize
    {
        let size = round_up_to_word(CHARS + len);
        if size < super::thin_string::SIZE {
            super::thin_string::SIZE
        } else {
            size
        }
    }

    /// Hash field value for a computed hash.
    pub const fn hash_field(hash: u32) -> u64
    {
        (hash as u64) << 2
    }
}

#[allow(missing_docs)]
pub mod thin_string
{
    use super::*;

    pub const ACTUAL: usize = string::CHARS;
    pub const SIZE: usize = ACTUAL + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod external_string
{
    use super::*;

    /// Placeholder index while deserializing, address afterwards.
    pub const RESOURCE: usize = string::CHARS;
    pub const SIZE: usize = RESOURCE + WORD_SIZE;
}

/// Open-addressing table of key/value pairs with string keys.
///
/// The capacity is a power of two.
/// Empty entries have a key word of zero.
#[allow(missing_docs)]
pub mod hash_table
{
    use super::*;

    pub const CAPACITY: usize = HEADER_SIZE;
    pub const COUNT: usize = CAPACITY + WORD_SIZE;
    pub const ENTRIES: usize = COUNT + WORD_SIZE;
    pub const ENTRY_SIZE: usize = 2 * WORD_SIZE;

    pub const fn size(capacity: usize) -> usize
    {
        ENTRIES + capacity * ENTRY_SIZE
    }

    pub const fn key(entry: usize) -> usize
    {
        ENTRIES + entry * ENTRY_SIZE
    }

    pub const fn value(entry: usize) -> usize
    {
        key(entry) + WORD_SIZE
    }
}

#[allow(missing_docs)]
pub mod script
{
    use super::*;

    pub const ID: usize = HEADER_SIZE;
    pub const SOURCE: usize = ID + WORD_SIZE;
    pub const SIZE: usize = SOURCE + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod type_descriptor
{
    use super::*;

    pub const INSTANCE_KIND: usize = HEADER_SIZE;
    pub const INSTANCE_SIZE: usize = INSTANCE_KIND + WORD_SIZE;
    pub const DESCRIPTORS: usize = INSTANCE_SIZE + WORD_SIZE;
    pub const SIZE: usize = DESCRIPTORS + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod descriptor_array
{
    use super::*;

    pub const COUNT: usize = HEADER_SIZE;
    pub const MARKED_COUNT: usize = COUNT + WORD_SIZE;
    pub const ENTRIES: usize = MARKED_COUNT + WORD_SIZE;

    pub const fn size(count: usize) -> usize
    {
        ENTRIES + count * WORD_SIZE
    }
}

#[allow(missing_docs)]
pub mod bytecode_array
{
    use super::*;

    pub const LENGTH: usize = HEADER_SIZE;
    pub const INTERRUPT_BUDGET: usize = LENGTH + WORD_SIZE;
    pub const OSR_NESTING_LEVEL: usize = INTERRUPT_BUDGET + WORD_SIZE;
    pub const BYTECODES: usize = OSR_NESTING_LEVEL + WORD_SIZE;

    pub const fn size(len: usize) -> usize
    {
        round_up_to_word(BYTECODES + len)
    }
}

#[allow(missing_docs)]
pub mod allocation_site
{
    use super::*;

    pub const TRANSITION_INFO: usize = HEADER_SIZE;
    pub const NESTED_SITE: usize = TRANSITION_INFO + WORD_SIZE;
    pub const SIZE: usize = NESTED_SITE + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod array_buffer
{
    use super::*;

    /// Null, or a placeholder index while deserializing.
    pub const BACKING_STORE: usize = HEADER_SIZE;
    pub const BYTE_LENGTH: usize = BACKING_STORE + WORD_SIZE;
    pub const SIZE: usize = BYTE_LENGTH + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod typed_array
{
    use super::*;

    pub const BUFFER: usize = HEADER_SIZE;
    /// Small integer zero if the elements live off-heap.
    pub const BASE_POINTER: usize = BUFFER + WORD_SIZE;
    /// Placeholder index while deserializing, address afterwards.
    pub const EXTERNAL_POINTER: usize = BASE_POINTER + WORD_SIZE;
    pub const BYTE_OFFSET: usize = EXTERNAL_POINTER + WORD_SIZE;
    pub const BYTE_LENGTH: usize = BYTE_OFFSET + WORD_SIZE;
    pub const SIZE: usize = BYTE_LENGTH + WORD_SIZE;
}

#[allow(missing_docs)]
pub mod code
{
    use super::*;

    pub const RELOCATION_INFO: usize = HEADER_SIZE;
    pub const INSTRUCTION_SIZE: usize = RELOCATION_INFO + WORD_SIZE;
    pub const FLAGS: usize = INSTRUCTION_SIZE + WORD_SIZE;

    /// Offset of the first instruction, also known as the entry point.
    pub const DATA_START: usize = FLAGS + WORD_SIZE;

    pub const fn size(instructions_len: usize) -> usize
    {
        round_up_to_word(DATA_START + instructions_len)
    }
}

/// Size of every type descriptor.
pub const TYPE_DESCRIPTOR_SIZE: usize = type_descriptor::SIZE;

/// The smallest size an object of the given kind can have.
///
/// Objects of variable size must still hold their fixed fields.
pub const fn min_size(kind: ObjectKind) -> usize
{
    match kind {
        ObjectKind::Filler               => HEADER_SIZE,
        ObjectKind::FixedArray           => fixed_array::size(0),
        ObjectKind::ByteArray            => byte_array::size(0),
        ObjectKind::HeapNumber           => heap_number::SIZE,
        ObjectKind::SeqString
        | ObjectKind::InternalizedString
        | ObjectKind::ThinString         => thin_string::SIZE,
        ObjectKind::ExternalString
        | ObjectKind::NativeSourceString => external_string::SIZE,
        ObjectKind::HashTable            => hash_table::size(0),
        ObjectKind::Script               => script::SIZE,
        ObjectKind::TypeDescriptor       => type_descriptor::SIZE,
        ObjectKind::DescriptorArray      => descriptor_array::size(0),
        ObjectKind::BytecodeArray        => bytecode_array::size(0),
        ObjectKind::AllocationSite       => allocation_site::SIZE,
        ObjectKind::ArrayBuffer          => array_buffer::SIZE,
        ObjectKind::TypedArray           => typed_array::SIZE,
        ObjectKind::Code                 => code::size(0),
    }
}
