use crate::heap::Alignment;

/// Type of object, as stored in the object header.
///
/// Identifiers start at one, so that a zeroed header,
/// as found in freshly reserved memory, is never a valid object.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum ObjectKind
{
    /// One word of padding.
    Filler = 1,
    FixedArray = 2,
    ByteArray = 3,
    HeapNumber = 4,
    SeqString = 5,
    InternalizedString = 6,
    /// String that forwards to another string.
    ThinString = 7,
    ExternalString = 8,
    /// External string backed by a built-in script source.
    NativeSourceString = 9,
    HashTable = 10,
    Script = 11,
    TypeDescriptor = 12,
    DescriptorArray = 13,
    BytecodeArray = 14,
    AllocationSite = 15,
    ArrayBuffer = 16,
    TypedArray = 17,
    Code = 18,
}

impl ObjectKind
{
    const ALL: [Self; 18] = [
        Self::Filler,
        Self::FixedArray,
        Self::ByteArray,
        Self::HeapNumber,
        Self::SeqString,
        Self::InternalizedString,
        Self::ThinString,
        Self::ExternalString,
        Self::NativeSourceString,
        Self::HashTable,
        Self::Script,
        Self::TypeDescriptor,
        Self::DescriptorArray,
        Self::BytecodeArray,
        Self::AllocationSite,
        Self::ArrayBuffer,
        Self::TypedArray,
        Self::Code,
    ];

    /// Look up a kind by its identifier.
    pub fn from_id(id: i64) -> Option<Self>
    {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// The identifier stored in object headers.
    pub fn id(self) -> i64
    {
        self as i64
    }

    /// Whether objects of this kind are strings.
    pub fn is_string(self) -> bool
    {
        match self {
            Self::SeqString
            | Self::InternalizedString
            | Self::ThinString
            | Self::ExternalString
            | Self::NativeSourceString => true,
            _ => false,
        }
    }

    /// Whether objects of this kind are external strings.
    pub fn is_external_string(self) -> bool
    {
        matches!(self, Self::ExternalString | Self::NativeSourceString)
    }

    /// Whether the layout of objects of this kind depends on hashes,
    /// which must be recomputed after deserialization.
    pub fn needs_rehashing(self) -> bool
    {
        matches!(self, Self::HashTable)
    }

    /// The alignment objects of this kind must be allocated at.
    pub fn required_alignment(self) -> Alignment
    {
        match self {
            Self::HeapNumber => Alignment::Double,
            _ => Alignment::Word,
        }
    }
}
