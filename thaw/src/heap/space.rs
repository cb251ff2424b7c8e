use std::fmt;

/// Size of a word, and thus of a slot, in bytes.
pub const WORD_SIZE: usize = 8;

/// Address in the heap's virtual address space.
///
/// The address space is carved up into regions, chunks, and offsets:
/// bits 48 to 64 identify the region, bits 32 to 48 identify
/// the chunk within the region, and the low 32 bits are
/// the byte offset within the chunk.
/// Region zero is never backed by memory,
/// so the null address and process-level addresses
/// handed out by the host never alias heap memory.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(pub u64);

/// Region of off-heap blocks.
pub (crate) const OFF_HEAP_REGION: u16 = 7;

impl Address
{
    /// The null address.
    pub const NULL: Self = Self(0);

    pub (crate) fn compose(region: u16, chunk: u16, offset: u32) -> Self
    {
        Self((region as u64) << 48 | (chunk as u64) << 32 | offset as u64)
    }

    /// Whether this is the null address.
    pub fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// The region this address lies in.
    pub fn region(self) -> u16
    {
        (self.0 >> 48) as u16
    }

    /// The chunk this address lies in, within its region.
    pub fn chunk(self) -> u16
    {
        (self.0 >> 32) as u16
    }

    /// The byte offset of this address within its chunk.
    pub fn chunk_offset(self) -> u32
    {
        self.0 as u32
    }

    /// The address `bytes` bytes further.
    pub fn offset(self, bytes: usize) -> Self
    {
        Self(self.0.wrapping_add(bytes as u64))
    }

    /// Number of bytes from `base` to this address.
    ///
    /// Saturates at zero if `base` lies beyond this address.
    pub fn distance_from(self, base: Self) -> usize
    {
        self.0.saturating_sub(base.0) as usize
    }

    /// Whether the address is a multiple of `align`.
    pub fn is_aligned(self, align: usize) -> bool
    {
        self.0 % align as u64 == 0
    }
}

impl fmt::Debug for Address
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Address({:#x})", self.0)
    }
}

/// Memory partition with its own allocation and addressing policy.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum Space
{
    /// Short-lived objects; the generational collector's nursery.
    Young = 0,
    Old = 1,
    Code = 2,
    TypeDescriptor = 3,
    LargeObject = 4,
    ReadOnly = 5,
}

impl Space
{
    /// The number of spaces.
    pub const COUNT: usize = 6;

    /// All spaces, ordered by index.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Young,
        Self::Old,
        Self::Code,
        Self::TypeDescriptor,
        Self::LargeObject,
        Self::ReadOnly,
    ];

    /// Look up a space by index.
    pub fn from_index(index: u8) -> Option<Self>
    {
        Self::ALL.get(index as usize).copied()
    }

    /// The index of the space.
    pub fn index(self) -> usize
    {
        self as usize
    }

    /// The address region that backs the space.
    pub (crate) fn region(self) -> u16
    {
        self as u16 + 1
    }

    /// Look up the space backed by an address region.
    pub (crate) fn from_region(region: u16) -> Option<Self>
    {
        let index = region.checked_sub(1)?;
        Self::from_index(u8::try_from(index).ok()?)
    }

    /// Whether back references into the space
    /// use sequential object indices rather than chunk offsets.
    pub fn is_indexed(self) -> bool
    {
        match self {
            Self::TypeDescriptor | Self::LargeObject => true,
            Self::Young | Self::Old | Self::Code | Self::ReadOnly => false,
        }
    }
}

/// Alignment requirement for an allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Alignment
{
    /// Any multiple of [`WORD_SIZE`].
    Word,

    /// A multiple of two words.
    Double,

    /// One word past a multiple of two words.
    DoubleUnaligned,

    /// A multiple of [`CODE_ALIGNMENT`].
    Code,
}

/// Alignment of the start of code objects when requested.
pub const CODE_ALIGNMENT: usize = 32;

impl Alignment
{
    /// Number of filler bytes needed in front of
    /// an object at `address` to satisfy this alignment.
    pub fn fill_to_align(self, address: Address) -> usize
    {
        let misalignment = |align: usize| (address.0 % align as u64) as usize;
        match self {
            Self::Word => 0,
            Self::Double => {
                let m = misalignment(2 * WORD_SIZE);
                if m == 0 { 0 } else { 2 * WORD_SIZE - m }
            },
            Self::DoubleUnaligned => {
                let m = misalignment(2 * WORD_SIZE);
                if m == 0 { WORD_SIZE } else { 0 }
            },
            Self::Code => {
                let m = misalignment(CODE_ALIGNMENT);
                if m == 0 { 0 } else { CODE_ALIGNMENT - m }
            },
        }
    }

    /// The largest value [`fill_to_align`] can return
    /// for a word-aligned address.
    ///
    /// [`fill_to_align`]: `Self::fill_to_align`
    pub fn max_fill(self) -> usize
    {
        match self {
            Self::Word            => 0,
            Self::Double          => WORD_SIZE,
            Self::DoubleUnaligned => WORD_SIZE,
            Self::Code            => CODE_ALIGNMENT - WORD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn space_regions_round_trip()
    {
        for space in Space::ALL {
            assert_eq!(Space::from_region(space.region()), Some(space));
        }
        assert_eq!(Space::from_region(0), None);
        assert_eq!(Space::from_region(OFF_HEAP_REGION), None);
    }

    proptest!
    {
        #[test]
        fn compose_and_decompose(region: u16, chunk: u16, offset: u32)
        {
            let address = Address::compose(region, chunk, offset);
            assert_eq!(address.region(), region);
            assert_eq!(address.chunk(), chunk);
            assert_eq!(address.chunk_offset(), offset);
        }

        #[test]
        fn fill_satisfies_alignment(words in 0u64 .. 1 << 20)
        {
            let address = Address(words * WORD_SIZE as u64);
            for alignment in [Alignment::Double, Alignment::Code] {
                let fill = alignment.fill_to_align(address);
                assert!(fill <= alignment.max_fill());
                let aligned = address.offset(fill);
                assert_eq!(alignment.fill_to_align(aligned), 0);
            }
            let fill = Alignment::DoubleUnaligned.fill_to_align(address);
            assert!(fill <= Alignment::DoubleUnaligned.max_fill());
            assert_eq!(address.offset(fill).0 % 16, 8);
        }
    }
}
