//! Allocation from reservations.
//!
//! Before decoding starts, all memory the snapshot needs is reserved.
//! Objects are then bump-allocated from the reserved chunks in the
//! exact order in which the encoder laid them out, which is what
//! allows back references to be expressed as chunk offsets.

use {
    crate::{
        Error,
        FormatError,
        Result,
        heap::{Address, Alignment, Heap, Space, WORD_SIZE},
        object::{ObjectKind, ObjectRef, layout},
        snapshot::{BackReference, Reservations},
    },
    tracing::trace,
};

/// Reserved chunk of a bump-allocated space.
#[derive(Clone, Copy, Debug)]
struct ReservedChunk
{
    start: Address,
    end: Address,

    /// Where the next object goes.
    top: Address,
}

/// Allocator for one deserialization.
pub (super) struct Allocator
{
    /// Reserved chunks of bump-allocated spaces, by [`Space::index`].
    chunks: [Vec<ReservedChunk>; Space::COUNT],

    /// Index of the chunk currently allocated from, by [`Space::index`].
    current_chunk: [usize; Space::COUNT],

    /// Reserved type descriptors, and how many were handed out.
    type_descriptors: Vec<Address>,
    next_type_descriptor: usize,

    large_objects: Vec<ObjectRef>,

    next_alignment: Alignment,
    next_reference_is_weak: bool,
}

impl Allocator
{
    /// Reserve the memory for a deserialization.
    pub fn new(heap: &mut Heap, reservations: &Reservations) -> Result<Self>
    {
        let mut chunks: [Vec<ReservedChunk>; Space::COUNT] = Default::default();
        let mut type_descriptors = Vec::new();

        for space in Space::ALL {
            let sizes = reservations.chunks(space);
            match space {
                Space::LargeObject => (),
                Space::TypeDescriptor => {
                    let total: usize = sizes.iter().sum();
                    let count = total / layout::TYPE_DESCRIPTOR_SIZE;
                    if count != 0 {
                        let size = count * layout::TYPE_DESCRIPTOR_SIZE;
                        let start = heap.allocate_chunk(space, size)?;
                        type_descriptors = (0 .. count)
                            .map(|i| start.offset(i * layout::TYPE_DESCRIPTOR_SIZE))
                            .collect();
                    }
                },
                Space::Young | Space::Old | Space::Code | Space::ReadOnly => {
                    for &size in sizes {
                        if size % WORD_SIZE != 0 {
                            return Err(Error::ReservationExhausted{
                                space,
                                reason: "chunk size is not word aligned",
                            });
                        }
                        let start = heap.allocate_chunk(space, size)?;
                        let end = start.offset(size);
                        chunks[space.index()].push(ReservedChunk{start, end, top: start});
                    }
                },
            }
        }

        Ok(Self{
            chunks,
            current_chunk:          [0; Space::COUNT],
            type_descriptors,
            next_type_descriptor:   0,
            large_objects:          Vec::new(),
            next_alignment:         Alignment::Word,
            next_reference_is_weak: false,
        })
    }

    /* -------------------------------------------------------------------- */
    /*                             Allocation                               */
    /* -------------------------------------------------------------------- */

    /// Allocate `size` bytes in a space.
    ///
    /// The pending alignment is applied and reset.
    pub fn allocate(&mut self, heap: &mut Heap, space: Space, size: usize)
        -> Result<Address>
    {
        let alignment = std::mem::replace(&mut self.next_alignment, Alignment::Word);
        match space {
            Space::LargeObject => {
                let reserved = size + alignment.max_fill();
                let start = heap.allocate_chunk(space, reserved)?;
                let address = Self::align_with_filler(heap, start, size, reserved, alignment)?;
                self.large_objects.push(ObjectRef::from_address(address));
                Ok(address)
            },
            Space::TypeDescriptor => {
                if size != layout::TYPE_DESCRIPTOR_SIZE {
                    return Err(Error::ReservationExhausted{
                        space,
                        reason: "type descriptor has the wrong size",
                    });
                }
                let address = *self.type_descriptors.get(self.next_type_descriptor)
                    .ok_or(Error::ReservationExhausted{
                        space,
                        reason: "all reserved type descriptors are in use",
                    })?;
                self.next_type_descriptor += 1;
                Ok(address)
            },
            Space::Young | Space::Old | Space::Code | Space::ReadOnly => {
                let index = self.current_chunk[space.index()];
                let chunk = self.chunks[space.index()].get_mut(index)
                    .ok_or(Error::ReservationExhausted{
                        space,
                        reason: "no memory was reserved",
                    })?;
                let reserved = size + alignment.max_fill();
                if reserved > chunk.end.distance_from(chunk.top) {
                    return Err(Error::ReservationExhausted{
                        space,
                        reason: "object does not fit in the reserved chunk",
                    });
                }
                let start = chunk.top;
                chunk.top = start.offset(reserved);
                trace!(?space, ?start, size, "allocated object");
                Self::align_with_filler(heap, start, size, reserved, alignment)
            },
        }
    }

    /// Place an object of `size` bytes within `reserved` bytes at `start`,
    /// padding with one-word fillers before and after it.
    fn align_with_filler(
        heap: &mut Heap,
        start: Address,
        size: usize,
        reserved: usize,
        alignment: Alignment,
    ) -> Result<Address>
    {
        let pre_fill = alignment.fill_to_align(start);
        let address = start.offset(pre_fill);
        let filler = layout::header_word(ObjectKind::Filler);
        for offset in (0 .. pre_fill).step_by(WORD_SIZE) {
            heap.write_word(start.offset(offset), filler)?;
        }
        for offset in (pre_fill + size .. reserved).step_by(WORD_SIZE) {
            heap.write_word(start.offset(offset), filler)?;
        }
        Ok(address)
    }

    /// Continue allocating in the next reserved chunk of a space.
    pub fn move_to_next_chunk(&mut self, space: Space) -> Result<()>
    {
        let index = self.current_chunk[space.index()] + 1;
        if index >= self.chunks[space.index()].len() {
            return Err(Error::ReservationExhausted{
                space,
                reason: "there is no next chunk",
            });
        }
        self.current_chunk[space.index()] = index;
        Ok(())
    }

    /// Align the next allocation or back reference.
    ///
    /// A later prefix overrides an earlier one.
    pub fn set_alignment(&mut self, alignment: Alignment)
    {
        self.next_alignment = alignment;
    }

    /* -------------------------------------------------------------------- */
    /*                              Weakness                                */
    /* -------------------------------------------------------------------- */

    /// Make the next reference weak.
    pub fn set_next_reference_is_weak(&mut self) -> Result<()>
    {
        if self.next_reference_is_weak {
            return Err(FormatError::DuplicateWeakPrefix.into());
        }
        self.next_reference_is_weak = true;
        Ok(())
    }

    pub fn next_reference_is_weak(&self) -> bool
    {
        self.next_reference_is_weak
    }

    /// Whether the next reference is weak, resetting the flag.
    pub fn take_next_reference_is_weak(&mut self) -> bool
    {
        std::mem::take(&mut self.next_reference_is_weak)
    }

    /* -------------------------------------------------------------------- */
    /*                           Back references                            */
    /* -------------------------------------------------------------------- */

    /// Find the object a back reference refers to.
    ///
    /// The pending alignment is applied to the found address and reset.
    pub fn resolve(&mut self, heap: &Heap, space: Space, reference: BackReference)
        -> Result<ObjectRef>
    {
        let invalid = || Error::from(FormatError::InvalidBackReference{space, reference});

        let address = match (space, reference) {
            (Space::TypeDescriptor, BackReference::Index(index)) => {
                let index = index as usize;
                if index >= self.next_type_descriptor {
                    return Err(invalid());
                }
                self.type_descriptors[index]
            },
            (Space::LargeObject, BackReference::Index(index)) =>
                self.large_objects.get(index as usize)
                    .ok_or_else(invalid)?
                    .address(),
            (Space::ReadOnly, BackReference::Chunk{chunk_index, chunk_offset})
                if heap.read_only_committed() =>
            {
                let (start, len) = heap.chunks(Space::ReadOnly)
                    .nth(chunk_index as usize)
                    .ok_or_else(invalid)?;
                if chunk_offset as usize >= len {
                    return Err(invalid());
                }
                start.offset(chunk_offset as usize)
            },
            (
                Space::Young | Space::Old | Space::Code | Space::ReadOnly,
                BackReference::Chunk{chunk_index, chunk_offset},
            ) => {
                let chunk_index = chunk_index as usize;
                if chunk_index > self.current_chunk[space.index()] {
                    return Err(invalid());
                }
                let chunk = self.chunks[space.index()].get(chunk_index)
                    .ok_or_else(invalid)?;
                let address = chunk.start.offset(chunk_offset as usize);
                if address.offset(WORD_SIZE) > chunk.top {
                    return Err(invalid());
                }
                address
            },
            _ => return Err(invalid()),
        };

        let alignment = std::mem::replace(&mut self.next_alignment, Alignment::Word);
        let object = ObjectRef::from_address(address.offset(alignment.fill_to_align(address)));

        match heap.kind_of(object) {
            Ok(..) => Ok(object),
            Err(..) => Err(invalid()),
        }
    }

    /* -------------------------------------------------------------------- */
    /*                               Audit                                  */
    /* -------------------------------------------------------------------- */

    /// Whether every reserved byte was allocated.
    pub fn reservations_are_fully_used(&self) -> bool
    {
        let chunks_used = self.chunks.iter().all(|chunks| {
            chunks.iter().all(|chunk| chunk.top == chunk.end)
        });
        chunks_used && self.next_type_descriptor == self.type_descriptors.len()
    }

    /// Large objects allocated so far.
    pub fn large_objects(&self) -> &[ObjectRef]
    {
        &self.large_objects
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    fn setup(reservations: Reservations) -> (Heap, Allocator)
    {
        let mut heap = Heap::new(0, None);
        let allocator = Allocator::new(&mut heap, &reservations).unwrap();
        (heap, allocator)
    }

    fn write_header(heap: &mut Heap, address: Address)
    {
        heap.write_word(address, layout::header_word(ObjectKind::FixedArray)).unwrap();
    }

    #[test]
    fn bump_allocation_and_back_references()
    {
        let reservations = Reservations::new().with_chunk(Space::Old, 48);
        let (mut heap, mut allocator) = setup(reservations);

        let a = allocator.allocate(&mut heap, Space::Old, 16).unwrap();
        write_header(&mut heap, a);
        let b = allocator.allocate(&mut heap, Space::Old, 32).unwrap();
        write_header(&mut heap, b);
        assert_eq!(b, a.offset(16));
        assert!(allocator.reservations_are_fully_used());

        let reference = BackReference::Chunk{chunk_index: 0, chunk_offset: 16};
        assert_eq!(allocator.resolve(&heap, Space::Old, reference).unwrap().address(), b);

        assert!(matches!(
            allocator.allocate(&mut heap, Space::Old, 8),
            Err(Error::ReservationExhausted{space: Space::Old, ..}),
        ));
    }

    #[test]
    fn back_reference_beyond_top()
    {
        let reservations = Reservations::new().with_chunk(Space::Old, 64);
        let (mut heap, mut allocator) = setup(reservations);
        let a = allocator.allocate(&mut heap, Space::Old, 16).unwrap();
        write_header(&mut heap, a);
        let reference = BackReference::Chunk{chunk_index: 0, chunk_offset: 16};
        assert!(matches!(
            allocator.resolve(&heap, Space::Old, reference),
            Err(Error::Format(FormatError::InvalidBackReference{..})),
        ));
        let reference = BackReference::Chunk{chunk_index: 1, chunk_offset: 0};
        assert!(allocator.resolve(&heap, Space::Old, reference).is_err());
        assert!(allocator.resolve(&heap, Space::Old, BackReference::Index(0)).is_err());
    }

    #[test]
    fn alignment_fillers()
    {
        let reservations = Reservations::new().with_chunk(Space::Old, 8 + 16 + 8);
        let (mut heap, mut allocator) = setup(reservations);
        let a = allocator.allocate(&mut heap, Space::Old, 8).unwrap();
        write_header(&mut heap, a);
        allocator.set_alignment(Alignment::Double);
        let b = allocator.allocate(&mut heap, Space::Old, 16).unwrap();
        assert!(b.is_aligned(16));
        assert_eq!(b, a.offset(16));
        let filler = layout::header_word(ObjectKind::Filler);
        assert_eq!(heap.read_word(a.offset(8)).unwrap(), filler);
        assert!(allocator.reservations_are_fully_used());
    }

    #[test]
    fn last_alignment_prefix_wins()
    {
        let reservations = Reservations::new().with_chunk(Space::Old, 64);
        let (mut heap, mut allocator) = setup(reservations);
        allocator.allocate(&mut heap, Space::Old, 8).unwrap();
        allocator.set_alignment(Alignment::Code);
        allocator.set_alignment(Alignment::DoubleUnaligned);
        let b = allocator.allocate(&mut heap, Space::Old, 8).unwrap();
        assert_eq!(b.0 % 16, 8);
        assert_eq!(allocator.next_alignment, Alignment::Word);
    }

    #[test]
    fn type_descriptors_are_indexed()
    {
        let size = layout::TYPE_DESCRIPTOR_SIZE;
        let reservations = Reservations::new().with_chunk(Space::TypeDescriptor, 2 * size);
        let (mut heap, mut allocator) = setup(reservations);
        assert!(allocator.allocate(&mut heap, Space::TypeDescriptor, size - 8).is_err());
        let a = allocator.allocate(&mut heap, Space::TypeDescriptor, size).unwrap();
        write_header(&mut heap, a);
        assert!(!allocator.reservations_are_fully_used());
        assert_eq!(
            allocator.resolve(&heap, Space::TypeDescriptor, BackReference::Index(0))
                .unwrap().address(),
            a,
        );
        assert!(allocator.resolve(&heap, Space::TypeDescriptor, BackReference::Index(1)).is_err());
        allocator.allocate(&mut heap, Space::TypeDescriptor, size).unwrap();
        assert!(allocator.allocate(&mut heap, Space::TypeDescriptor, size).is_err());
    }

    #[test]
    fn chunks_are_switched_explicitly()
    {
        let reservations = Reservations::new()
            .with_chunk(Space::Young, 8)
            .with_chunk(Space::Young, 8);
        let (mut heap, mut allocator) = setup(reservations);
        let a = allocator.allocate(&mut heap, Space::Young, 8).unwrap();
        assert!(allocator.allocate(&mut heap, Space::Young, 8).is_err());
        allocator.move_to_next_chunk(Space::Young).unwrap();
        let b = allocator.allocate(&mut heap, Space::Young, 8).unwrap();
        assert_eq!(a.chunk() + 1, b.chunk());
        assert!(allocator.move_to_next_chunk(Space::Young).is_err());
    }

    #[test]
    fn weak_flag_is_one_shot()
    {
        let (_heap, mut allocator) = setup(Reservations::new());
        allocator.set_next_reference_is_weak().unwrap();
        assert!(matches!(
            allocator.set_next_reference_is_weak(),
            Err(Error::Format(FormatError::DuplicateWeakPrefix)),
        ));
        assert!(allocator.take_next_reference_is_weak());
        assert!(!allocator.take_next_reference_is_weak());
    }

    proptest!
    {
        #[test]
        fn allocations_are_disjoint(sizes in proptest::collection::vec(1usize .. 8, 1 .. 20))
        {
            let total = sizes.iter().sum::<usize>() * WORD_SIZE;
            let reservations = Reservations::new().with_chunk(Space::Code, total);
            let (mut heap, mut allocator) = setup(reservations);
            let mut expected = None;
            for &words in &sizes {
                let address = allocator.allocate(&mut heap, Space::Code, words * WORD_SIZE).unwrap();
                if let Some(expected) = expected {
                    assert_eq!(address, expected);
                }
                expected = Some(address.offset(words * WORD_SIZE));
            }
            assert!(allocator.reservations_are_fully_used());
        }
    }
}
