use crate::heap::Space;

/// Memory to reserve before decoding a snapshot.
///
/// The encoder knows exactly how much memory each space needs,
/// and in how many chunks; objects in a chunk are found back
/// by their offset from the start of that chunk.
/// For the type descriptor space, the chunk sizes only determine
/// how many descriptors can be allocated.
/// Large objects are always allocated individually,
/// so reservations for the large object space are ignored.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reservations
{
    chunks: [Vec<usize>; Space::COUNT],
}

impl Reservations
{
    /// Reserve nothing.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Add a chunk of `size` bytes to a space.
    pub fn with_chunk(mut self, space: Space, size: usize) -> Self
    {
        self.add_chunk(space, size);
        self
    }

    /// Add a chunk of `size` bytes to a space.
    pub fn add_chunk(&mut self, space: Space, size: usize)
    {
        self.chunks[space.index()].push(size);
    }

    /// Sizes of the chunks reserved for a space.
    pub fn chunks(&self, space: Space) -> &[usize]
    {
        &self.chunks[space.index()]
    }
}
