use {
    super::{Address, space::OFF_HEAP_REGION},
    crate::{Error, Result},
};

/// Memory outside of the garbage-collected spaces.
///
/// Each allocation is a separate block, addressed as a chunk
/// of the off-heap region. Blocks are never freed.
pub (super) struct OffHeap
{
    blocks: Vec<Vec<u8>>,

    /// Bytes that may still be handed out for backing stores.
    budget: Option<usize>,
}

impl OffHeap
{
    pub fn new(budget: Option<usize>) -> Self
    {
        Self{blocks: Vec::new(), budget}
    }

    /// Allocate a zeroed block.
    ///
    /// Budgeted allocations count against the limit given to [`new`],
    /// and fail once it has been reached.
    ///
    /// [`new`]: `Self::new`
    pub fn allocate(&mut self, len: usize, budgeted: bool) -> Result<Address>
    {
        let exhausted = || Error::ResourceExhausted{requested: len};

        let chunk = u16::try_from(self.blocks.len()).map_err(|_| exhausted())?;
        if u32::try_from(len).is_err() {
            return Err(exhausted());
        }

        if budgeted {
            if let Some(budget) = &mut self.budget {
                *budget = budget.checked_sub(len).ok_or_else(exhausted)?;
            }
        }

        self.blocks.push(vec![0; len]);
        Ok(Address::compose(OFF_HEAP_REGION, chunk, 0))
    }

    pub fn block(&self, chunk: u16) -> Option<&[u8]>
    {
        self.blocks.get(chunk as usize).map(Vec::as_slice)
    }

    pub fn block_mut(&mut self, chunk: u16) -> Option<&mut [u8]>
    {
        self.blocks.get_mut(chunk as usize).map(Vec::as_mut_slice)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn budget_is_enforced()
    {
        let mut off_heap = OffHeap::new(Some(100));
        off_heap.allocate(60, true).unwrap();
        assert!(matches!(
            off_heap.allocate(41, true),
            Err(Error::ResourceExhausted{requested: 41}),
        ));
        off_heap.allocate(40, true).unwrap();
        off_heap.allocate(1000, false).unwrap();
    }

    #[test]
    fn blocks_are_distinct()
    {
        let mut off_heap = OffHeap::new(None);
        let a = off_heap.allocate(8, true).unwrap();
        let b = off_heap.allocate(8, true).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.region(), OFF_HEAP_REGION);
        assert_eq!(off_heap.block(b.chunk()).map(<[u8]>::len), Some(8));
    }
}
