use crate::{object::ObjectRef, snapshot::HOT_OBJECT_COUNT};

const CAPACITY: usize = HOT_OBJECT_COUNT as usize;

/// Ring of objects recently looked up by back reference or root index.
///
/// Entry zero is the most recently added object.
#[derive(Debug, Default)]
pub (super) struct HotObjects
{
    entries: [Option<ObjectRef>; CAPACITY],

    /// Where the next object goes.
    next: usize,
}

impl HotObjects
{
    pub fn add(&mut self, object: ObjectRef)
    {
        self.entries[self.next] = Some(object);
        self.next = (self.next + 1) % CAPACITY;
    }

    /// The object added `index` additions ago.
    pub fn get(&self, index: u8) -> Option<ObjectRef>
    {
        let index = index as usize;
        if index >= CAPACITY {
            return None;
        }
        self.entries[(self.next + CAPACITY - 1 - index) % CAPACITY]
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::heap::Address, proptest::proptest};

    fn object(n: u64) -> ObjectRef
    {
        ObjectRef::from_address(Address(n << 3))
    }

    #[test]
    fn empty()
    {
        let hot = HotObjects::default();
        for index in 0 .. HOT_OBJECT_COUNT {
            assert_eq!(hot.get(index), None);
        }
    }

    #[test]
    fn ninth_overwrites_first()
    {
        let mut hot = HotObjects::default();
        for n in 1 ..= 9 {
            hot.add(object(n));
        }
        assert_eq!(hot.get(0), Some(object(9)));
        assert_eq!(hot.get(7), Some(object(2)));
        assert_eq!(hot.get(8), None);
    }

    proptest!
    {
        #[test]
        fn index_counts_back_from_newest(count in 1u64 .. 40, index in 0u8 .. 8)
        {
            let mut hot = HotObjects::default();
            for n in 0 .. count {
                hot.add(object(n));
            }
            let expected = count.checked_sub(1 + index as u64).map(object);
            assert_eq!(hot.get(index), expected);
        }
    }
}
