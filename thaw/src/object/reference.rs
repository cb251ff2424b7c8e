//! Tagging of words in heap memory.
//!
//! Every slot in the heap holds one word.
//! The low bits of the word say how to interpret the rest:
//!
//! | Low bits | Meaning                                   |
//! |----------|-------------------------------------------|
//! | `x0`     | small integer in the upper 63 bits        |
//! | `01`     | strong reference to the object at `w & !3` |
//! | `11`     | weak reference to the object at `w & !3`   |
//!
//! The word `3` (a weak reference to address zero)
//! denotes a weak reference whose object has been collected.
//!
//! This module is the only place that knows about these bit patterns;
//! everything else speaks in terms of [`Reference`] and small integers.

use {crate::heap::Address, std::fmt};

const SMI_TAG_MASK: u64 = 0b01;
const REFERENCE_TAG_MASK: u64 = 0b11;
const STRONG_TAG: u64 = 0b01;
const WEAK_TAG: u64 = 0b11;
const CLEARED_WEAK_WORD: u64 = WEAK_TAG;

/// Untagged reference to a heap object.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectRef
{
    address: Address,
}

impl ObjectRef
{
    /// Refer to the object that starts at the given address.
    pub fn from_address(address: Address) -> Self
    {
        Self{address}
    }

    /// The address at which the object starts.
    pub fn address(self) -> Address
    {
        self.address
    }

    /// The address of the field at the given byte offset.
    pub fn field(self, offset: usize) -> Address
    {
        self.address.offset(offset)
    }
}

impl fmt::Debug for ObjectRef
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "ObjectRef({:#x})", self.address.0)
    }
}

/// Reference as written into a slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Reference
{
    /// Reference that keeps the object alive.
    Strong(ObjectRef),

    /// Reference that does not keep the object alive.
    Weak(ObjectRef),

    /// Weak reference whose object was already collected.
    ClearedWeak,
}

impl Reference
{
    /// Create a strong or weak reference.
    pub fn new(object: ObjectRef, weak: bool) -> Self
    {
        if weak { Self::Weak(object) } else { Self::Strong(object) }
    }

    /// The referenced object, unless cleared.
    pub fn object(self) -> Option<ObjectRef>
    {
        match self {
            Self::Strong(object) | Self::Weak(object) => Some(object),
            Self::ClearedWeak => None,
        }
    }

    /// Whether the reference is weak, including cleared.
    pub fn is_weak(self) -> bool
    {
        !matches!(self, Self::Strong(..))
    }

    /// Encode the reference as a tagged word.
    pub fn to_word(self) -> u64
    {
        match self {
            Self::Strong(object) => object.address().0 | STRONG_TAG,
            Self::Weak(object)   => object.address().0 | WEAK_TAG,
            Self::ClearedWeak    => CLEARED_WEAK_WORD,
        }
    }

    /// Decode a tagged word.
    ///
    /// Returns [`None`] if the word is a small integer.
    pub fn from_word(word: u64) -> Option<Self>
    {
        if word & SMI_TAG_MASK == 0 {
            return None;
        }
        if word == CLEARED_WEAK_WORD {
            return Some(Self::ClearedWeak);
        }
        let object = ObjectRef::from_address(Address(word & !REFERENCE_TAG_MASK));
        if word & REFERENCE_TAG_MASK == WEAK_TAG {
            Some(Self::Weak(object))
        } else {
            Some(Self::Strong(object))
        }
    }
}

/// Encode a small integer as a tagged word.
///
/// The most significant bit of `value` is lost.
pub fn smi_to_word(value: i64) -> u64
{
    (value << 1) as u64
}

/// Decode a tagged word as a small integer.
///
/// Returns [`None`] if the word is a reference.
pub fn word_to_smi(word: u64) -> Option<i64>
{
    if word & SMI_TAG_MASK == 0 {
        Some(word as i64 >> 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn cleared_weak_is_not_a_null_reference()
    {
        assert_eq!(Reference::from_word(3), Some(Reference::ClearedWeak));
        assert_eq!(Reference::from_word(1),
            Some(Reference::Strong(ObjectRef::from_address(Address::NULL))));
    }

    #[test]
    fn zero_is_smi_zero()
    {
        assert_eq!(Reference::from_word(0), None);
        assert_eq!(word_to_smi(0), Some(0));
    }

    proptest!
    {
        #[test]
        fn references_keep_their_strength(words in 1u64 .. 1 << 60, weak: bool)
        {
            let object = ObjectRef::from_address(Address(words << 3));
            let reference = Reference::new(object, weak);
            let decoded = Reference::from_word(reference.to_word()).unwrap();
            assert_eq!(decoded, reference);
            assert_eq!(decoded.is_weak(), weak);
            assert_eq!(word_to_smi(reference.to_word()), None);
        }

        #[test]
        fn smis_are_not_references(value in -(1i64 << 61) .. 1 << 61)
        {
            let word = smi_to_word(value);
            assert_eq!(Reference::from_word(word), None);
            assert_eq!(word_to_smi(word), Some(value));
        }
    }
}
