//! Addresses that live outside the heap.
//!
//! Snapshots cannot contain process-level addresses,
//! such as those of native functions, because they differ per process.
//! Instead they refer to them by index into tables the host provides.

use crate::heap::Address;

/// Addresses of functions and variables inside the runtime.
#[derive(Clone, Debug, Default)]
pub struct ExternalReferenceTable
{
    addresses: Vec<Address>,
}

impl ExternalReferenceTable
{
    /// Create a table with the given addresses.
    pub fn new(addresses: Vec<Address>) -> Self
    {
        Self{addresses}
    }

    /// The address with the given identifier.
    pub fn address(&self, id: u32) -> Option<Address>
    {
        self.addresses.get(id as usize).copied()
    }

    /// The number of addresses in the table.
    pub fn len(&self) -> usize
    {
        self.addresses.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool
    {
        self.addresses.is_empty()
    }
}

/// Addresses of callbacks and resources supplied by the embedder.
#[derive(Clone, Debug, Default)]
pub enum ApiReferences
{
    /// The embedder declined to supply references.
    ///
    /// Every embedder reference then resolves to [`NO_API_REFERENCES`].
    #[default]
    NotProvided,

    /// The embedder supplied these references.
    Provided(Vec<Address>),
}

/// Address written in place of embedder references
/// when the embedder did not supply any.
///
/// Calling through this address ends up in
/// [`no_api_references_callback`].
pub const NO_API_REFERENCES: Address = Address(0xdead << 32);

/// Target of [`NO_API_REFERENCES`].
///
/// # Panics
///
/// Always. An object that needs embedder references
/// was deserialized without any being supplied.
pub fn no_api_references_callback() -> !
{
    panic!("No external references provided via API");
}

/// Builtins whose instructions are packaged outside the heap.
#[derive(Clone, Debug)]
pub struct EmbeddedBlob
{
    instruction_starts: Vec<Address>,
}

impl EmbeddedBlob
{
    /// Create a blob with the given builtin entry points.
    pub fn new(instruction_starts: Vec<Address>) -> Self
    {
        Self{instruction_starts}
    }

    /// The address of the first instruction of a builtin.
    pub fn instruction_start_of_builtin(&self, builtin: u32) -> Option<Address>
    {
        self.instruction_starts.get(builtin as usize).copied()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn sentinel_is_outside_the_heap()
    {
        assert_eq!(NO_API_REFERENCES.region(), 0);
        assert!(!NO_API_REFERENCES.is_null());
    }

    #[test]
    #[should_panic(expected = "No external references")]
    fn sentinel_callback_aborts()
    {
        no_api_references_callback();
    }

    #[test]
    fn lookups()
    {
        let table = ExternalReferenceTable::new(vec![Address(0x10), Address(0x20)]);
        assert_eq!(table.address(1), Some(Address(0x20)));
        assert_eq!(table.address(2), None);
        let blob = EmbeddedBlob::new(vec![Address(0x1000)]);
        assert_eq!(blob.instruction_start_of_builtin(0), Some(Address(0x1000)));
        assert_eq!(blob.instruction_start_of_builtin(1), None);
    }
}
