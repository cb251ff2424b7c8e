use {
    crate::{
        heap::{Address, Space},
        object::ObjectKind,
        snapshot::BackReference,
    },
    thiserror::Error,
};

/// Result type with [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error returned by deserialization.
///
/// Every error is fatal: once an error has been returned,
/// the heap it was decoding into is poisoned
/// and must not be used anymore (see [`Heap::is_poisoned`]).
///
/// [`Heap::is_poisoned`]: `crate::heap::Heap::is_poisoned`
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error
{
    #[error("Malformed snapshot: {0}")]
    Format(#[from] FormatError),

    #[error("Reservation for the {space:?} space is exhausted: {reason}")]
    ReservationExhausted{space: Space, reason: &'static str},

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Cannot allocate {requested} bytes of off-heap memory")]
    ResourceExhausted{requested: usize},

    #[error("Address {0:?} does not lie within any chunk")]
    BadAddress(Address),
}

/// The snapshot does not follow the wire format.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FormatError
{
    #[error("Unexpected end of data at position {position}")]
    UnexpectedEnd{position: usize},

    #[error("Unknown opcode {byte:#04x} at position {position}")]
    UnknownOpcode{byte: u8, position: usize},

    #[error("Unknown space {0}")]
    UnknownSpace(u8),

    #[error("Expected {expected} opcode at position {position}")]
    ExpectedOpcode{expected: &'static str, position: usize},

    #[error("Synchronize opcode inside an object body")]
    UnexpectedSynchronize,

    #[error("Relocation opcode outside of relocation processing")]
    UnexpectedRelocationOpcode,

    #[error("Deferred opcode not directly after an object header")]
    MisplacedDeferred,

    #[error("Deferred opcode while completing deferred objects")]
    NestedDeferral,

    #[error("Object {object:?} was never deferred")]
    ObjectNotDeferred{object: Address},

    #[error("{count} deferred objects were never completed")]
    IncompleteDeferredObjects{count: usize},

    #[error("Raw code opcode not directly after a code object header")]
    MisplacedRawCode,

    #[error("Invalid back reference {reference:?} into the {space:?} space")]
    InvalidBackReference{space: Space, reference: BackReference},

    #[error("Index {index} is out of range for the {table}")]
    IndexOutOfRange{table: &'static str, index: u32},

    #[error("Immortal object {object:?} lives in the young space")]
    YoungImmortalObject{object: Address},

    #[error("Hot object cache entry {index} is empty")]
    EmptyHotObject{index: u8},

    #[error("Invalid repeat count {0}")]
    InvalidRepeatCount(u32),

    #[error("Write of {len} bytes at {current:?} exceeds limit {limit:?}")]
    SpanOverrun{current: Address, len: usize, limit: Address},

    #[error("Decoding stopped at {current:?} instead of {limit:?}")]
    SpanMismatch{current: Address, limit: Address},

    #[error("Weak prefix while the next reference is already weak")]
    DuplicateWeakPrefix,

    #[error("Weak prefix followed by a non-reference write")]
    UnconsumedWeakPrefix,

    #[error("Object {object:?} has an invalid header")]
    InvalidHeader{object: Address},

    #[error("Object {object:?} is malformed: {reason}")]
    MalformedObject{object: Address, reason: &'static str},

    #[error("Object {object:?} of kind {kind:?} is misaligned")]
    Misaligned{object: Address, kind: ObjectKind},

    #[error("Object {object:?} of kind {kind:?} is in the {space:?} space")]
    WrongSpace{object: Address, kind: ObjectKind, space: Space},

    #[error("Invalid relocation mode {0}")]
    InvalidRelocationMode(u8),

    #[error("Code contains a runtime entry relocation")]
    RuntimeEntryRelocation,

    #[error("Relocation at pc offset {pc_offset} is outside the instructions")]
    RelocationOutOfBounds{pc_offset: u32},

    #[error("Embedded object reference is weak")]
    WeakEmbeddedObject,

    #[error("Backing store index {0} is out of range")]
    BackingStoreIndexOutOfRange(i64),

    #[error("Unexpected trailing data at position {position}")]
    TrailingData{position: usize},
}

/// The host did not supply what the snapshot needs.
#[allow(missing_docs)]
#[derive(Debug, Eq, Error, PartialEq)]
pub enum ConfigurationError
{
    #[error("Embedder reference {index} is out of range; {count} registered")]
    ApiReferenceOutOfRange{index: u32, count: usize},

    #[error("External string needs embedder reference {index}, \
             but no embedder references were provided")]
    MissingApiReferences{index: u32},

    #[error("Code refers to builtins, but there is no embedded blob")]
    NoEmbeddedBlob,

    #[error("Rehashing is neither enabled nor required")]
    RehashNotPermitted,

    #[error("Unknown native source {0}")]
    UnknownNativeSource(i64),
}
