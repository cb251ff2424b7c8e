//! The runtime instance that snapshots are restored into.

use crate::{
    config::Flags,
    external::{ApiReferences, EmbeddedBlob, ExternalReferenceTable},
    heap::{Address, Heap},
    object::ObjectRef,
};

/// Runtime instance that owns one heap.
///
/// Besides the heap, the isolate holds the tables that snapshots
/// refer to by index. The host fills these in before deserializing.
pub struct Isolate
{
    /// The heap objects are restored into.
    pub heap: Heap,

    /// Well-known objects.
    ///
    /// The first [`ROOT_CONSTANT_COUNT`] roots can be referred to
    /// with a single byte, and must not live in the young space.
    ///
    /// [`ROOT_CONSTANT_COUNT`]: `crate::snapshot::ROOT_CONSTANT_COUNT`
    pub roots: Vec<ObjectRef>,

    /// Objects in the read-only space shared between snapshots.
    pub read_only_object_cache: Vec<ObjectRef>,

    /// Objects shared between the startup snapshot and context snapshots.
    pub partial_snapshot_cache: Vec<ObjectRef>,

    /// Addresses inside the runtime.
    pub external_references: ExternalReferenceTable,

    /// Addresses supplied by the embedder.
    pub api_references: ApiReferences,

    /// Builtins packaged outside the heap, if any.
    pub embedded_blob: Option<EmbeddedBlob>,

    /// Resources of built-in script sources.
    pub natives: Vec<Address>,

    /// Flags set by the host.
    pub flags: Flags,
}

impl Isolate
{
    /// Create an isolate with an empty heap and empty tables.
    pub fn new(flags: Flags) -> Self
    {
        Self{
            heap:                   Heap::new(flags.hash_seed, flags.max_off_heap_bytes),
            roots:                  Vec::new(),
            read_only_object_cache: Vec::new(),
            partial_snapshot_cache: Vec::new(),
            external_references:    ExternalReferenceTable::default(),
            api_references:         ApiReferences::NotProvided,
            embedded_blob:          None,
            natives:                Vec::new(),
            flags,
        }
    }

    /// The root with the given index.
    pub fn root(&self, index: u32) -> Option<ObjectRef>
    {
        self.roots.get(index as usize).copied()
    }
}
