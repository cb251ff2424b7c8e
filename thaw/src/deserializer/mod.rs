//! Decoding of snapshots into the heap.
//!
//! A [`Deserializer`] reads one snapshot and materializes its objects
//! in the heap of an [`Isolate`]. The host drives it as follows:
//!
//!  1. Create the deserializer with the reservations of the snapshot.
//!  2. Decode the roots, using [`visit_root_pointers`] or [`read_root`],
//!     calling [`synchronize`] between groups of roots.
//!  3. Complete deferred objects with [`decode_deferred_objects`].
//!  4. Rebuild hash tables with [`rehash`], if rehashing is enabled.
//!  5. Call [`finish`] to check the snapshot was consumed entirely
//!     and to obtain the lists of new objects.
//!
//! Any error is fatal to the heap; see [`Heap::is_poisoned`].
//!
//! [`visit_root_pointers`]: `Deserializer::visit_root_pointers`
//! [`read_root`]: `Deserializer::read_root`
//! [`synchronize`]: `Deserializer::synchronize`
//! [`decode_deferred_objects`]: `Deserializer::decode_deferred_objects`
//! [`rehash`]: `Deserializer::rehash`
//! [`finish`]: `Deserializer::finish`
//! [`Heap::is_poisoned`]: `crate::heap::Heap::is_poisoned`

use {
    self::{allocator::Allocator, hot_objects::HotObjects},
    crate::{
        ConfigurationError,
        Error,
        FormatError,
        Result,
        external::{ApiReferences, NO_API_REFERENCES},
        heap::{Address, Space, WORD_SIZE},
        isolate::Isolate,
        object::{ObjectKind, ObjectRef, Reference, hash_table, layout},
        snapshot::{BackReference, DeferredEntry, Opcode, Reservations, SnapshotByteSource},
    },
    std::{collections::BTreeMap, mem},
    tracing::{debug, error, info, instrument, trace, warn},
};

pub mod code;

mod allocator;
mod hot_objects;
mod post_process;


/// What kind of snapshot is being decoded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeserializerMode
{
    /// The snapshot the runtime starts up from.
    #[default]
    Startup,

    /// Compiled user code.
    ///
    /// Strings are canonicalized against the heap's string table,
    /// and hash tables are always rehashed.
    UserCode,
}

/// Settings for one deserialization.
#[derive(Clone, Debug, Default)]
pub struct DeserializerOptions
{
    /// What kind of snapshot is being decoded.
    pub mode: DeserializerMode,

    /// Whether the snapshot was made such that it can be rehashed.
    pub can_rehash: bool,

    /// Objects the host attaches to the snapshot.
    pub attached_objects: Vec<ObjectRef>,
}

/// Objects of interest created by a deserialization.
#[derive(Clone, Debug, Default)]
pub struct Deserialized
{
    /// Code objects from user code or in the large object space.
    pub new_code_objects: Vec<ObjectRef>,

    /// Type descriptors, if the `trace_maps` flag is set.
    pub new_maps: Vec<ObjectRef>,

    /// Scripts from user code.
    pub new_scripts: Vec<ObjectRef>,

    /// Internalized strings from user code that became canonical.
    pub new_internalized_strings: Vec<ObjectRef>,

    /// Allocation sites from user code.
    pub new_allocation_sites: Vec<ObjectRef>,

    /// Off-heap backing stores, in the order they were decoded.
    pub backing_stores: Vec<Address>,

    /// Objects allocated in the large object space.
    pub large_objects: Vec<ObjectRef>,
}

/// State of decoding one snapshot.
pub struct Deserializer<'i, 's>
{
    isolate: &'i mut Isolate,
    source: SnapshotByteSource<'s>,
    allocator: Allocator,
    hot_objects: HotObjects,
    attached_objects: Vec<ObjectRef>,
    mode: DeserializerMode,
    can_rehash: bool,

    /// Objects whose contents were deferred and are not yet decoded,
    /// with their allocated sizes.
    deferred: BTreeMap<ObjectRef, usize>,
    in_deferred_pass: bool,

    /// Code object whose header fields are being decoded.
    code_header_of: Option<ObjectRef>,

    /// Off-heap backing stores, by placeholder index.
    ///
    /// Index zero is the null address, so that a zeroed
    /// placeholder means there is no backing store.
    backing_stores: Vec<Address>,

    to_rehash: Vec<ObjectRef>,

    /// Instructions written, for the instruction cache flush.
    code_ranges: Vec<(Address, usize)>,

    deserialized: Deserialized,
}

impl<'i, 's> Deserializer<'i, 's>
{
    /// Prepare to decode a snapshot into an isolate.
    ///
    /// This allocates all memory listed in the reservations.
    pub fn new(
        isolate: &'i mut Isolate,
        data: &'s [u8],
        reservations: &Reservations,
        options: DeserializerOptions,
    ) -> Result<Self>
    {
        let allocator = Allocator::new(&mut isolate.heap, reservations)?;

        debug!(len = data.len(), mode = ?options.mode, "deserializer created");

        Ok(Self{
            isolate,
            source:           SnapshotByteSource::new(data),
            allocator,
            hot_objects:      HotObjects::default(),
            attached_objects: options.attached_objects,
            mode:             options.mode,
            can_rehash:       options.can_rehash,
            deferred:         BTreeMap::new(),
            in_deferred_pass: false,
            code_header_of:   None,
            backing_stores:   vec![Address::NULL],
            to_rehash:        Vec::new(),
            code_ranges:      Vec::new(),
            deserialized:     Deserialized::default(),
        })
    }

    /// The isolate being decoded into.
    pub fn isolate(&self) -> &Isolate
    {
        &*self.isolate
    }

    /// The offset of the next byte of the snapshot to be read.
    pub fn position(&self) -> usize
    {
        self.source.position()
    }

    /// Poison the heap if the result is an error.
    fn poison_on_error<T>(&mut self, result: Result<T>) -> Result<T>
    {
        if let Err(err) = &result {
            error!(%err, position = self.source.position(), "deserialization failed");
            self.isolate.heap.poison();
        }
        result
    }

    /* -------------------------------------------------------------------- */
    /*                              Entry points                            */
    /* -------------------------------------------------------------------- */

    /// Fill the slots in `[start, end)`.
    ///
    /// `host` is the object the slots belong to, if any.
    /// References from the slots to young objects are recorded
    /// if `host` is given and `space` is neither the young nor the
    /// code space.
    ///
    /// Returns `false` if decoding the host's contents was deferred.
    pub fn decode_span(
        &mut self,
        start: Address,
        end: Address,
        space: Space,
        host: Option<ObjectRef>,
    ) -> Result<bool>
    {
        let result = self.read_data(start, end, space, host);
        self.poison_on_error(result)
    }

    /// Fill root slots in `[start, end)`, which lie outside any object.
    pub fn visit_root_pointers(&mut self, start: Address, end: Address) -> Result<()>
    {
        let result = self.read_data(start, end, Space::Young, None)
            .and_then(|filled| if filled {
                Ok(())
            } else {
                Err(FormatError::MisplacedDeferred.into())
            });
        self.poison_on_error(result)
    }

    /// Decode a single reference.
    pub fn read_root(&mut self) -> Result<Reference>
    {
        let result = self.read_object_reference();
        self.poison_on_error(result)
    }

    /// Consume the marker between groups of roots.
    pub fn synchronize(&mut self) -> Result<()>
    {
        let position = self.source.position();
        let result = match self.source.next_opcode() {
            Ok(Opcode::Synchronize) => Ok(()),
            Ok(..) => Err(FormatError::ExpectedOpcode{expected: "synchronize", position}.into()),
            Err(err) => Err(err.into()),
        };
        self.poison_on_error(result)
    }

    /// Decode the contents of deferred objects.
    ///
    /// This must be called once, after all roots were decoded.
    #[instrument(skip_all, name = "deferred")]
    pub fn decode_deferred_objects(&mut self) -> Result<()>
    {
        self.in_deferred_pass = true;
        let result = self.read_deferred_objects();
        self.in_deferred_pass = false;
        self.poison_on_error(result)
    }

    /// Rebuild hash tables whose layout depends on hashes.
    ///
    /// Only allowed if the snapshot can be rehashed or is user code.
    #[instrument(skip_all, name = "rehash")]
    pub fn rehash(&mut self) -> Result<()>
    {
        let result = self.rehash_tables();
        self.poison_on_error(result)
    }

    /// Check that the snapshot was consumed entirely,
    /// and return the objects of interest.
    pub fn finish(mut self) -> Result<Deserialized>
    {
        let result = self.check_complete();
        self.poison_on_error(result)?;

        if !self.code_ranges.is_empty() {
            let ranges = mem::take(&mut self.code_ranges);
            self.isolate.heap.flush_instruction_cache(ranges);
        }

        self.log_new_object_events();

        let mut deserialized = mem::take(&mut self.deserialized);
        deserialized.backing_stores = self.backing_stores.split_off(1);
        deserialized.large_objects = self.allocator.large_objects().to_vec();

        info!(
            bytes = self.source.position(),
            code_objects = deserialized.new_code_objects.len(),
            backing_stores = deserialized.backing_stores.len(),
            "deserialization complete",
        );

        Ok(deserialized)
    }

    fn check_complete(&mut self) -> Result<()>
    {
        while self.source.has_more() {
            let position = self.source.position();
            match self.source.next_opcode() {
                Ok(Opcode::Nop) => (),
                _ => return Err(FormatError::TrailingData{position}.into()),
            }
        }

        if !self.deferred.is_empty() {
            let count = self.deferred.len();
            return Err(FormatError::IncompleteDeferredObjects{count}.into());
        }

        if self.allocator.next_reference_is_weak() {
            return Err(FormatError::UnconsumedWeakPrefix.into());
        }

        if !self.allocator.reservations_are_fully_used() {
            warn!("reserved memory was not fully used");
        }

        Ok(())
    }

    fn log_new_object_events(&self)
    {
        for code in &self.deserialized.new_code_objects {
            debug!(?code, "code object created");
        }
        for map in &self.deserialized.new_maps {
            let instance_kind = self.isolate.heap
                .read_smi_field(*map, layout::type_descriptor::INSTANCE_KIND)
                .ok();
            debug!(?map, ?instance_kind, "map created");
        }
        for script in &self.deserialized.new_scripts {
            debug!(?script, "script created");
        }
    }

    /* -------------------------------------------------------------------- */
    /*                               Decoding                               */
    /* -------------------------------------------------------------------- */

    /// Fill the slots in `[start, limit)`.
    ///
    /// Returns `false` if the host's contents were deferred.
    fn read_data(
        &mut self,
        start: Address,
        limit: Address,
        space: Space,
        host: Option<ObjectRef>,
    ) -> Result<bool>
    {
        let barrier_needed =
            host.is_some() && !matches!(space, Space::Young | Space::Code);

        let mut current = start;
        while current < limit {
            let opcode = self.source.next_opcode()?;

            if self.allocator.next_reference_is_weak()
                && !opcode.takes_weak_prefix()
                && !opcode.is_transparent()
                && opcode != Opcode::WeakPrefix
            {
                return Err(FormatError::UnconsumedWeakPrefix.into());
            }

            match opcode {
                Opcode::NewObject{..}
                | Opcode::BackReference{..}
                | Opcode::RootArray{..}
                | Opcode::PartialSnapshotCache{..}
                | Opcode::ReadOnlyObjectCache{..}
                | Opcode::AttachedReference{..}
                | Opcode::RootConstant{..}
                | Opcode::HotObject{..} => {
                    self.check_room(current, WORD_SIZE, limit)?;
                    let weak = self.allocator.take_next_reference_is_weak();
                    let object = self.read_reference_target(opcode)?;
                    let reference = Reference::new(object, weak);
                    self.write_slot(current, reference, host, barrier_needed)?;
                    current = current.offset(WORD_SIZE);
                },

                Opcode::ExternalReference{id} => {
                    let address = self.external_reference(id)?;
                    self.check_room(current, WORD_SIZE, limit)?;
                    self.isolate.heap.write_word(current, address.0)?;
                    current = current.offset(WORD_SIZE);
                },

                Opcode::ApiReference{id} => {
                    let address = self.api_reference(id)?;
                    self.check_room(current, WORD_SIZE, limit)?;
                    self.isolate.heap.write_word(current, address.0)?;
                    current = current.offset(WORD_SIZE);
                },

                Opcode::InternalReference{..} | Opcode::OffHeapTarget{..} =>
                    return Err(FormatError::UnexpectedRelocationOpcode.into()),

                Opcode::Nop => (),

                Opcode::NextChunk{space} =>
                    self.allocator.move_to_next_chunk(space)?,

                Opcode::Deferred => {
                    self.defer(current, limit, host)?;
                    return Ok(false);
                },

                Opcode::Synchronize =>
                    return Err(FormatError::UnexpectedSynchronize.into()),

                Opcode::RawData{bytes} => {
                    self.check_room(current, bytes.len(), limit)?;
                    self.isolate.heap.write_bytes(current, bytes)?;
                    current = current.offset(bytes.len());
                },

                Opcode::RawCode{bytes} =>
                    current = self.read_raw_code(current, limit, space, host, bytes)?,

                Opcode::Repeat{count} =>
                    current = self.read_repeated_object(
                        current, limit, count, host, barrier_needed)?,

                Opcode::OffHeapBackingStore{bytes} =>
                    self.read_backing_store(bytes)?,

                Opcode::ClearedWeakReference => {
                    self.check_room(current, WORD_SIZE, limit)?;
                    self.isolate.heap.write_reference(current, Reference::ClearedWeak)?;
                    current = current.offset(WORD_SIZE);
                },

                Opcode::WeakPrefix =>
                    self.allocator.set_next_reference_is_weak()?,

                Opcode::AlignmentPrefix(alignment) =>
                    self.allocator.set_alignment(alignment),
            }
        }

        if current != limit {
            return Err(FormatError::SpanMismatch{current, limit}.into());
        }

        Ok(true)
    }

    /// Check that `len` bytes at `current` do not cross `limit`.
    fn check_room(&self, current: Address, len: usize, limit: Address) -> Result<()>
    {
        if current.offset(len) > limit || current.offset(len) < current {
            return Err(FormatError::SpanOverrun{current, len, limit}.into());
        }
        Ok(())
    }

    /// Write a reference into a slot, recording it if needed.
    fn write_slot(
        &mut self,
        slot: Address,
        reference: Reference,
        host: Option<ObjectRef>,
        barrier_needed: bool,
    ) -> Result<()>
    {
        let heap = &mut self.isolate.heap;
        heap.write_reference(slot, reference)?;
        if let (true, Some(host), Some(target)) = (barrier_needed, host, reference.object()) {
            if heap.in_young_generation(target.address()) {
                heap.record_write(host, slot);
            }
        }
        Ok(())
    }

    /// Find the object that a reference opcode refers to.
    fn read_reference_target(&mut self, opcode: Opcode) -> Result<ObjectRef>
    {
        match opcode {
            Opcode::NewObject{space, size_in_words} =>
                self.read_object(space, size_in_words),

            Opcode::BackReference{space, reference} =>
                self.resolve_back_reference(space, reference),

            Opcode::RootArray{index} => {
                let object = lookup(&self.isolate.roots, "root table", index)?;
                self.hot_objects.add(object);
                Ok(object)
            },

            Opcode::PartialSnapshotCache{index} =>
                lookup(&self.isolate.partial_snapshot_cache, "partial snapshot cache", index),

            Opcode::ReadOnlyObjectCache{index} => {
                let cache = &self.isolate.read_only_object_cache;
                let object = lookup(cache, "read-only object cache", index)?;
                self.check_not_young(object)
            },

            Opcode::AttachedReference{index} =>
                lookup(&self.attached_objects, "attached objects", index),

            Opcode::RootConstant{index} => {
                let object = lookup(&self.isolate.roots, "root table", index)?;
                self.check_not_young(object)
            },

            Opcode::HotObject{index} =>
                self.hot_objects.get(index)
                    .ok_or(FormatError::EmptyHotObject{index}.into()),

            _ => Err(FormatError::ExpectedOpcode{
                expected: "object reference",
                position: self.source.position(),
            }.into()),
        }
    }

    fn check_not_young(&self, object: ObjectRef) -> Result<ObjectRef>
    {
        if self.isolate.heap.in_young_generation(object.address()) {
            return Err(FormatError::YoungImmortalObject{object: object.address()}.into());
        }
        Ok(object)
    }

    /// Allocate an object and decode its contents.
    ///
    /// Returns the object that references to the new object
    /// should refer to, which is not the new object itself
    /// if it was canonicalized.
    fn read_object(&mut self, space: Space, size_in_words: u32) -> Result<ObjectRef>
    {
        let size = size_in_words as usize * WORD_SIZE;
        let address = self.allocator.allocate(&mut self.isolate.heap, space, size)?;
        let object = ObjectRef::from_address(address);

        let filled = self.read_data(address, address.offset(size), space, Some(object))?;

        let kind = self.isolate.heap.kind_of(object)?;
        let in_code_space = matches!(space, Space::Code | Space::LargeObject);
        let is_code = kind == ObjectKind::Code;
        if (is_code && !in_code_space) || (!is_code && space == Space::Code) {
            return Err(FormatError::WrongSpace{object: address, kind, space}.into());
        }

        if filled {
            self.post_process_new_object(object, space, size)
        } else {
            Ok(object)
        }
    }

    /// Decode one reference that is not written to a slot of its own.
    ///
    /// Only prefixes and opcodes that produce references are accepted.
    fn read_object_reference(&mut self) -> Result<Reference>
    {
        loop {
            let position = self.source.position();
            let opcode = self.source.next_opcode()?;

            if self.allocator.next_reference_is_weak()
                && !opcode.takes_weak_prefix()
                && !opcode.is_transparent()
                && opcode != Opcode::WeakPrefix
            {
                return Err(FormatError::UnconsumedWeakPrefix.into());
            }

            match opcode {
                _ if opcode.takes_weak_prefix()
                    || matches!(opcode, Opcode::RootConstant{..}) => {
                    let weak = self.allocator.take_next_reference_is_weak();
                    let object = self.read_reference_target(opcode)?;
                    return Ok(Reference::new(object, weak));
                },

                Opcode::ClearedWeakReference =>
                    return Ok(Reference::ClearedWeak),

                Opcode::WeakPrefix =>
                    self.allocator.set_next_reference_is_weak()?,

                Opcode::AlignmentPrefix(alignment) =>
                    self.allocator.set_alignment(alignment),

                Opcode::NextChunk{space} =>
                    self.allocator.move_to_next_chunk(space)?,

                Opcode::OffHeapBackingStore{bytes} =>
                    self.read_backing_store(bytes)?,

                Opcode::Nop => (),

                _ => return Err(FormatError::ExpectedOpcode{
                    expected: "object reference",
                    position,
                }.into()),
            }
        }
    }

    fn read_backing_store(&mut self, bytes: &[u8]) -> Result<()>
    {
        let backing_store = self.isolate.heap.allocate_off_heap(bytes.len())?;
        self.isolate.heap.write_bytes(backing_store, bytes)?;
        trace!(?backing_store, len = bytes.len(), "allocated backing store");
        self.backing_stores.push(backing_store);
        Ok(())
    }

    fn resolve_back_reference(&mut self, space: Space, reference: BackReference)
        -> Result<ObjectRef>
    {
        let heap = &self.isolate.heap;
        let mut object = self.allocator.resolve(heap, space, reference)?;

        if self.mode == DeserializerMode::UserCode
            && heap.kind_of(object)? == ObjectKind::ThinString
        {
            object = heap.read_object_field(object, layout::thin_string::ACTUAL)?;
        }

        self.hot_objects.add(object);
        Ok(object)
    }

    fn read_repeated_object(
        &mut self,
        current: Address,
        limit: Address,
        count: u32,
        host: Option<ObjectRef>,
        barrier_needed: bool,
    ) -> Result<Address>
    {
        if count < 2 {
            return Err(FormatError::InvalidRepeatCount(count).into());
        }
        let len = count as usize * WORD_SIZE;
        self.check_room(current, len, limit)?;

        let reference = self.read_object_reference()?;
        for i in 0 .. count as usize {
            let slot = current.offset(i * WORD_SIZE);
            self.write_slot(slot, reference, host, barrier_needed)?;
        }

        Ok(current.offset(len))
    }

    fn read_raw_code(
        &mut self,
        current: Address,
        limit: Address,
        space: Space,
        host: Option<ObjectRef>,
        bytes: &[u8],
    ) -> Result<Address>
    {
        let code = host
            .filter(|&h| current == h.field(layout::HEADER_SIZE))
            .filter(|&h| self.code_header_of != Some(h))
            .ok_or(FormatError::MisplacedRawCode)?;
        if self.isolate.heap.kind_of(code)? != ObjectKind::Code {
            return Err(FormatError::MisplacedRawCode.into());
        }

        let start = code.field(layout::code::DATA_START);
        self.check_room(start, bytes.len(), limit)?;
        self.isolate.heap.write_bytes(start, bytes)?;

        self.read_code_object_body(code, space, bytes.len())?;

        let end = code.field(layout::code::size(bytes.len()));
        if end != limit {
            return Err(FormatError::SpanMismatch{current: end, limit}.into());
        }
        Ok(end)
    }

    /// Handle the deferred opcode at `current`.
    fn defer(&mut self, current: Address, limit: Address, host: Option<ObjectRef>)
        -> Result<()>
    {
        if self.in_deferred_pass {
            return Err(FormatError::NestedDeferral.into());
        }

        let object = host
            .filter(|&h| current == h.field(layout::HEADER_SIZE))
            .filter(|&h| self.code_header_of != Some(h))
            .ok_or(FormatError::MisplacedDeferred)?;

        let heap = &mut self.isolate.heap;
        if heap.kind_of(object)? == ObjectKind::TypeDescriptor {
            // Other objects may look at the instance kind before
            // the descriptor is complete.
            heap.write_smi_field(object, layout::type_descriptor::INSTANCE_KIND,
                                 ObjectKind::Filler.id())?;
        }

        trace!(?object, "deferred object");
        self.deferred.insert(object, limit.distance_from(object.address()));
        Ok(())
    }

    fn read_deferred_objects(&mut self) -> Result<()>
    {
        let mut count = 0usize;
        loop {
            match self.source.next_deferred_entry()? {
                DeferredEntry::End => break,

                DeferredEntry::Alignment(alignment) =>
                    self.allocator.set_alignment(alignment),

                DeferredEntry::Object{space, reference, size_in_words} => {
                    let object = self.resolve_back_reference(space, reference)?;
                    let allocated = self.deferred.remove(&object).ok_or(
                        FormatError::ObjectNotDeferred{object: object.address()}
                    )?;

                    let size = size_in_words as usize * WORD_SIZE;
                    if size != allocated {
                        return Err(FormatError::MalformedObject{
                            object: object.address(),
                            reason: "deferred size differs from allocated size",
                        }.into());
                    }
                    let start = object.field(layout::HEADER_SIZE);
                    let end = object.field(size);
                    self.read_data(start, end, space, Some(object))?;
                    self.post_process_new_object(object, space, size)?;
                    count += 1;
                },
            }
        }
        debug!(count, "deferred objects completed");
        Ok(())
    }

    fn rehash_tables(&mut self) -> Result<()>
    {
        if !self.can_rehash && self.mode != DeserializerMode::UserCode {
            return Err(ConfigurationError::RehashNotPermitted.into());
        }
        let tables = mem::take(&mut self.to_rehash);
        for &table in &tables {
            hash_table::rehash(&mut self.isolate.heap, table)?;
        }
        debug!(tables = tables.len(), "hash tables rehashed");
        Ok(())
    }

    /* -------------------------------------------------------------------- */
    /*                           External tables                            */
    /* -------------------------------------------------------------------- */

    fn external_reference(&self, id: u32) -> Result<Address>
    {
        self.isolate.external_references.address(id).ok_or(
            FormatError::IndexOutOfRange{table: "external reference table", index: id}.into()
        )
    }

    fn api_reference(&self, id: u32) -> Result<Address>
    {
        match &self.isolate.api_references {
            ApiReferences::Provided(references) =>
                references.get(id as usize).copied().ok_or(
                    ConfigurationError::ApiReferenceOutOfRange{
                        index: id,
                        count: references.len(),
                    }.into()
                ),
            ApiReferences::NotProvided =>
                Ok(NO_API_REFERENCES),
        }
    }
}

/// Look up an object in a host table.
fn lookup(table: &[ObjectRef], name: &'static str, index: u32) -> Result<ObjectRef>
{
    table.get(index as usize).copied()
        .ok_or(Error::Format(FormatError::IndexOutOfRange{table: name, index}))
}
