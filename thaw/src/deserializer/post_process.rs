use {
    super::{Deserializer, DeserializerMode},
    crate::{
        ConfigurationError,
        FormatError,
        Result,
        external::ApiReferences,
        heap::{Address, Space},
        object::{ObjectKind, ObjectRef, layout, word_to_smi},
    },
    tracing::{debug, trace},
};

impl<'i, 's> Deserializer<'i, 's>
{
    /// Finish an object whose contents were all decoded.
    ///
    /// `size` is the size the object was allocated with.
    /// Returns the object that references to it should refer to.
    pub (super) fn post_process_new_object(
        &mut self,
        object: ObjectRef,
        space: Space,
        size: usize,
    ) -> Result<ObjectRef>
    {
        let kind = self.isolate.heap.kind_of(object)?;
        if size < layout::min_size(kind) {
            return Err(FormatError::MalformedObject{
                object: object.address(),
                reason: "object is smaller than its kind's fixed fields",
            }.into());
        }
        let user_code = self.mode == DeserializerMode::UserCode;
        let mut result = object;

        if (self.isolate.flags.rehash_snapshot && self.can_rehash) || user_code {
            if kind.is_string() {
                self.isolate.heap.write_word(object.field(layout::string::HASH_FIELD),
                                             layout::string::EMPTY_HASH_FIELD)?;
            } else if kind.needs_rehashing() {
                self.to_rehash.push(object);
            }
        }

        if user_code {
            match kind {
                ObjectKind::InternalizedString => {
                    match self.isolate.heap.intern_string(object)? {
                        Some(canonical) => {
                            trace!(?object, ?canonical, "canonicalized string");
                            self.isolate.heap.make_thin(object, canonical)?;
                            result = canonical;
                        },
                        None =>
                            self.deserialized.new_internalized_strings.push(object),
                    }
                },
                ObjectKind::Script =>
                    self.deserialized.new_scripts.push(object),
                ObjectKind::AllocationSite =>
                    self.deserialized.new_allocation_sites.push(object),
                _ => (),
            }
        }

        match kind {
            ObjectKind::Script => {
                let script_id = self.isolate.heap.read_smi_field(object, layout::script::ID)?;
                debug!(script_id, ?object, "script deserialized");
            },

            ObjectKind::Code =>
                if user_code || space == Space::LargeObject {
                    self.deserialized.new_code_objects.push(object);
                },

            ObjectKind::TypeDescriptor =>
                if self.isolate.flags.trace_maps {
                    self.deserialized.new_maps.push(object);
                },

            ObjectKind::NativeSourceString => {
                let index = self.read_resource_index(object)?;
                let resource = usize::try_from(index).ok()
                    .and_then(|i| self.isolate.natives.get(i).copied())
                    .ok_or(ConfigurationError::UnknownNativeSource(index))?;
                self.install_external_string(object, resource)?;
            },

            ObjectKind::ExternalString => {
                let index = self.read_resource_index(object)?;
                let index = u32::try_from(index).map_err(|_| FormatError::MalformedObject{
                    object: object.address(),
                    reason: "negative external string resource index",
                })?;
                let resource = match &self.isolate.api_references {
                    ApiReferences::Provided(references) =>
                        references.get(index as usize).copied().ok_or(
                            ConfigurationError::ApiReferenceOutOfRange{
                                index,
                                count: references.len(),
                            }
                        )?,
                    ApiReferences::NotProvided =>
                        return Err(ConfigurationError::MissingApiReferences{index}.into()),
                };
                self.install_external_string(object, resource)?;
            },

            ObjectKind::ArrayBuffer => {
                use layout::array_buffer::*;
                let heap = &mut self.isolate.heap;
                let placeholder = heap.read_word(object.field(BACKING_STORE))?;
                if placeholder != 0 {
                    let store = backing_store(&self.backing_stores, object, placeholder)?;
                    heap.write_word(object.field(BACKING_STORE), store.0)?;
                    heap.register_array_buffer(object)?;
                }
            },

            ObjectKind::TypedArray => {
                use layout::typed_array::*;
                let heap = &mut self.isolate.heap;
                if heap.read_word(object.field(BASE_POINTER))? == 0 {
                    let placeholder = heap.read_word(object.field(EXTERNAL_POINTER))?;
                    let store = backing_store(&self.backing_stores, object, placeholder)?;
                    let byte_offset = heap.read_length_field(object, BYTE_OFFSET)?;
                    heap.write_word(object.field(EXTERNAL_POINTER),
                                    store.offset(byte_offset).0)?;
                }
            },

            ObjectKind::BytecodeArray => {
                use layout::bytecode_array::*;
                let heap = &mut self.isolate.heap;
                heap.write_smi_field(object, INTERRUPT_BUDGET,
                                     self.isolate.flags.interrupt_budget)?;
                heap.write_smi_field(object, OSR_NESTING_LEVEL, 0)?;
            },

            ObjectKind::DescriptorArray =>
                self.isolate.heap.write_smi_field(
                    object, layout::descriptor_array::MARKED_COUNT, 0)?,

            _ => (),
        }

        if kind.required_alignment().fill_to_align(object.address()) != 0 {
            return Err(FormatError::Misaligned{object: object.address(), kind}.into());
        }

        Ok(result)
    }

    /// The placeholder in the resource field of an external string.
    fn read_resource_index(&self, string: ObjectRef) -> Result<i64>
    {
        self.isolate.heap.read_smi_field(string, layout::external_string::RESOURCE)
    }

    fn install_external_string(&mut self, string: ObjectRef, resource: Address)
        -> Result<()>
    {
        let heap = &mut self.isolate.heap;
        heap.write_word(string.field(layout::external_string::RESOURCE), resource.0)?;
        heap.register_external_string(string)
    }
}

/// Look up the backing store that a placeholder word refers to.
fn backing_store(backing_stores: &[Address], object: ObjectRef, placeholder: u64)
    -> Result<Address>
{
    let index = word_to_smi(placeholder).ok_or(FormatError::MalformedObject{
        object: object.address(),
        reason: "backing store placeholder is not a small integer",
    })?;
    usize::try_from(index).ok()
        .and_then(|i| backing_stores.get(i).copied())
        .ok_or(FormatError::BackingStoreIndexOutOfRange(index).into())
}
