use crate::provider::{ReadStream, WriteStream};
use decant_base::hashing::HashMap;
use decant_base::{ChunkReference, ContentTypeId};
use downcast_rs::{impl_downcast, DowncastSync};
use std::error::Error;
use std::sync::Arc;
use type_uuid::TypeUuid;

/// A live content object owned by the manager. Objects are opaque to the
/// core; callers downcast them back to their concrete type.
pub trait ContentObject: DowncastSync {
    /// Called once when the manager drops its last reference to this object,
    /// either through a cascading release or a cycle collection. An explicit
    /// release protocol rather than relying on `Drop`.
    fn on_release(&self) {}
}
impl_downcast!(sync ContentObject);

/// Per-type codec between chunk payload bytes and live objects.
///
/// Construction and population are split so the manager can register the
/// shell before the payload read: a reference table that points back at the
/// object being read observes the registered, not-yet-deserialized shell.
pub trait ContentSerializer: Send + Sync {
    /// Stable id of the concrete object type this serializer produces.
    fn type_id(&self) -> ContentTypeId;

    /// Tag written into the chunk header. `None` writes a bare payload with
    /// no header and no reference table.
    fn serialization_type(&self) -> Option<&'static str> {
        None
    }

    fn construct(
        &self,
        context: &SerializerContext,
    ) -> Arc<dyn ContentObject>;

    /// Populates `object` from the payload bytes. The reader is positioned at
    /// the start of the payload; the reference table has already been read
    /// into the context.
    fn deserialize(
        &self,
        context: &mut SerializerContext,
        reader: &mut dyn ReadStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>>;

    /// Writes the payload bytes for `object`, reporting each outgoing content
    /// reference to the context as it goes.
    fn serialize(
        &self,
        context: &mut SerializerContext,
        writer: &mut dyn WriteStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>>;
}

pub(crate) struct ReferenceSlot {
    pub reference: ChunkReference,
    pub object: Option<Arc<dyn ContentObject>>,
}

/// State shared between the manager and a serializer for the duration of one
/// chunk read or write: the url being processed and the reference table.
///
/// While deserializing, slots come from the chunk's table and the manager
/// pre-resolves any already-loaded target so serializers can wire up direct
/// object pointers. While serializing, slots are collected from
/// `add_reference` calls and written out as the chunk's table.
pub struct SerializerContext {
    url: String,
    slots: Vec<ReferenceSlot>,
}

impl SerializerContext {
    pub(crate) fn for_deserialize(
        url: &str,
        references: Vec<ChunkReference>,
    ) -> Self {
        let slots = references
            .into_iter()
            .map(|reference| ReferenceSlot {
                reference,
                object: None,
            })
            .collect();
        SerializerContext {
            url: url.to_string(),
            slots,
        }
    }

    pub(crate) fn for_serialize(url: &str) -> Self {
        SerializerContext {
            url: url.to_string(),
            slots: Vec::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn reference_count(&self) -> usize {
        self.slots.len()
    }

    pub fn reference(
        &self,
        index: usize,
    ) -> Option<&ChunkReference> {
        self.slots.get(index).map(|slot| &slot.reference)
    }

    /// The already-loaded object behind reference table entry `index`, if the
    /// manager found one. May be a partially-deserialized shell when the
    /// reference table is cyclic.
    pub fn reference_object(
        &self,
        index: usize,
    ) -> Option<Arc<dyn ContentObject>> {
        self.slots.get(index).and_then(|slot| slot.object.clone())
    }

    /// Reports one outgoing content reference while serializing. A non-null
    /// `object` is scheduled to be written as its own chunk.
    pub fn add_reference(
        &mut self,
        url: &str,
        type_id: ContentTypeId,
        object: Option<Arc<dyn ContentObject>>,
    ) {
        self.slots.push(ReferenceSlot {
            reference: ChunkReference {
                url: url.to_string(),
                type_id,
            },
            object,
        });
    }

    pub(crate) fn resolve_slot(
        &mut self,
        index: usize,
        object: Arc<dyn ContentObject>,
    ) {
        self.slots[index].object = Some(object);
    }

    pub(crate) fn slots(&self) -> &[ReferenceSlot] {
        &self.slots
    }

    pub(crate) fn references(&self) -> Vec<ChunkReference> {
        self.slots
            .iter()
            .map(|slot| slot.reference.clone())
            .collect()
    }
}

/// All serializers known to a manager, keyed by stable type id and by header
/// tag. Registration is finished before the manager is constructed; lookups
/// after that are read-only.
#[derive(Default)]
pub struct SerializerRegistry {
    by_type: HashMap<ContentTypeId, Arc<dyn ContentSerializer>>,
    by_tag: HashMap<String, ContentTypeId>,
    by_rust_type: HashMap<std::any::TypeId, ContentTypeId>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers the serializer for content objects of type `T`. Registering
    /// two serializers for one type or one tag is a programming error.
    pub fn register<T: ContentObject + TypeUuid>(
        &mut self,
        serializer: Arc<dyn ContentSerializer>,
    ) {
        let type_id = ContentTypeId::from_bytes(T::UUID);
        assert_eq!(
            serializer.type_id(),
            type_id,
            "serializer type id does not match the registered object type"
        );

        if let Some(tag) = serializer.serialization_type() {
            let old = self.by_tag.insert(tag.to_string(), type_id);
            assert!(old.is_none());
        }
        let old = self
            .by_rust_type
            .insert(std::any::TypeId::of::<T>(), type_id);
        assert!(old.is_none());
        let old = self.by_type.insert(type_id, serializer);
        assert!(old.is_none());
    }

    /// Finds the serializer for a `(header tag, requested type)` pair. The
    /// requested type wins when both resolve; the header tag covers loads
    /// where the caller's type has no serializer of its own.
    pub fn lookup(
        &self,
        header_tag: Option<&str>,
        requested: ContentTypeId,
    ) -> Option<Arc<dyn ContentSerializer>> {
        if let Some(serializer) = self.by_type.get(&requested) {
            return Some(serializer.clone());
        }

        let tag_type = header_tag.and_then(|tag| self.by_tag.get(tag))?;
        self.by_type.get(tag_type).cloned()
    }

    /// Finds the serializer for a live object, used when saving.
    pub fn lookup_for_object(
        &self,
        object: &dyn ContentObject,
    ) -> Option<(ContentTypeId, Arc<dyn ContentSerializer>)> {
        let type_id = *self.by_rust_type.get(&object.as_any().type_id())?;
        let serializer = self.by_type.get(&type_id)?.clone();
        Some((type_id, serializer))
    }
}
