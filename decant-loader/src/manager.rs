use crate::error::ContentError;
use crate::pending::{PendingLoad, PendingSave};
use crate::provider::{ContentIndex, StorageProvider};
use crate::reference::{AssetReference, ObjectKey, ReferenceKey, EPOCH_UNVISITED};
use crate::serializer::{ContentObject, SerializerContext, SerializerRegistry};
use crate::settings::LoadSettings;
use decant_base::hashing::HashMap;
use decant_base::{ChunkHeader, ChunkReference, ContentId, ContentTypeId};
use slotmap::SlotMap;
use std::collections::VecDeque;
use std::error::Error;
use std::io::{Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use type_uuid::TypeUuid;

/// One pending unit of graph deserialization: resolve `url` as `type_id`,
/// recording an edge from `parent` if the item came from a reference table.
/// `existing` carries an already-constructed object to populate in place
/// (reload, or a pre-resolved table entry).
struct DeserializeItem {
    parent: Option<ReferenceKey>,
    url: String,
    type_id: ContentTypeId,
    existing: Option<Arc<dyn ContentObject>>,
}

/// One pending unit of graph serialization.
struct SerializeItem {
    url: String,
    object: Arc<dyn ContentObject>,
    is_public: bool,
}

/// Debug/inspection snapshot of one loaded entry.
#[derive(Clone, Debug)]
pub struct ContentStats {
    pub url: String,
    pub public_count: u32,
    pub private_count: u32,
}

pub(crate) struct ContentManagerInner {
    /// Node arena. Keys stay stable for the lifetime of a node.
    pub(crate) nodes: SlotMap<ReferenceKey, AssetReference>,
    /// Collision-chain head per content id.
    pub(crate) loaded_by_id: HashMap<ContentId, ReferenceKey>,
    /// Reverse lookup from a live object back to its node.
    pub(crate) loaded_by_object: HashMap<ObjectKey, ReferenceKey>,
    pub(crate) collect_epoch: u32,
}

/// Loads and saves content.
///
/// Cheap to clone; clones share one reference graph. Every mutating operation
/// runs under a single manager-wide lock for its full duration, stream I/O
/// included. Independent managers are fully independent.
#[derive(Clone)]
pub struct ContentManager {
    inner: Arc<Mutex<ContentManagerInner>>,
    index: Arc<dyn ContentIndex>,
    storage: Arc<dyn StorageProvider>,
    serializers: Arc<SerializerRegistry>,
}

impl ContentManager {
    pub fn new(
        index: Arc<dyn ContentIndex>,
        storage: Arc<dyn StorageProvider>,
        serializers: SerializerRegistry,
    ) -> Self {
        ContentManager {
            inner: Arc::new(Mutex::new(ContentManagerInner {
                nodes: SlotMap::with_key(),
                loaded_by_id: Default::default(),
                loaded_by_object: Default::default(),
                collect_epoch: EPOCH_UNVISITED,
            })),
            index,
            storage,
            serializers: Arc::new(serializers),
        }
    }

    /// Loads content from a url.
    ///
    /// If a compatible object is already loaded this only increases its
    /// public reference count and returns the same instance, without touching
    /// storage.
    #[profiling::function]
    pub fn load<T: ContentObject + TypeUuid>(
        &self,
        url: &str,
        settings: &LoadSettings,
    ) -> Result<Arc<T>, ContentError> {
        let requested = ContentTypeId::from_bytes(T::UUID);
        let object = self.load_untyped(requested, url, settings)?;
        object
            .downcast_arc::<T>()
            .map_err(|_| ContentError::SerializerNotFound {
                header_type: None,
                requested: Some(requested),
            })
    }

    /// Type-erased load; [`load`](Self::load) forwards here.
    pub fn load_untyped(
        &self,
        type_id: ContentTypeId,
        url: &str,
        settings: &LoadSettings,
    ) -> Result<Arc<dyn ContentObject>, ContentError> {
        log::debug!("load [{}]", url);
        let mut inner = self.inner.lock().unwrap();
        inner.deserialize_root(
            &*self.index,
            &*self.storage,
            &self.serializers,
            url,
            type_id,
            None,
            settings,
        )
    }

    /// Runs the synchronous load on a background worker. Not a scheduling
    /// primitive: the worker takes the same manager-wide lock.
    pub fn load_async<T: ContentObject + TypeUuid>(
        &self,
        url: &str,
        settings: LoadSettings,
    ) -> PendingLoad<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let manager = self.clone();
        let url = url.to_string();
        std::thread::Builder::new()
            .name("decant-load".into())
            .spawn(move || {
                let _ = tx.send(manager.load::<T>(&url, &settings));
            })
            .expect("failed to spawn content load thread");
        PendingLoad::new(rx)
    }

    /// Saves an object and the closure of its outgoing references, one chunk
    /// per object. Saving an object this manager already tracks is a no-op.
    #[profiling::function]
    pub fn save<T: ContentObject>(
        &self,
        url: &str,
        object: &Arc<T>,
    ) -> Result<(), ContentError> {
        log::debug!("save [{}]", url);
        let object: Arc<dyn ContentObject> = object.clone();
        let mut inner = self.inner.lock().unwrap();
        inner.serialize_root(&*self.index, &*self.storage, &self.serializers, url, object)
    }

    /// Runs the synchronous save on a background worker.
    pub fn save_async<T: ContentObject>(
        &self,
        url: &str,
        object: &Arc<T>,
    ) -> PendingSave {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let manager = self.clone();
        let url = url.to_string();
        let object = object.clone();
        std::thread::Builder::new()
            .name("decant-save".into())
            .spawn(move || {
                let _ = tx.send(manager.save(&url, &object));
            })
            .expect("failed to spawn content save thread");
        PendingSave::new(rx)
    }

    /// Releases one public reference on the object. Load and unload calls
    /// must be balanced; unloading an object this manager does not track is
    /// an error, not a no-op.
    pub fn unload<T: ContentObject>(
        &self,
        object: &Arc<T>,
    ) -> Result<(), ContentError> {
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .loaded_by_object
            .get(&ObjectKey::of(&**object))
            .copied()
            .ok_or(ContentError::NotLoadedByThisManager)?;
        inner.decrement_reference(key, true)
    }

    /// Releases one public reference on whatever is loaded under `url`.
    pub fn unload_url(
        &self,
        url: &str,
    ) -> Result<(), ContentError> {
        let mut inner = self.inner.lock().unwrap();
        let content_id = self
            .index
            .try_resolve(url)
            .ok_or(ContentError::NotLoadedByThisManager)?;
        let key = inner
            .loaded_by_id
            .get(&content_id)
            .copied()
            .ok_or(ContentError::NotLoadedByThisManager)?;
        inner.decrement_reference(key, true)
    }

    /// Re-runs deserialization for an already-loaded object in place.
    /// Recursively referenced sub-objects that still exist keep their
    /// identity; references the new content no longer carries are released.
    /// Returns false if the object was never loaded through this manager.
    #[profiling::function]
    pub fn reload<T: ContentObject>(
        &self,
        object: &Arc<T>,
        settings: &LoadSettings,
    ) -> Result<bool, ContentError> {
        let mut inner = self.inner.lock().unwrap();
        let key = match inner
            .loaded_by_object
            .get(&ObjectKey::of(&**object))
            .copied()
        {
            Some(key) => key,
            None => return Ok(false),
        };

        // Put the old edge set aside; it is settled only after the new graph
        // is in place so a still-referenced child never hits zero mid-walk.
        let (url, type_id, node_object, old_outgoing) = {
            let node = &mut inner.nodes[key];
            node.deserialized = false;
            let old_outgoing = std::mem::take(&mut node.outgoing);
            (
                node.url.clone(),
                node.type_id,
                node.object.clone(),
                old_outgoing,
            )
        };

        log::debug!("reload [{}]", url);
        inner.deserialize_root(
            &*self.index,
            &*self.storage,
            &self.serializers,
            &url,
            type_id,
            Some(node_object),
            settings,
        )?;

        // Edges the walk re-established were counted again, so this paired
        // decrement nets out; edges the new content dropped release here,
        // exactly once.
        for dropped in old_outgoing {
            inner.decrement_reference(dropped, false)?;
        }

        Ok(true)
    }

    /// Returns an already-loaded object without affecting any reference
    /// count.
    pub fn get<T: ContentObject + TypeUuid>(
        &self,
        url: &str,
    ) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap();
        let content_id = self.index.try_resolve(url)?;
        let key = inner.find_compatible(content_id, ContentTypeId::from_bytes(T::UUID))?;
        inner.nodes[key].object.clone().downcast_arc::<T>().ok()
    }

    /// Checks the content index only; never touches the reference graph.
    pub fn exists(
        &self,
        url: &str,
    ) -> bool {
        self.index.exists(url)
    }

    /// Whether content is currently loaded under `url`. With
    /// `loaded_manually_only` set, indirectly-loaded content (pulled in by
    /// another object's reference table) does not count.
    pub fn is_loaded(
        &self,
        url: &str,
        loaded_manually_only: bool,
    ) -> bool {
        let inner = self.inner.lock().unwrap();
        let content_id = match self.index.try_resolve(url) {
            Some(content_id) => content_id,
            None => return false,
        };
        let mut cursor = inner.loaded_by_id.get(&content_id).copied();
        if !loaded_manually_only {
            return cursor.is_some();
        }
        while let Some(key) = cursor {
            if inner.nodes[key].public_count > 0 {
                return true;
            }
            cursor = inner.nodes[key].next;
        }
        false
    }

    /// The url an object was loaded or saved under.
    pub fn url_of<T: ContentObject>(
        &self,
        object: &Arc<T>,
    ) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let key = inner.loaded_by_object.get(&ObjectKey::of(&**object))?;
        Some(inner.nodes[*key].url.clone())
    }

    /// Snapshot of every loaded entry. Debug/inspection only; counts are
    /// stale the moment the lock drops.
    pub fn get_stats(&self) -> Vec<ContentStats> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .values()
            .map(|node| ContentStats {
                url: node.url.clone(),
                public_count: node.public_count,
                private_count: node.private_count,
            })
            .collect()
    }
}

impl ContentManagerInner {
    /// Walks the collision chain for a content id looking for a node of the
    /// requested type.
    pub(crate) fn find_compatible(
        &self,
        content_id: ContentId,
        type_id: ContentTypeId,
    ) -> Option<ReferenceKey> {
        let mut cursor = self.loaded_by_id.get(&content_id).copied();
        while let Some(key) = cursor {
            let node = &self.nodes[key];
            if node.type_id == type_id {
                return Some(key);
            }
            cursor = node.next;
        }
        None
    }

    /// Creates a node for an object and links it into the chain and both
    /// maps. Registering one object twice is a programming error.
    pub(crate) fn register_node(
        &mut self,
        content_id: ContentId,
        url: &str,
        type_id: ContentTypeId,
        object: Arc<dyn ContentObject>,
        is_public: bool,
    ) -> ReferenceKey {
        let object_key = ObjectKey::of(&*object);
        let key = self
            .nodes
            .insert(AssetReference::new(content_id, url, type_id, object, is_public));
        self.link_into_chain(key);
        let old = self.loaded_by_object.insert(object_key, key);
        assert!(old.is_none(), "object registered under two nodes");
        log::debug!("registered [{}] as {:?}", url, type_id);
        key
    }

    /// Queue-driven graph deserialization. Iterative rather than recursive so
    /// arbitrarily deep or cyclic reference graphs cannot overflow the stack.
    /// The first item's object is the result; everything after it is side
    /// effects populating the graph.
    pub(crate) fn deserialize_root(
        &mut self,
        index: &dyn ContentIndex,
        storage: &dyn StorageProvider,
        serializers: &SerializerRegistry,
        url: &str,
        type_id: ContentTypeId,
        existing: Option<Arc<dyn ContentObject>>,
        settings: &LoadSettings,
    ) -> Result<Arc<dyn ContentObject>, ContentError> {
        let mut queue = VecDeque::new();
        queue.push_back(DeserializeItem {
            parent: None,
            url: url.to_string(),
            type_id,
            existing,
        });

        let mut result = None;
        let mut is_first = true;
        while let Some(item) = queue.pop_front() {
            let first = is_first;
            is_first = false;
            match self.deserialize_item(index, storage, serializers, &mut queue, item, settings) {
                Ok(object) => {
                    if first {
                        result = Some(object);
                    }
                }
                Err(ContentError::ContentNotFound(missing_url)) if !first => {
                    // A missing nested reference is not fatal to the load;
                    // whether a missing asset matters is decided above this
                    // layer.
                    log::error!("Content [{}] could not be found.", missing_url);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(result.expect("first work item did not produce an object"))
    }

    fn deserialize_item(
        &mut self,
        index: &dyn ContentIndex,
        storage: &dyn StorageProvider,
        serializers: &SerializerRegistry,
        queue: &mut VecDeque<DeserializeItem>,
        item: DeserializeItem,
        settings: &LoadSettings,
    ) -> Result<Arc<dyn ContentObject>, ContentError> {
        let content_id = index
            .try_resolve(&item.url)
            .ok_or_else(|| ContentError::ContentNotFound(item.url.clone()))?;

        // A reload passes its object back in; identity wins over the id
        // lookup so edited content (whose resolved id changed) still reuses
        // the node in place.
        let existing_key = item
            .existing
            .as_ref()
            .and_then(|object| self.loaded_by_object.get(&ObjectKey::of(&**object)).copied())
            .or_else(|| self.find_compatible(content_id, item.type_id));

        if let Some(key) = existing_key {
            if self.nodes[key].deserialized {
                // Already fully loaded: count the reference, hand out the
                // same instance, skip storage entirely.
                let is_root = item.parent.is_none();
                let new_edge = match item.parent {
                    Some(parent) => self.nodes[parent].outgoing.insert(key),
                    None => true,
                };
                if new_edge {
                    self.increment_reference(key, is_root);
                }
                return Ok(self.nodes[key].object.clone());
            }
        }

        let mut stream = match storage.open_read(&item.url) {
            Ok(stream) => stream,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContentError::ContentNotFound(item.url.clone()));
            }
            Err(error) => return Err(ContentError::load_failed(&item.url, error)),
        };

        let header = ChunkHeader::read(&mut stream)
            .map_err(|error| ContentError::load_failed(&item.url, error))?;

        // The reference table can be read without materializing the payload;
        // grab it first, then seek back to the object bytes.
        let references = match &header {
            Some(header) => {
                let references = match header.offset_to_references {
                    Some(offset) => {
                        stream
                            .seek(SeekFrom::Start(offset))
                            .map_err(|error| ContentError::load_failed(&item.url, error))?;
                        ChunkReference::read_table(&mut stream)
                            .map_err(|error| ContentError::load_failed(&item.url, error))?
                    }
                    None => Vec::new(),
                };
                stream
                    .seek(SeekFrom::Start(header.offset_to_object))
                    .map_err(|error| ContentError::load_failed(&item.url, error))?;
                references
            }
            None => Vec::new(),
        };

        let header_tag = header.as_ref().and_then(|header| header.type_tag.as_deref());
        let serializer = serializers.lookup(header_tag, item.type_id).ok_or_else(|| {
            ContentError::SerializerNotFound {
                header_type: header_tag.map(str::to_string),
                requested: Some(item.type_id),
            }
        })?;

        let mut context = SerializerContext::for_deserialize(&item.url, references);

        // Construct or reuse the shell, and register the node before the
        // payload read: a reference table that points back at this object
        // must be able to observe the (not yet deserialized) node.
        let (key, object, created_here) = match existing_key {
            Some(key) => {
                // Reloading in place; a content edit changes the resolved id
                if self.nodes[key].content_id != content_id {
                    self.rekey_node(key, content_id);
                }
                (key, self.nodes[key].object.clone(), false)
            }
            None => {
                let object = match item.existing.clone() {
                    Some(object) => object,
                    None => serializer.construct(&context),
                };
                let key = self.register_node(
                    content_id,
                    &item.url,
                    serializer.type_id(),
                    object.clone(),
                    item.parent.is_none(),
                );
                (key, object, true)
            }
        };

        // Pre-resolve table entries that already have a loaded instance,
        // including this one when the table is cyclic.
        for slot_index in 0..context.reference_count() {
            let reference = match context.reference(slot_index) {
                Some(reference) => reference.clone(),
                None => continue,
            };
            let resolved = index
                .try_resolve(&reference.url)
                .and_then(|id| self.find_compatible(id, reference.type_id));
            if let Some(resolved_key) = resolved {
                context.resolve_slot(slot_index, self.nodes[resolved_key].object.clone());
            }
        }

        if let Err(cause) = serializer.deserialize(&mut context, &mut *stream, &object) {
            // A shell registered by this item must not be left linked for
            // reuse after a failed construction
            if created_here {
                self.unlink_node(key);
            }
            return Err(ContentError::LoadFailed {
                url: item.url.clone(),
                cause: Arc::from(cause),
            });
        }

        self.nodes[key].deserialized = true;

        // The node's initial count already accounts for the reference that
        // created it, so the parent edge is recorded without another bump.
        if let Some(parent) = item.parent {
            self.nodes[parent].outgoing.insert(key);
        }

        if settings.load_content_references {
            for slot in context.slots() {
                let accepted = settings
                    .content_filter
                    .as_ref()
                    .map_or(true, |filter| filter(&slot.reference));
                if accepted {
                    queue.push_back(DeserializeItem {
                        parent: Some(key),
                        url: slot.reference.url.clone(),
                        type_id: slot.reference.type_id,
                        existing: slot.object.clone(),
                    });
                }
            }
        }

        log::debug!("loaded [{}] as {:?}", item.url, self.nodes[key].type_id);
        Ok(object)
    }

    fn rekey_node(
        &mut self,
        key: ReferenceKey,
        content_id: ContentId,
    ) {
        self.unlink_from_chain(key);
        self.nodes[key].content_id = content_id;
        self.link_into_chain(key);
    }

    /// Queue-driven mirror of deserialization: writes one chunk per object in
    /// the closure of `object`'s content references.
    pub(crate) fn serialize_root(
        &mut self,
        index: &dyn ContentIndex,
        storage: &dyn StorageProvider,
        serializers: &SerializerRegistry,
        url: &str,
        object: Arc<dyn ContentObject>,
    ) -> Result<(), ContentError> {
        let mut queue = VecDeque::new();
        queue.push_back(SerializeItem {
            url: url.to_string(),
            object,
            is_public: true,
        });

        while let Some(item) = queue.pop_front() {
            self.serialize_item(index, storage, serializers, &mut queue, item)?;
        }
        Ok(())
    }

    fn serialize_item(
        &mut self,
        index: &dyn ContentIndex,
        storage: &dyn StorageProvider,
        serializers: &SerializerRegistry,
        queue: &mut VecDeque<SerializeItem>,
        item: SerializeItem,
    ) -> Result<(), ContentError> {
        // Objects already tracked (loaded earlier, or saved by this very
        // call) are skipped
        if self
            .loaded_by_object
            .contains_key(&ObjectKey::of(&*item.object))
        {
            return Ok(());
        }

        let (type_id, serializer) = serializers
            .lookup_for_object(&*item.object)
            .ok_or_else(|| ContentError::SerializerNotFound {
                header_type: None,
                requested: None,
            })?;

        let mut context = SerializerContext::for_serialize(&item.url);

        let write_result: Result<(), Box<dyn Error + Send + Sync>> = (|| {
            let mut stream = storage.open_write(&item.url)?;

            // Two-pass header write: reserve the space now, fill in the real
            // offsets once the payload length is known. A serializer without
            // a serialization type gets a headerless chunk.
            let mut header = serializer
                .serialization_type()
                .map(|tag| ChunkHeader::new(Some(tag)));

            if let Some(header) = &mut header {
                header.write(&mut stream)?;
                header.offset_to_object = stream.stream_position()?;
            }

            serializer.serialize(&mut context, &mut *stream, &item.object)?;

            if let Some(header) = &mut header {
                header.offset_to_references = Some(stream.stream_position()?);
                ChunkReference::write_table(&context.references(), &mut stream)?;
                stream.seek(SeekFrom::Start(0))?;
                header.write(&mut stream)?;
            }

            stream.flush()?;
            Ok(())
        })();
        write_result.map_err(|cause| ContentError::SaveFailed {
            url: item.url.clone(),
            cause: Arc::from(cause),
        })?;

        // The write is committed; the index can resolve the url now
        let content_id = index
            .try_resolve(&item.url)
            .ok_or_else(|| ContentError::ContentNotFound(item.url.clone()))?;

        let key = self.register_node(
            content_id,
            &item.url,
            type_id,
            item.object.clone(),
            item.is_public,
        );
        // The object the chunk was written from is fully live
        self.nodes[key].deserialized = true;

        for slot in context.slots() {
            if let Some(object) = &slot.object {
                queue.push_back(SerializeItem {
                    url: slot.reference.url.clone(),
                    object: object.clone(),
                    is_public: false,
                });
            }
        }

        log::debug!("saved [{}] as {:?}", item.url, type_id);
        Ok(())
    }
}
