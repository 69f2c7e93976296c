use crate::serializer::ContentObject;
use decant_base::hashing::HashSet;
use decant_base::{ContentId, ContentTypeId};
use std::sync::Arc;

slotmap::new_key_type! {
    /// Stable generational key of a node in the reference graph arena.
    pub(crate) struct ReferenceKey;
}

/// Epoch stamp of a node no collection pass has visited yet. Real epochs
/// start at 1 and skip 0 when they wrap.
pub(crate) const EPOCH_UNVISITED: u32 = 0;

/// One loaded content instance and its place in the reference graph.
///
/// There is one node per loaded *instance*, not per url: the same content can
/// be loaded as different concrete types (raw bytes vs. a typed asset), in
/// which case the instances form a collision chain through `next`/`prev`,
/// headed by the manager's id map.
pub(crate) struct AssetReference {
    pub content_id: ContentId,
    /// Url the object was loaded under. Kept for diagnostics and for writing
    /// the object back out.
    pub url: String,
    pub type_id: ContentTypeId,
    pub object: Arc<dyn ContentObject>,

    /// Count of explicit load calls by external callers. These are the roots
    /// the cycle collector traces from.
    pub public_count: u32,
    /// Count of edges from other loaded objects' reference tables.
    pub private_count: u32,

    /// Nodes this object's reference table points at. Duplicate-free; each
    /// member is matched by one private count on the target.
    pub outgoing: HashSet<ReferenceKey>,

    /// False while the shell exists but the payload has not been populated
    /// yet. A cyclic reference table observes the node in this state.
    pub deserialized: bool,

    /// Last collection epoch that reached this node.
    pub collect_epoch: u32,

    // Collision chain links (same content id, different type)
    pub next: Option<ReferenceKey>,
    pub prev: Option<ReferenceKey>,
}

impl AssetReference {
    /// A new node starts with the count for the reference that caused it to
    /// exist: a public count for a root load or save, a private count for a
    /// node created while resolving another object's reference table.
    pub fn new(
        content_id: ContentId,
        url: &str,
        type_id: ContentTypeId,
        object: Arc<dyn ContentObject>,
        is_public: bool,
    ) -> Self {
        AssetReference {
            content_id,
            url: url.to_string(),
            type_id,
            object,
            public_count: if is_public { 1 } else { 0 },
            private_count: if is_public { 0 } else { 1 },
            outgoing: Default::default(),
            deserialized: false,
            collect_epoch: EPOCH_UNVISITED,
            next: None,
            prev: None,
        }
    }

    pub fn total_count(&self) -> u32 {
        self.public_count + self.private_count
    }
}

/// Identity key of a live object, for the reverse object-to-node map. Object
/// identity is the address of the `Arc`'s data, which is stable for as long
/// as the node holds the `Arc` alive.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct ObjectKey(usize);

impl ObjectKey {
    pub fn of(object: &dyn ContentObject) -> Self {
        ObjectKey(object as *const dyn ContentObject as *const () as usize)
    }
}
