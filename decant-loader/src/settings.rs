use decant_base::ChunkReference;
use std::sync::Arc;

/// Per-edge accept/reject hook evaluated while walking a chunk's reference
/// table.
pub type ContentFilter = Arc<dyn Fn(&ChunkReference) -> bool + Send + Sync>;

/// Options for a load operation.
#[derive(Clone)]
pub struct LoadSettings {
    /// Whether the chunk's reference table is walked at all. Defaults to
    /// true; with false only the root object is materialized.
    pub load_content_references: bool,
    /// Optional filter deciding per reference table entry whether it should
    /// be loaded.
    pub content_filter: Option<ContentFilter>,
}

impl Default for LoadSettings {
    fn default() -> Self {
        LoadSettings {
            load_content_references: true,
            content_filter: None,
        }
    }
}
