use crate::provider::{ContentIndex, ReadStream, StorageProvider, WriteStream};
use decant_base::hashing::HashMap;
use decant_base::ContentId;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

struct StoredContent {
    content_id: ContentId,
    data: Vec<u8>,
}

/// In-memory content-addressed provider: index and storage in one. Stands in
/// for the real virtual file system in tests and demos; content ids are
/// derived from the stored bytes, so editing content under a url changes the
/// id it resolves to.
#[derive(Clone, Default)]
pub struct MemoryContentProvider {
    store: Arc<Mutex<HashMap<String, StoredContent>>>,
}

impl MemoryContentProvider {
    pub fn new() -> Self {
        Default::default()
    }

    /// Seeds content bytes directly, bypassing the chunk writer.
    pub fn insert(
        &self,
        url: &str,
        data: Vec<u8>,
    ) {
        let content_id = ContentId::from_data(&data);
        self.store
            .lock()
            .unwrap()
            .insert(url.to_string(), StoredContent { content_id, data });
    }

    pub fn remove(
        &self,
        url: &str,
    ) {
        self.store.lock().unwrap().remove(url);
    }

    pub fn contains(
        &self,
        url: &str,
    ) -> bool {
        self.store.lock().unwrap().contains_key(url)
    }

    /// The raw bytes stored under a url.
    pub fn data(
        &self,
        url: &str,
    ) -> Option<Vec<u8>> {
        self.store
            .lock()
            .unwrap()
            .get(url)
            .map(|stored| stored.data.clone())
    }
}

impl ContentIndex for MemoryContentProvider {
    fn try_resolve(
        &self,
        url: &str,
    ) -> Option<ContentId> {
        self.store
            .lock()
            .unwrap()
            .get(url)
            .map(|stored| stored.content_id)
    }
}

impl StorageProvider for MemoryContentProvider {
    fn open_read(
        &self,
        url: &str,
    ) -> std::io::Result<Box<dyn ReadStream>> {
        let store = self.store.lock().unwrap();
        let stored = store.get(url).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no content at [{}]", url),
            )
        })?;
        Ok(Box::new(Cursor::new(stored.data.clone())))
    }

    fn open_write(
        &self,
        url: &str,
    ) -> std::io::Result<Box<dyn WriteStream>> {
        Ok(Box::new(MemoryWriteStream {
            url: url.to_string(),
            buffer: Cursor::new(Vec::new()),
            store: self.store.clone(),
        }))
    }
}

// Buffers writes and commits them, content-addressed, when dropped
struct MemoryWriteStream {
    url: String,
    buffer: Cursor<Vec<u8>>,
    store: Arc<Mutex<HashMap<String, StoredContent>>>,
}

impl Write for MemoryWriteStream {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> std::io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriteStream {
    fn seek(
        &mut self,
        pos: SeekFrom,
    ) -> std::io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl Drop for MemoryWriteStream {
    fn drop(&mut self) {
        let data = std::mem::take(self.buffer.get_mut());
        let content_id = ContentId::from_data(&data);
        self.store
            .lock()
            .unwrap()
            .insert(self.url.clone(), StoredContent { content_id, data });
    }
}
