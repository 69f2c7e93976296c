use decant_base::ContentId;

/// Readable, seekable content stream handed out by a storage provider.
pub trait ReadStream: std::io::Read + std::io::Seek + Send {}
impl<T: std::io::Read + std::io::Seek + Send> ReadStream for T {}

/// Writable, seekable content stream handed out by a storage provider. The
/// two-pass chunk header write requires seeking back over already-written
/// bytes.
pub trait WriteStream: std::io::Write + std::io::Seek + Send {}
impl<T: std::io::Write + std::io::Seek + Send> WriteStream for T {}

/// Maps logical URLs to content-addressed ids. The index itself lives outside
/// this crate (it belongs to the build/install pipeline); the manager only
/// consumes these two calls.
pub trait ContentIndex: Send + Sync {
    fn try_resolve(
        &self,
        url: &str,
    ) -> Option<ContentId>;

    fn exists(
        &self,
        url: &str,
    ) -> bool {
        self.try_resolve(url).is_some()
    }
}

/// Data source content is read from and written to. Implementations are
/// expected to return `ErrorKind::NotFound` from `open_read` when the url has
/// no backing content.
pub trait StorageProvider: Send + Sync {
    fn open_read(
        &self,
        url: &str,
    ) -> std::io::Result<Box<dyn ReadStream>>;

    /// Create-or-truncate. Content becomes visible to the index once the
    /// returned stream is dropped.
    fn open_write(
        &self,
        url: &str,
    ) -> std::io::Result<Box<dyn WriteStream>>;
}
