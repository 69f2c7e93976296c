use decant_base::ContentTypeId;
use std::error::Error;
use std::sync::Arc;

/// Errors surfaced by [`ContentManager`](crate::ContentManager) operations.
#[derive(Clone, Debug)]
pub enum ContentError {
    /// The url does not resolve through the content index, or the backing
    /// stream does not exist.
    ContentNotFound(String),
    /// No serializer is registered for the header tag / requested type pair.
    /// A configuration error, never retried.
    SerializerNotFound {
        header_type: Option<String>,
        requested: Option<ContentTypeId>,
    },
    /// An I/O or parse error occurred while a content stream was open during
    /// a load. Carries the offending url and the original cause.
    LoadFailed {
        url: String,
        cause: Arc<dyn Error + Send + Sync>,
    },
    /// An I/O or serializer error occurred while writing content out.
    SaveFailed {
        url: String,
        cause: Arc<dyn Error + Send + Sync>,
    },
    /// A reference count that is already zero was decremented. Always a
    /// programming error (unbalanced load/unload pairs); never clamped,
    /// because clamping would hide double-free bugs in the reference graph.
    UnbalancedReference { url: String },
    /// The object or url was never loaded through this manager.
    NotLoadedByThisManager,
}

impl ContentError {
    pub(crate) fn load_failed(
        url: &str,
        cause: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        ContentError::LoadFailed {
            url: url.to_string(),
            cause: Arc::from(cause.into()),
        }
    }

    pub(crate) fn save_failed(
        url: &str,
        cause: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        ContentError::SaveFailed {
            url: url.to_string(),
            cause: Arc::from(cause.into()),
        }
    }
}

impl Error for ContentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ContentError::ContentNotFound(_) => None,
            ContentError::SerializerNotFound { .. } => None,
            ContentError::LoadFailed { ref cause, .. } => Some(&**cause),
            ContentError::SaveFailed { ref cause, .. } => Some(&**cause),
            ContentError::UnbalancedReference { .. } => None,
            ContentError::NotLoadedByThisManager => None,
        }
    }
}

impl core::fmt::Display for ContentError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            ContentError::ContentNotFound(ref url) => write!(
                fmt,
                "Content [{}] could not be found. Check that the path is correct and that the content has been included in the build.",
                url
            ),
            ContentError::SerializerNotFound {
                ref header_type,
                ref requested,
            } => write!(
                fmt,
                "Content serializer for {:?}/{:?} could not be found.",
                header_type, requested
            ),
            ContentError::LoadFailed {
                ref url,
                ref cause,
            } => write!(
                fmt,
                "Unexpected error while loading content [{}]. Reason: {}",
                url, cause
            ),
            ContentError::SaveFailed {
                ref url,
                ref cause,
            } => write!(
                fmt,
                "Unexpected error while saving content [{}]. Reason: {}",
                url, cause
            ),
            ContentError::UnbalancedReference { ref url } => write!(
                fmt,
                "Reference count for [{}] is already zero; load and unload calls must be balanced.",
                url
            ),
            ContentError::NotLoadedByThisManager => {
                "Content not loaded through this ContentManager.".fmt(fmt)
            }
        }
    }
}
