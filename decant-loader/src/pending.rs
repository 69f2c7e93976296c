use crate::error::ContentError;
use crate::serializer::ContentObject;
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Handle to a load running on a background worker.
pub struct PendingLoad<T: ContentObject> {
    receiver: Receiver<Result<Arc<T>, ContentError>>,
}

impl<T: ContentObject> PendingLoad<T> {
    pub(crate) fn new(receiver: Receiver<Result<Arc<T>, ContentError>>) -> Self {
        PendingLoad { receiver }
    }

    /// Blocks until the load finishes.
    pub fn wait(self) -> Result<Arc<T>, ContentError> {
        self.receiver
            .recv()
            .expect("content load worker dropped without sending a result")
    }

    /// Returns the result if the load already finished.
    pub fn try_take(&self) -> Option<Result<Arc<T>, ContentError>> {
        self.receiver.try_recv().ok()
    }
}

/// Handle to a save running on a background worker.
pub struct PendingSave {
    receiver: Receiver<Result<(), ContentError>>,
}

impl PendingSave {
    pub(crate) fn new(receiver: Receiver<Result<(), ContentError>>) -> Self {
        PendingSave { receiver }
    }

    /// Blocks until the save finishes.
    pub fn wait(self) -> Result<(), ContentError> {
        self.receiver
            .recv()
            .expect("content save worker dropped without sending a result")
    }

    /// Returns the result if the save already finished.
    pub fn try_take(&self) -> Option<Result<(), ContentError>> {
        self.receiver.try_recv().ok()
    }
}
