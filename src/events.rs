use futures::future::{self, BoxFuture};

use crate::item::UploadItem;

/// Hooks the embedding UI can rely on. All methods are called from the
/// queue's dispatcher task, in order, and must not block.
pub trait UploadEvents: Send + Sync {
    /// The first upload of a batch was admitted.
    fn upload_started(&self) {}

    /// Fired once per settled batch.
    fn upload_completed(&self, _any_failed: bool, _any_succeeded: bool) {}

    /// Fired once when the queue is closed.
    fn done(&self, _any_succeeded: bool) {}

    /// Status, progress or response of an item changed.
    fn item_changed(&self, _item: &UploadItem) {}
}

/// No-op sink for callers that only poll.
pub struct SilentEvents;

impl UploadEvents for SilentEvents {}

/// Asked at most once per batch whether colliding files may be overwritten.
pub trait OverwritePrompt: Send + Sync {
    fn confirm_overwrite(&self, file_name: &str) -> BoxFuture<'static, bool>;
}

/// Answers every prompt with the same decision.
pub struct FixedAnswer(pub bool);

impl OverwritePrompt for FixedAnswer {
    fn confirm_overwrite(&self, _file_name: &str) -> BoxFuture<'static, bool> {
        Box::pin(future::ready(self.0))
    }
}
