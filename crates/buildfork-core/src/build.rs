//! Build routine seam

use async_trait::async_trait;

use crate::CoreResult;

/// Fired once the build's user-visible output is finished
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// The build itself. Opaque to the launcher.
#[async_trait]
pub trait BuildRoutine: Send + Sync {
    /// Run the build to completion and return its exit code.
    ///
    /// `on_complete` is only passed in the forked child, and is invoked at
    /// most once, when foreground output is done. Work after it (such as
    /// persisting caches) runs after the parent has detached.
    async fn build(&self, on_complete: Option<CompletionCallback>) -> CoreResult<i32>;
}
