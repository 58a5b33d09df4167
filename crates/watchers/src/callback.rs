//! Deferred callbacks executed on the dispatch loop.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::{ResourceChange, ResourceChangeHandler};

type CallbackFn = Box<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler for a one-off callback event. Every scheduled callback gets its own
/// instance, so two callbacks never coalesce in the queue.
pub struct CallbackHandler {
    callback: CallbackFn,
    context: String,
}

impl CallbackHandler {
    pub fn new<F, Fut>(callback: F, context: impl Into<String>) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self { callback: Box::new(move |ctx| callback(ctx).boxed()), context: context.into() }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

#[async_trait::async_trait]
impl ResourceChangeHandler for CallbackHandler {
    async fn handle(&self, _event: &ResourceChange) -> anyhow::Result<()> {
        (self.callback)(self.context.clone()).await
    }

    fn describe(&self, _event: &ResourceChange) -> String {
        format!("Callback({})", self.context)
    }
}
