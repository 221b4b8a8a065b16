use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use switchboard_core::types::SessionKey;

use crate::error::HandlerError;

/// The collaborator that turns one user message into one reply.
///
/// The router never calls `handle` concurrently for the same session key.
/// Calls for different keys may overlap.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, key: &SessionKey, text: &str) -> Result<String, HandlerError>;
}

/// Adapt an async closure into a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(SessionKey, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(SessionKey, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    async fn handle(&self, key: &SessionKey, text: &str) -> Result<String, HandlerError> {
        (self.0)(key.clone(), text.to_string()).await
    }
}
