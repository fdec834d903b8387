use crate::HandlerContext;
use async_trait::async_trait;

/// Produces the response for a matched route.
///
/// Everything a handler needs (request data, response writer, sessions,
/// templates, the logger) is reached through the [`HandlerContext`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut HandlerContext<'_>);
}

/// a closure holder which implements [`Handler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) + Send + Sync,
{
    fn new(f: F) -> Self {
        Self { f }
    }
}

/// Wraps a synchronous closure as a handler. Handlers that need to await
/// implement [`Handler`] directly.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) + Send + Sync,
{
    FnHandler::new(f)
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) + Send + Sync,
{
    async fn handle(&self, ctx: &mut HandlerContext<'_>) {
        (self.f)(ctx);
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// The handler used when no route matches, unless one is configured.
pub(crate) struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) {
        ctx.set_status(http::StatusCode::NOT_FOUND);
        ctx.write_str("404 page not found\n");
    }
}
