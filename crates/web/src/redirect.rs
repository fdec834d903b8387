//! Pre-handler hooks that may answer a request themselves.
//!
//! A route's [`Redirectors`] run in order before its handler. The first one
//! that returns `true` has written the response (typically a redirect to a
//! login page), and neither the remaining redirectors nor the handler run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::HandlerContext;

#[async_trait]
pub trait Redirector: Send + Sync {
    /// Returns `true` when the request was answered and dispatch must stop.
    async fn redirect(&self, ctx: &mut HandlerContext<'_>) -> bool;
}

pub struct FnRedirector<F> {
    f: F,
}

pub fn redirector_fn<F>(f: F) -> FnRedirector<F>
where
    F: Fn(&mut HandlerContext<'_>) -> bool + Send + Sync,
{
    FnRedirector { f }
}

#[async_trait]
impl<F> Redirector for FnRedirector<F>
where
    F: Fn(&mut HandlerContext<'_>) -> bool + Send + Sync,
{
    async fn redirect(&self, ctx: &mut HandlerContext<'_>) -> bool {
        (self.f)(ctx)
    }
}

/// An ordered redirector chain.
#[derive(Clone, Default)]
pub struct Redirectors {
    inner: Vec<Arc<dyn Redirector>>,
}

#[async_trait]
impl Redirector for Redirectors {
    async fn redirect(&self, ctx: &mut HandlerContext<'_>) -> bool {
        for redirector in &self.inner {
            if redirector.redirect(ctx).await {
                return true;
            }
        }
        false
    }
}

impl Redirectors {
    pub fn builder() -> RedirectorsBuilder {
        RedirectorsBuilder::new()
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for Redirectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redirectors").field("len", &self.inner.len()).finish()
    }
}

pub struct RedirectorsBuilder {
    inner: Vec<Arc<dyn Redirector>>,
}

impl RedirectorsBuilder {
    fn new() -> Self {
        Self { inner: vec![] }
    }

    pub fn add_last<R: Redirector + 'static>(mut self, redirector: R) -> Self {
        self.inner.push(Arc::new(redirector));
        self
    }

    pub fn add_first<R: Redirector + 'static>(mut self, redirector: R) -> Self {
        self.inner.insert(0, Arc::new(redirector));
        self
    }

    pub fn build(self) -> Redirectors {
        Redirectors { inner: self.inner }
    }
}

impl<F> std::fmt::Debug for FnRedirector<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRedirector").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RedirectorsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectorsBuilder").field("len", &self.inner.len()).finish()
    }
}
