//! Disposer handles
//!
//! Every subscription the runtime grants (store observer, bus target,
//! interceptor, UI updater, props watcher) is revoked through a
//! [`Disposer`]. Disposal is explicit; dropping the handle keeps the
//! subscription alive.

use std::fmt;

#[must_use = "dropping a Disposer keeps the subscription alive; call dispose() to revoke it"]
pub struct Disposer {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Disposer {
            action: Some(Box::new(action)),
        }
    }

    /// A disposer that revokes nothing
    pub fn noop() -> Self {
        Disposer { action: None }
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    pub fn dispose(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("active", &self.action.is_some())
            .finish()
    }
}

/// Collects disposers so a whole component can be torn down at once.
#[derive(Debug, Default)]
pub struct DisposeBag {
    items: Vec<Disposer>,
}

impl DisposeBag {
    pub fn new() -> Self {
        DisposeBag { items: Vec::new() }
    }

    pub fn push(&mut self, disposer: Disposer) {
        if !disposer.is_noop() {
            self.items.push(disposer);
        }
    }

    pub fn extend(&mut self, other: DisposeBag) {
        self.items.extend(other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Disposes in reverse registration order
    pub fn dispose_all(&mut self) {
        while let Some(d) = self.items.pop() {
            d.dispose();
        }
    }
}
