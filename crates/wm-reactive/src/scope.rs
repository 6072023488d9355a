#![forbid(unsafe_code)]

//! Scoped ownership of subscriptions.
//!
//! A [`BindingScope`] collects the subscriptions that belong to one piece of
//! bound state (a rendered form, a store's per-entity listeners) and releases
//! them together, either explicitly through [`BindingScope::clear`] or when
//! the scope is dropped. Owners that hand out callbacks which may outlive a
//! rebind compare [`BindingScope::generation`] to tell whether the context
//! they were created for is still current.

use crate::observable::{Observable, Subscription, WriteOrigin};

/// Owner of a group of subscriptions released as a unit.
#[derive(Default)]
pub struct BindingScope {
    held: Vec<Subscription>,
    generation: u64,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `source` for as long as this scope holds the subscription.
    pub fn subscribe<T>(&mut self, source: &Observable<T>, callback: impl Fn(&T) + 'static)
    where
        T: Clone + PartialEq + 'static,
    {
        self.held.push(source.subscribe(callback));
    }

    /// Tagged variant of [`subscribe`](Self::subscribe).
    pub fn subscribe_tagged<T>(
        &mut self,
        source: &Observable<T>,
        callback: impl Fn(&T, WriteOrigin) + 'static,
    ) where
        T: Clone + PartialEq + 'static,
    {
        self.held.push(source.subscribe_tagged(callback));
    }

    /// Take ownership of a subscription created elsewhere.
    pub fn hold(&mut self, subscription: Subscription) {
        self.held.push(subscription);
    }

    /// Move every subscription of `other` into this scope.
    pub fn absorb(&mut self, mut other: BindingScope) {
        self.held.append(&mut other.held);
    }

    /// Release every held subscription. A scope with nothing to release is
    /// left untouched, so repeated clears are harmless.
    pub fn clear(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let released = self.held.len();
        self.held.clear();
        self.generation += 1;
        tracing::trace!(released, generation = self.generation, "binding scope cleared");
    }

    /// Number of subscriptions currently held.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Incremented by every [`clear`](Self::clear) that released something.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingScope")
            .field("bindings", &self.held.len())
            .field("generation", &self.generation)
            .finish()
    }
}
