//! Subscription - cancellation state of one live stream execution
//!
//! # Design
//!
//! A [`Subscription`] is a cheap, clonable handle around a single-writer
//! cancellation flag plus a list of cancel hooks. Operators that hold an
//! upstream derive a *child* subscription, so cancelling downstream cascades
//! to every upstream while an operator such as `take` can cancel its
//! upstream alone.
//!
//! ```text
//! consumer ── Subscription (root)
//!                 ├─ child: map upstream
//!                 │     └─ child: merge group
//!                 │           ├─ child: source 0
//!                 │           └─ child: source 1
//! ```
//!
//! Parents only keep weak references to their children, and nothing points
//! back to a `Flux` description, so repeated subscriptions never form cycles.
//!
//! A subscription ends either by cancellation or when its stream sends a
//! terminal signal; the emitter then cancels it to run cleanup hooks. Either
//! way the child removes its hook from the parent, so operators that
//! re-subscribe on one long-lived parent (retry, concat, flat_map) keep a
//! bounded hook list.

use super::error::FluxError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type CancelHook = Box<dyn FnOnce() + Send>;
type HookId = u64;

/// Cancellation handle for one subscription
#[derive(Clone, Default)]
pub struct Subscription {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    hooks: Mutex<Hooks>,
    parent: Mutex<Option<ParentLink>>,
}

#[derive(Default)]
struct Hooks {
    next_id: HookId,
    entries: Vec<(HookId, CancelHook)>,
}

/// Where a child's cascade hook sits in its parent
struct ParentLink {
    parent: Weak<Inner>,
    hook: HookId,
}

impl Subscription {
    /// Create a fresh, active subscription
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this subscription and every child
    ///
    /// Idempotent: only the first call runs the cancel hooks. A cancelled
    /// child also unhooks itself from its parent, so a long-lived parent
    /// only tracks children that are still running.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut self.inner.hooks.lock().entries);
        for (_, hook) in hooks {
            hook();
        }
        self.detach();
    }

    /// Whether [`cancel`](Self::cancel) has been called (here or on a parent)
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Run `hook` when this subscription is cancelled
    ///
    /// Runs immediately if the subscription is already cancelled.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(Box::new(hook));
    }

    /// Derive a child that is cancelled together with this subscription
    pub fn child(&self) -> Subscription {
        let child = Subscription::new();
        let weak: Weak<Inner> = Arc::downgrade(&child.inner);
        let hook = self.register(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Subscription { inner }.cancel();
            }
        }));
        if let Some(hook) = hook {
            *child.inner.parent.lock() = Some(ParentLink {
                parent: Arc::downgrade(&self.inner),
                hook,
            });
        }
        child
    }

    /// Add `hook`, or run it now if already cancelled
    fn register(&self, hook: CancelHook) -> Option<HookId> {
        let mut hooks = self.inner.hooks.lock();
        if self.is_cancelled() {
            drop(hooks);
            hook();
            return None;
        }
        let id = hooks.next_id;
        hooks.next_id += 1;
        hooks.entries.push((id, hook));
        Some(id)
    }

    /// Remove this subscription's cascade hook from its parent
    fn detach(&self) {
        let Some(link) = self.inner.parent.lock().take() else {
            return;
        };
        if let Some(parent) = link.parent.upgrade() {
            let removed = {
                let mut hooks = parent.hooks.lock();
                hooks
                    .entries
                    .iter()
                    .position(|(id, _)| *id == link.hook)
                    .map(|index| hooks.entries.remove(index))
            };
            drop(removed);
        }
    }

    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> usize {
        self.inner.hooks.lock().entries.len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disposable
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle returned by the lambda-based `subscribe` family
///
/// When a sequence fails and no error callback was supplied, the failure is
/// logged and retained here as an unhandled error instead of being dropped.
#[derive(Clone, Debug)]
pub struct Disposable {
    subscription: Subscription,
    unhandled: Arc<Mutex<Option<FluxError>>>,
}

impl Disposable {
    pub(crate) fn new(subscription: Subscription, unhandled: Arc<Mutex<Option<FluxError>>>) -> Self {
        Self {
            subscription,
            unhandled,
        }
    }

    /// Cancel the underlying subscription
    pub fn dispose(&self) {
        self.subscription.cancel();
    }

    /// Whether the subscription was cancelled or has terminated
    pub fn is_disposed(&self) -> bool {
        self.subscription.is_cancelled()
    }

    /// Error that reached the consumer without an error callback
    pub fn unhandled_error(&self) -> Option<FluxError> {
        self.unhandled.lock().clone()
    }

    /// The underlying subscription
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancel_is_idempotent() {
        let sub = Subscription::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        sub.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.cancel();
        sub.cancel();

        assert!(sub.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_cascades_to_children_only_downward() {
        let parent = Subscription::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_cancelled_child_unhooks_from_parent() {
        let parent = Subscription::new();
        parent.on_cancel(|| {});
        for _ in 0..1_000 {
            parent.child().cancel();
        }
        assert_eq!(parent.hook_count(), 1);

        let live = parent.child();
        assert_eq!(parent.hook_count(), 2);
        parent.cancel();
        assert!(live.is_cancelled());
        assert_eq!(parent.hook_count(), 0);
    }

    #[test]
    fn test_hook_on_cancelled_subscription_runs_immediately() {
        let sub = Subscription::new();
        sub.cancel();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        sub.on_cancel(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
        assert!(sub.child().is_cancelled());
    }
}
