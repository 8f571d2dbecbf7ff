//! A callback that, when bound to a receiver, holds that receiver only weakly.
//!
//! Mirrors `wampy.wamputil.WeaklyBoundCallable`: wrapping a bound method normally
//! keeps its receiver alive for as long as the callable is reachable, which is
//! exactly what a registry of hooks or subscriptions must *not* do. Rust has no
//! generic "unbind a method, rebind a weak ref on call" trick, so the two call
//! shapes the teacher and the original both actually use are modeled directly:
//!
//! - [`WeakCallable::bound`] takes an `Arc<T>` receiver and a plain `fn(&T, Args)
//!   -> R` — the receiver is stored as a [`Weak`] and upgraded on every call;
//!   if the receiver has been dropped, the call is skipped and the callable is
//!   treated as inert.
//! - [`WeakCallable::unbound`] takes any `Fn(Args) -> R` closure, held by a
//!   strong `Arc` — there is no receiver to weaken, matching the bare-function
//!   case in the Python source (`is_bound=False`).
//!
//! Equality and hashing are both identity-based ((function pointer, receiver
//! pointer) for bound callables, allocation pointer for unbound ones) and never
//! invoke the wrapped callable, matching the original's `__eq__`/`__hash__`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum CallableIdentity {
    Bound { func: usize, receiver: usize },
    Unbound { ptr: usize },
}

/// A weakly-bound (or, for free functions, strongly-held) callback.
///
/// `Args` is the argument tuple/value passed on each call; `R` is the return
/// type (defaults to `()` for fire-and-forget hooks).
pub struct WeakCallable<Args, R = ()> {
    identity: CallableIdentity,
    invoke: Arc<dyn Fn(Args) -> Option<R> + Send + Sync>,
    alive: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl<Args, R> WeakCallable<Args, R>
where
    Args: 'static,
    R: 'static,
{
    /// Wrap `func` bound weakly to `receiver`. If `receiver` is later dropped,
    /// [`WeakCallable::call`] returns `None` instead of invoking `func`.
    pub fn bound<T>(receiver: &Arc<T>, func: fn(&T, Args) -> R) -> WeakCallable<Args, R>
    where
        T: Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(receiver);
        let weak_for_alive = weak.clone();
        let identity = CallableIdentity::Bound {
            func: func as usize,
            receiver: Arc::as_ptr(receiver) as usize,
        };
        let invoke: Arc<dyn Fn(Args) -> Option<R> + Send + Sync> =
            Arc::new(move |args| weak.upgrade().map(|strong| func(&strong, args)));
        let alive: Arc<dyn Fn() -> bool + Send + Sync> =
            Arc::new(move || weak_for_alive.upgrade().is_some());
        WeakCallable { identity, invoke, alive }
    }

    /// Wrap a closure or free function with no receiver to weaken.
    pub fn unbound<F>(func: F) -> WeakCallable<Args, R>
    where
        F: Fn(Args) -> R + Send + Sync + 'static,
    {
        let func: Arc<dyn Fn(Args) -> R + Send + Sync> = Arc::new(func);
        let identity = CallableIdentity::Unbound {
            ptr: Arc::as_ptr(&func) as *const () as usize,
        };
        let invoke: Arc<dyn Fn(Args) -> Option<R> + Send + Sync> =
            Arc::new(move |args| Some(func(args)));
        WeakCallable {
            identity,
            invoke,
            alive: Arc::new(|| true),
        }
    }

    /// Invoke the callable. Returns `None` if this is a bound callable whose
    /// receiver has been dropped; such a callable is permanently inert.
    pub fn call(&self, args: Args) -> Option<R> {
        (self.invoke)(args)
    }

    /// Whether this callable would still invoke its target. Unbound callables
    /// are always alive; bound ones go dead once their receiver drops. Used
    /// to lazily prune registries that hold callables weakly.
    pub fn is_alive(&self) -> bool {
        (self.alive)()
    }
}

impl<Args, R> Clone for WeakCallable<Args, R> {
    fn clone(&self) -> Self {
        WeakCallable {
            identity: self.identity,
            invoke: Arc::clone(&self.invoke),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl<Args, R> PartialEq for WeakCallable<Args, R> {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl<Args, R> Eq for WeakCallable<Args, R> {}

impl<Args, R> Hash for WeakCallable<Args, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl<Args, R> fmt::Debug for WeakCallable<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identity {
            CallableIdentity::Bound { func, receiver } => f
                .debug_struct("WeakCallable::Bound")
                .field("func", &func)
                .field("receiver", &receiver)
                .finish(),
            CallableIdentity::Unbound { ptr } => {
                f.debug_struct("WeakCallable::Unbound").field("ptr", &ptr).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
    }

    impl Counter {
        fn bump(&self, by: usize) -> usize {
            self.calls.fetch_add(by, Ordering::SeqCst) + by
        }
    }

    #[test]
    fn bound_callable_invokes_through_weak_receiver() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let callable: WeakCallable<usize, usize> = WeakCallable::bound(&counter, Counter::bump);
        assert_eq!(callable.call(5), Some(5));
        assert_eq!(callable.call(2), Some(7));
    }

    #[test]
    fn bound_callable_goes_inert_after_receiver_drops() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let callable: WeakCallable<usize, usize> = WeakCallable::bound(&counter, Counter::bump);
        assert!(callable.is_alive());
        drop(counter);
        assert!(!callable.is_alive());
        assert_eq!(callable.call(1), None);
    }

    #[test]
    fn unbound_callable_is_always_alive() {
        let callable: WeakCallable<usize, usize> = WeakCallable::unbound(|x| x + 1);
        assert!(callable.is_alive());
    }

    #[test]
    fn equality_is_identity_based_not_behavioral() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let a: WeakCallable<usize, usize> = WeakCallable::bound(&counter, Counter::bump);
        let b: WeakCallable<usize, usize> = WeakCallable::bound(&counter, Counter::bump);
        assert_eq!(a, b);

        let other = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let c: WeakCallable<usize, usize> = WeakCallable::bound(&other, Counter::bump);
        assert_ne!(a, c);
    }

    #[test]
    fn unbound_closures_compare_by_allocation_identity() {
        let a: WeakCallable<usize, usize> = WeakCallable::unbound(|x| x + 1);
        let b = a.clone();
        assert_eq!(a, b);

        let c: WeakCallable<usize, usize> = WeakCallable::unbound(|x| x + 1);
        assert_ne!(a, c);
    }
}
