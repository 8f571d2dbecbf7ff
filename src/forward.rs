//! The forwarding extension: a session whose CALL handler delegates to an
//! external callback instead of a local procedure registry.
//!
//! Grounded in `wampy.forward.WAMPCallForwardingMixin`, which overrides
//! `_handle_CALL` to skip `proc_for_uri`'s table lookup and hand the
//! (prefix-expanded) call straight to a `forward` callable. Rust favors
//! composition over mixin inheritance, so this is a thin wrapper around
//! [`Session`] rather than an alternate base class.

use std::ops::Deref;
use std::sync::Arc;

use crate::callable::WeakCallable;
use crate::messages::Message;
use crate::session::Session;

/// A [`Session`] whose CALL handling has been redirected to an external
/// `forward(message)` callback. All other dispatch — PREFIX, SUBSCRIBE,
/// PUBLISH, and the three inbound hooks — behaves exactly as on a plain
/// `Session`.
pub struct ForwardingSession {
    session: Arc<Session>,
}

impl ForwardingSession {
    /// Build a fresh session on the default bus and install `forward` as its
    /// CALL target. `forward` receives a CALL message with `proc_uri` already
    /// expanded against the session's (initially empty) prefix table.
    pub fn new(forward: WeakCallable<Message, ()>) -> ForwardingSession {
        let session = Session::new();
        session.set_forward(forward);
        ForwardingSession { session }
    }

    /// Install forwarding onto an existing session, e.g. one already joined
    /// to a non-default bus via [`Session::with_bus`].
    pub fn wrap(session: Arc<Session>, forward: WeakCallable<Message, ()>) -> ForwardingSession {
        session.set_forward(forward);
        ForwardingSession { session }
    }

    pub fn into_inner(self) -> Arc<Session> {
        self.session
    }
}

impl Deref for ForwardingSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}
