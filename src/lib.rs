//! A WAMP v1 session core: a tagged-union message model with a JSON-array
//! codec, CURIE prefix resolution, an RPC procedure registry, and a named
//! process-wide publish/subscribe bus.
//!
//! This crate embeds into clients and intra-process routers; it has no
//! transport, CLI, or persisted state of its own — see [`pool`] for the
//! worker pool an embedder wires up to run [`session::Session::handle`]
//! concurrently, and [`pubsub`] for the bus sessions publish and subscribe
//! through.

pub mod callable;
pub mod error;
pub mod forward;
pub mod messages;
pub mod pool;
pub mod pubsub;
pub mod session;

pub use callable::WeakCallable;
pub use error::{Error, ErrorKind, WampError, WampResult};
pub use forward::ForwardingSession;
pub use messages::{Message, MessageType, PublishFilter, Uri};
pub use pool::WorkerPool;
pub use pubsub::PubSubBus;
pub use session::{Procedure, ProcedureFailure, ProcedureResult, Session};
