//! Client sessions
//!
//! A [`Session`] is the broker's view of one connection: identity, a bounded
//! outbound mailbox, a liveness timestamp and a cancellation token that both
//! transport loops listen on.

pub mod mailbox;
#[allow(clippy::module_inception)]
pub mod session;

pub use mailbox::{Outbound, Outgoing};
pub use session::{Session, SessionId};
