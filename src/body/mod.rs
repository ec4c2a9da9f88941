// src/body/mod.rs
//! Bodies: the machinery around each active object
//!
//! A body owns one object, a [`Mailbox`] and a dedicated serving thread.
//! Requests are served one at a time in the order the [`ServingPolicy`]
//! dictates; control messages (migration, checkpoints, continuations)
//! run between requests on the same thread.

pub mod active_object;
pub mod context;
pub(crate) mod control;
pub mod handle;
pub mod mailbox;
pub mod policy;
pub(crate) mod serving;

pub use active_object::{no_such_method, ActiveObject, ClassRegistry};
pub use context::ServiceContext;
pub use handle::{BodyHandle, BodyStatus};
pub use mailbox::{Accepted, CloseReason, Mailbox, MailboxMode, MailboxStats};
pub use policy::ServingPolicy;
