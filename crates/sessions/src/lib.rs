//! Conversational sessions for botline handlers.
//!
//! A handler invoked for one inbound event can open a [`Session`] and
//! suspend on follow-up input (`text`, `confirm`, `select`, keyed `get`).
//! Each [`Receiver`] correlates later events from the same conversation
//! back into the suspended session instead of starting a new invocation.
//! The [`Dispatcher`] fans every event out to all registered receivers.

pub mod context;
pub mod dispatcher;
pub mod flow;
pub mod handle;
pub mod outbound;
pub mod receiver;
pub mod registry;
pub mod session;
pub mod session_id;

pub use context::Context;
pub use dispatcher::Dispatcher;
pub use flow::{Farewell, FarewellSource, Flow, Interrupt};
pub use handle::{SelectOptions, SessionHandle};
pub use outbound::{NoopOutbound, Outbound, RecordingOutbound, Sent};
pub use receiver::{
    BlockingHandler, Handler, Invocation, Outcome, Receiver, ReceiverBuilder, ReceiverInfo,
};
pub use registry::SessionRegistry;
pub use session::{Session, SessionInfo};
pub use session_id::{candidate_ids, compute_session_id, SessionId, SessionScope};
