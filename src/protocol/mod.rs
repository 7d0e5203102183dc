//! # Protocol Layer
//!
//! Message semantics on top of the core framing.
//!
//! ## Components
//! - **Message**: [`MessagePackage`](message::MessagePackage) with protocol context and
//!   latency timestamps
//! - **Dispatcher**: the [`ProtocolDispatch`](dispatcher::ProtocolDispatch) seam to the
//!   application's message registry
//! - **Mux**: per-connection channel state machine

pub mod dispatcher;
pub mod message;
pub mod mux;
