//! # Transport Layer
//!
//! Network-facing services. Each owns its accept loop and one task per connection.

pub mod frontend;

pub use frontend::{FrontendClient, FrontendHandler, FrontendServer, Outbound};
