//! # Property Replication
//!
//! Bit-packed property identifiers, raw 8-byte values and the collections that carry
//! entity state from the server to the client.
//!
//! ## Components
//! - **PropertyId**: enum index and parameter packed into 64 bits
//! - **PropertyValue**: bit-reinterpreted 8-byte value
//! - **Collection**: ordered id-to-value map with a fixed archive layout
//! - **Replicated**: collections and strings bound to a replication id

pub mod collection;
pub mod property_id;
pub mod property_value;
pub mod replicated;

pub use collection::PropertyCollection;
pub use property_id::PropertyId;
pub use property_value::PropertyValue;
pub use replicated::{ReplicatedPropertyCollection, ReplicatedString, ReplicationIdAllocator};
