//! tether-core — shared types, routing-key codec, errors, and configuration.
//! All other Tether crates depend on this one.

pub mod config;
pub mod error;
pub mod node;
pub mod routes;

pub use error::{status, Error};
pub use node::Node;
