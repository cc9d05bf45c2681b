//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - JSON file document store for the Repository port

pub mod json_store;
