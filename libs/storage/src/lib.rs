//! Interfaces of the state which consensus persists across restarts,
//! with in-memory implementations.
//!
//! Writes are synchronous: a call returns only once the state is durable,
//! since a vote must never leave the node before the state recording it.

mod in_memory;
mod safety;
pub mod testonly;
mod vertex_store;

pub use crate::{
    in_memory::{InMemorySafetyStateStore, InMemoryVertexStore},
    safety::{PersistentSafetyStateStore, SafetyState},
    vertex_store::PersistentVertexStore,
};
