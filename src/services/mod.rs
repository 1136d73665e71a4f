//! Core services: identity, persistence, admission and reclamation.

pub mod admission;
pub mod blob_store;
pub mod id_generator;
#[cfg(test)]
pub(crate) mod memory_metadata;
pub mod metadata_store;
pub mod object_store;
pub mod sweeper;
