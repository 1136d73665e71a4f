//! Core data models for the ephemeral share store.
//!
//! `ObjectRecord` maps onto the `objects` table via `sqlx::FromRow`;
//! `Ttl` is the closed set of lifetimes an uploader may pick.

pub mod object;
pub mod ttl;
