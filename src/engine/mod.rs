//! # Engine Module
//!
//! Entity-component runtime the event bus is built on.
//!
//! This module contains:
//! - Archetype storage and the sharded entity allocator
//! - The component registry
//! - Deferred commands, command buffers and playback points
//! - Background jobs
//! - Queries, systems and stage scheduling
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod query;
pub mod commands;
pub mod buffers;
pub mod jobs;
pub mod systems;
pub mod scheduler;
pub mod manager;
