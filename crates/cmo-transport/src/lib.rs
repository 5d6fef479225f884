// crates/cmo-transport/src/lib.rs
// ============================================================================
// Crate: cmo-transport
// Description: A log-style publish/subscribe transport with consumer
//              groups, at-least-once delivery, and dead-lettering.
// Purpose: The reference `Transport` implementation; a single in-process
//          append-only log per topic, partitioned by consumer group cursor,
//          standing in for a Redis-Streams-style backend.
// Dependencies: cmo-core, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`LogTransport`] is the one concrete backend this workspace ships for
//! `cmo_core::interfaces::Transport`; a real deployment would plug a
//! network-backed log (Redis Streams, NATS JetStream) behind the same
//! trait. Every topic is an append-only [`Vec`] of envelopes; each
//! consumer group tracks its own read cursor into that log, so a message
//! published once is independently replayed to every subscribed group.

pub mod log;

pub use crate::log::LogTransport;
pub use crate::log::LogTransportConfig;
