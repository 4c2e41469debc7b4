//! Domain Layer - Core price acquisition types.
//!
//! Pure types and bookkeeping for series identity, addressing candidates,
//! quotes, connection lifecycle and subscription refcounts. Nothing here
//! performs I/O.

/// Series key normalization.
pub mod series;

/// Addressing candidate generation.
pub mod candidate;

/// Quote and price snapshot types.
pub mod quote;

/// Price cache and learned alternate feeds.
pub mod cache;

/// Connection states and stream events.
pub mod streaming;

/// Subscription reference counting.
pub mod subscription;
