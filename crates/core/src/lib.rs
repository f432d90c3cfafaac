//! Shared building blocks for the Tidings notification service.
//!
//! Everything in this crate is free of I/O: identifiers and timestamps,
//! the domain error type, the immutable [`config::ActivityConfig`],
//! polymorphic entity references, capability traits for targets,
//! notifiables and notifiers, and the pure rules used by the grouping
//! engine.

pub mod channels;
pub mod config;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod grouping;
pub mod key;
pub mod policy;
pub mod types;
