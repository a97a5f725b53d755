//! Core types and trait definitions for the Folio lending engine.
//!
//! This crate is deliberately free of database and transport dependencies.
//! All other crates depend on it; it holds the loan state machine, the
//! annotation visibility rules, and the storage/collaborator seams.

pub mod access;
pub mod annotation;
pub mod audit;
pub mod clock;
pub mod collab;
pub mod error;
pub mod loan;
pub mod renewal;
pub mod store;
pub mod transition;

pub use error::{Error, Result};
