//! Core types shared by every layer of the Sparvio Serial Protocol (SSP).
//!
//! This crate defines protocol constants, structured diagnostic kinds,
//! configuration and the minimal scheduler contract. It contains no
//! protocol logic.

pub mod config;
pub mod constants;
pub mod error;
pub mod scheduler;

pub use constants::{ComponentId, ErrorCode, RegIx, Verbosity};
pub use error::ProtocolFault;
