//! Core types, config, errors, and backend service traits for restgate.

pub mod config;
pub mod error;
pub mod memory;
pub mod services;
pub mod streams;
