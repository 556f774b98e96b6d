//! # sermatec-client
//!
//! Client library for Sermatec hybrid solar inverters.
//!
//! This crate provides:
//! - Async TCP session with per-query retries and timeouts
//! - High-level API to query, decode and write inverter parameters
//! - Capability listings that work without a connection
//! - YAML and environment configuration

pub mod client;
pub mod config;
pub mod connection;
pub mod error;

pub use client::{Client, ParameterInfo};
pub use config::{Config, ConfigError};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
