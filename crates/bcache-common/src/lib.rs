//! bcache Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, the CRC-64 checksum engine and
//! the configuration types used by the on-disk codec, the device-identify
//! layer and the CLI.

pub mod checksum;
pub mod config;
pub mod error;

pub use checksum::{crc64, csum_set};
pub use config::Config;
pub use error::{DeviceCondition, Error, FormatError, Result};
