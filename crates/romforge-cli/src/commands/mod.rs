//! CLI command implementations.
//!
//! This module contains the implementation of each CLI command.

pub mod archive;
pub mod checksum;
pub mod find;
pub mod hex_utils;
pub mod patch;
pub mod validate;
