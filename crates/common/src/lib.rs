//! Shared types and utilities for the multifaucet workspace.

pub mod types;
pub mod utils;

pub use types::{format_units, parse_units, Address, AddressError, UnitsError, ADDRESS_LENGTH};
