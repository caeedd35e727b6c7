//! Core HIVE primitives shared across crates.
//!
//! Includes the overlay identifier type, node addresses, hash and clock helpers, and base errors.

pub mod address;
pub mod error;
pub mod guid;
pub mod hash;
pub mod time;

pub use address::NodeAddress;
pub use error::{AddressError, GuidError};
pub use guid::{Guid, DIGIT_RADIX, GUID_LEN, N_DIGITS};
