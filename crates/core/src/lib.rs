//! DropCraft Core Types
//!
//! Addresses, amounts and the finalized contribution map shared by every
//! DropCraft crate, plus the input validation that runs before the engine.

mod apportion;
mod error;
pub mod serde_hex;
mod types;

pub use apportion::apportion;
pub use error::*;
pub use types::*;

pub use primitive_types::{U256, U512};
