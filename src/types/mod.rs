//! Core types for Parley.

pub mod generation;
pub mod message;
pub mod state;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use state::*;
pub use usage::*;
