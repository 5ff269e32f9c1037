//! Core wire types shared by backends, tools and sessions.

pub mod completion;
pub mod generation;
pub mod message;
pub mod usage;

pub use completion::*;
pub use generation::*;
pub use message::*;
pub use usage::*;
