//! API request handlers

mod events;
mod health;
mod setup;

pub use events::*;
pub use health::*;
pub use setup::*;
