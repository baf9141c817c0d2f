// src/models/mod.rs
pub mod driver;
pub mod events;
pub mod ride;
pub mod user;

pub use driver::*;
pub use events::*;
pub use ride::*;
pub use user::*;
