// src/models/mod.rs
pub mod events;
pub mod payment;
pub mod profile;
pub mod ride;
pub mod vehicle;

pub use events::*;
pub use payment::*;
pub use profile::*;
pub use ride::*;
pub use vehicle::*;
