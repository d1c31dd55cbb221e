pub mod common;
pub mod dangling;
pub mod dataset;
pub mod events;
pub mod filter;
pub mod record;
pub mod registry;
pub mod serial;
pub mod server;
pub mod structure;

pub use common::*;
pub use dangling::*;
pub use dataset::*;
pub use events::*;
pub use filter::*;
pub use record::*;
pub use registry::*;
pub use serial::*;
pub use server::*;
pub use structure::*;
