pub mod format;
pub mod handlers;
pub mod routes;

pub use format::*;
pub use handlers::*;
pub use routes::*;
