pub mod connection;
pub mod generation;
pub mod handlers;
pub mod server;
pub mod session;

pub use connection::{Connection, ConnectionRegistry};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
