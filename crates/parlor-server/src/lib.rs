pub mod connection;
pub mod http;
pub mod server;

pub use server::{start, AppState, ServerConfig, ServerHandle};
