pub mod config;
pub mod location;
pub mod logging;
pub mod server;
