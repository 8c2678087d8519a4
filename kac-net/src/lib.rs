pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod runner;
pub mod state;
pub mod surface;
