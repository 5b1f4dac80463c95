pub mod config;
pub mod osc;
pub mod platform;
pub mod protocol;
