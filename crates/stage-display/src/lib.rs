pub mod display;
pub mod relay;
pub mod render;
pub mod store;
