pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod daemon;
pub mod display;
pub mod logging;
pub mod supervisor;
