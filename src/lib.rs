pub mod analysis;
pub mod color;
pub mod config;
pub mod data;
pub mod duration;
pub mod error;
pub mod export;
pub mod project;
pub mod state;
