pub mod catalog;
pub mod config;
pub mod sectors;
pub mod systems;
