pub mod barrier;
pub mod config;
pub mod driver;
pub mod grid;
pub mod loader;
pub mod output;
pub mod pricing;
pub mod rental;
pub mod simulation;
pub mod vehicle;
