// src/lib.rs
pub mod config;
pub mod drivers;
pub mod engine;
pub mod indicator;
pub mod types;
