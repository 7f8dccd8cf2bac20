// src/lib.rs

//! Kiosk calendar mirror library

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod renderer;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
