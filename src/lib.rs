#![allow(non_snake_case)]

// Declare the modules that form the library's public API.
// Binaries pull these in with `use TabCleaner::module_name;`.
pub mod col;
pub mod config;
pub mod data_model;
pub mod error;
pub mod executor;
