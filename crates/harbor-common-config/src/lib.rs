//! Environment configuration for Harbor.
//!
//! Loads `.env` files and exposes typed accessors over process
//! environment variables.

pub mod env;

pub use env::*;
