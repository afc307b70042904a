//! CLI-specific utilities for htsget-dl
//!
//! Kept out of the library so it carries no terminal dependencies.

pub mod progress;

pub use progress::ProgressObserver;
