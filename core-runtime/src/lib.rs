//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the playback core:
//! - Logging and tracing initialization
//! - Runtime error types
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other workspace crates rely
//! on. It establishes the logging conventions used throughout the system; the
//! engine crates themselves emit diagnostics through `tracing` macros and
//! stay agnostic of how the subscriber is wired.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
