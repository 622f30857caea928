//! # Host Bridge Traits
//!
//! Abstraction traits the playback core requires from its host.
//!
//! ## Overview
//!
//! This crate defines the contract between the playback engine and whatever
//! embeds it. Each trait represents a capability the engine needs but that the
//! host must provide: a millisecond timer to pace frames against, a set of
//! presentation callbacks, and the stream decoder that turns raw bytes into
//! displayable frames.
//!
//! ## Traits
//!
//! - [`TickSource`](time::TickSource) - Monotonic millisecond timer the pacing
//!   loop runs against; injectable for deterministic testing
//! - [`VideoHost`](video::VideoHost) - Frame presentation and progress
//!   callbacks, invoked synchronously from the playback thread
//! - [`StreamDecoder`](decoder::StreamDecoder) - Consumes raw stream byte
//!   ranges and reports how many frames became presentable
//!
//! ## Thread Safety
//!
//! `TickSource` and `VideoHost` are shared between the control and playback
//! threads and require `Send + Sync`. The decoder is owned exclusively by the
//! playback thread and only requires `Send`.
//!
//! ## Timing Discipline
//!
//! Every `VideoHost` callback runs on the playback thread's timing-critical
//! path. Implementations that block stall the frame pacing loop and show up
//! to the user as dropped or late frames.

pub mod decoder;
pub mod time;
pub mod video;

pub use decoder::{NullDecoder, StreamDecoder};
pub use time::{ManualTicks, SystemTicks, TickSource};
pub use video::{NullVideoHost, VideoHost};
