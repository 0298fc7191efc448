//! Frame hub for decoded-frame fan-out
//!
//! The hub sits between the single producer and any number of HTTP viewers.
//! Each viewer holds its own cursor (the last sequence number it was given),
//! so every viewer sees every frame it is fast enough to read, and a slow
//! viewer only ever misses frames.
//!
//! # Architecture
//!
//! ```text
//!                           FrameHub (Arc)
//!                     ┌─────────────────────────┐
//!                     │ ring: Mutex<FrameRing>  │
//!                     │   [seq 8][seq 9][seq 10]│
//!                     │ tx: watch<latest seq>   │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]              [Cursor A]              [Cursor B]
//!    publish(frame)          next(1s) -> seq 10      next(1s) -> seq 9
//! ```
//!
//! # Zero-Copy Design
//!
//! Frames are stored as `Arc<DecodedFrame>` and the raster is `bytes::Bytes`,
//! so all viewers share the same allocation.

pub mod config;
pub mod frame;
pub mod ring;
pub mod store;

pub use config::HubConfig;
pub use frame::{DecodedFrame, PixelFormat};
pub use ring::{FrameRing, RingRead};
pub use store::{FrameCursor, FrameHub};
