//! HTTP fan-out of decoded frames
//!
//! Every `/video` request gets its own [`ViewerSession`] reading the shared
//! [`FrameHub`](crate::hub::FrameHub) through a private cursor. Frames are
//! JPEG-encoded per viewer on the blocking pool and written as
//! `multipart/x-mixed-replace` parts. A viewer that waits longer than the
//! read timeout gets the fallback picture instead, so the stream never
//! stalls even while upstream is reconnecting.

pub mod config;
pub mod encode;
pub mod listener;
pub mod multipart;
pub mod producer;
pub mod session;

pub use config::ServerConfig;
pub use encode::{encode_jpeg, encode_jpeg_blocking, fallback_jpeg};
pub use listener::{router, AppState, HealthReport, StreamServer};
pub use producer::{DecoderSink, Producer};
pub use session::{SessionContext, ViewerSession, ViewerState};
