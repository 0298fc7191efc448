//! Upstream handshake
//!
//! The camera expects two text frames before it starts streaming:
//!
//! ```text
//! Client                                   Camera
//!   |                                        |
//!   |------- text: credential token ------->|
//!   |------- text: stream options --------->|
//!   |                                        |
//!   |<------ binary: bitstream chunk -------|
//!   |<------ binary: bitstream chunk -------|
//!   |                  ...                   |
//! ```
//!
//! There is no acknowledgement; the first binary frame is the first chunk.

use super::transport::UpstreamConnection;
use crate::error::UpstreamError;

/// Send the token, then the options
///
/// Any send failure is reported as [`UpstreamError::Handshake`], which the
/// client treats like every other transport error.
pub async fn handshake<C: UpstreamConnection>(
    conn: &mut C,
    token: &str,
    options: &str,
) -> Result<(), UpstreamError> {
    conn.send_text(token)
        .await
        .map_err(|e| UpstreamError::Handshake(format!("sending token: {e}")))?;

    conn.send_text(options)
        .await
        .map_err(|e| UpstreamError::Handshake(format!("sending options: {e}")))?;

    Ok(())
}
