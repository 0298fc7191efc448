//! multipart/x-mixed-replace framing
//!
//! Each part replaces the previous picture in the viewer:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Part boundary
pub const BOUNDARY: &str = "frame";

/// Response content type
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frame one JPEG as a complete part
pub fn part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}
