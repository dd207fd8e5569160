//! Client for the external embedding service.
//!
//! Wire format, one exchange per connection:
//!   request:  u32 little-endian length, then a JPEG of the image
//!   reply:    u32 little-endian length, then JSON
//!             `{"Faces": [{"bbox": {...}, "embedding": [...]}, ...]}` or `{"Error": "..."}`

use image::RgbImage;
use porter_core::{DetectedFace, EmbeddingOracle, OracleError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const MAX_REPLY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub enum OracleReply {
    Faces(Vec<DetectedFace>),
    Error(String),
}

pub struct ServiceOracle {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ServiceOracle {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    fn connect(&self) -> Result<UnixStream, OracleError> {
        let stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| OracleError::Unavailable(format!("{}: {e}", self.socket_path.display())))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        Ok(stream)
    }
}

impl EmbeddingOracle for ServiceOracle {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, OracleError> {
        let jpeg = porter_hw::encode_jpeg(image).map_err(|e| OracleError::Protocol(e.to_string()))?;
        let mut stream = self.connect()?;

        write_frame(&mut stream, &jpeg).map_err(|e| OracleError::Unavailable(format!("send: {e}")))?;
        let body = read_frame(&mut stream)?;

        match serde_json::from_slice::<OracleReply>(&body) {
            Ok(OracleReply::Faces(faces)) => {
                tracing::trace!(faces = faces.len(), "oracle reply");
                Ok(faces)
            }
            Ok(OracleReply::Error(msg)) => Err(OracleError::Remote(msg)),
            Err(e) => Err(OracleError::Protocol(format!("bad reply: {e}"))),
        }
    }
}

fn write_frame(stream: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

fn read_frame(stream: &mut impl Read) -> Result<Vec<u8>, OracleError> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .map_err(|e| OracleError::Unavailable(format!("receive: {e}")))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_REPLY_BYTES {
        return Err(OracleError::Protocol(format!("reply too large: {len} bytes")));
    }
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .map_err(|e| OracleError::Unavailable(format!("receive: {e}")))?;
    Ok(body)
}
