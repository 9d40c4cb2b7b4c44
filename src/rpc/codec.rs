//! Frames are a big-endian `u32` length followed by that many bytes of JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind as IoErrorKind;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, AsyncRead};

use crate::{CrawlError, CrawlResult};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> CrawlResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CrawlError::Transport(format!(
            "frame of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `None` when the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> CrawlResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(CrawlError::Transport(format!(
            "incoming frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}
