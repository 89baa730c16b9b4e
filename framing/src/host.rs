//! The host-side counterpart of the frame codec.
//!
//! A Rust host (or a test acting as one) encodes command and delivery
//! frames and decodes the message and notice frames the child writes back.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{self, Outbound, read_segment, read_u32, seg_header};

/// Creates both ends of the host-side framed channel.
///
/// # Arguments
/// * `rx` - An async readable carrying child-originated frames.
/// * `tx` - An async writable towards the child.
///
/// # Returns
/// The receiving and sending halves of the host channel.
pub fn channel<R, W>(rx: R, tx: W) -> (HostReceiver<R>, HostSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (HostReceiver { rx }, HostSender { tx, buf: Vec::new() })
}

/// Decodes frames the child wrote to the stream.
pub struct HostReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> HostReceiver<R> {
    /// Waits for the next child frame.
    ///
    /// # Returns
    /// The decoded frame, or `None` once the child hung up cleanly.
    pub async fn recv(&mut self) -> io::Result<Option<Outbound>> {
        let mut tag = [0u8; 1];
        match self.rx.read_exact(&mut tag).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        match tag[0] {
            frame::MESSAGE_TAG => {
                let count = read_u32(&mut self.rx).await? as usize + 1;

                let mut segments = Vec::with_capacity(count);
                for _ in 0..count {
                    segments.push(read_segment(&mut self.rx).await?);
                }

                let mut terminator = [0u8; 1];
                self.rx.read_exact(&mut terminator).await?;
                if terminator[0] != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bad message terminator byte {}", terminator[0]),
                    ));
                }

                Ok(Some(Outbound::Message(segments)))
            }
            frame::NOTICE_TAG => {
                let body = read_segment(&mut self.rx).await?;
                Ok(Some(Outbound::Notice(body)))
            }
            byte => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("received an invalid frame tag byte {byte}"),
            )),
        }
    }
}

/// Encodes host-originated frames.
pub struct HostSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> HostSender<W> {
    /// Sends one JSON command envelope.
    pub async fn send_command(&mut self, body: &[u8]) -> io::Result<()> {
        let Self { tx, buf } = self;

        buf.clear();
        buf.push(frame::MESSAGE_TAG);
        buf.extend_from_slice(&seg_header(body.len()));
        buf.extend_from_slice(body);

        tx.write_all(buf).await?;
        tx.flush().await
    }

    /// Sends the segments answering one `request-data` notice.
    ///
    /// # Arguments
    /// * `request_id` - The id the child attached to its request.
    /// * `segments` - The payload segments, in element order.
    pub async fn send_delivery(&mut self, request_id: u32, segments: &[Vec<u8>]) -> io::Result<()> {
        let Self { tx, buf } = self;

        buf.clear();
        buf.push(frame::NOTICE_TAG);
        buf.extend_from_slice(&request_id.to_be_bytes());
        buf.extend_from_slice(&(segments.len() as u32).to_be_bytes());
        for segment in segments {
            buf.extend_from_slice(&seg_header(segment.len()));
            buf.extend_from_slice(segment);
        }

        tx.write_all(buf).await?;
        tx.flush().await
    }
}
