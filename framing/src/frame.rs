//! The wire-level frame codec for the child side of the protocol.
//!
//! Four self-delimited shapes travel over the single duplex stream:
//!
//! * host -> child, tag `0`: a command, one 8-byte segment header followed
//!   by that many bytes of JSON envelope.
//! * host -> child, non-zero tag: a data delivery, a 4-byte request id, a
//!   4-byte segment count and the segments themselves.
//! * child -> host, tag `0`: a message, `segment_count - 1` as 4 bytes,
//!   each segment behind an 8-byte header, one trailing zero byte.
//! * child -> host, tag `1`: a notice, one 8-byte header and a JSON body.
//!
//! Every multi-byte integer is big-endian. In each 8-byte segment header
//! the first four bytes are reserved as zero and the last four carry the
//! segment's byte length.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const SEG_HEADER_SIZE: usize = 8;

pub(crate) const MESSAGE_TAG: u8 = 0;
pub(crate) const NOTICE_TAG: u8 = 1;

/// One frame decoded off the host stream.
#[derive(Debug)]
pub enum Inbound {
    /// A JSON command envelope.
    Command(Vec<u8>),
    /// Segments answering an earlier `request-data` notice.
    Delivery {
        request_id: u32,
        segments: Vec<Vec<u8>>,
    },
}

/// One frame the child writes to the host stream.
#[derive(Debug)]
pub enum Outbound {
    /// A reply or a segment-carrying event. The first segment is always
    /// the structured JSON header, the rest are raw payload.
    Message(Vec<Vec<u8>>),
    /// A single JSON event body (`request-data` or `shuffle`).
    Notice(Vec<u8>),
}

pub(crate) fn seg_header(len: usize) -> [u8; SEG_HEADER_SIZE] {
    let mut header = [0u8; SEG_HEADER_SIZE];
    header[4..].copy_from_slice(&(len as u32).to_be_bytes());
    header
}

pub(crate) async fn read_u32<R: AsyncRead + Unpin>(rx: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    rx.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads one 8-byte segment header plus its payload.
pub(crate) async fn read_segment<R: AsyncRead + Unpin>(rx: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; SEG_HEADER_SIZE];
    rx.read_exact(&mut header).await?;

    // The header tail is exactly four bytes long.
    let len = u32::from_be_bytes(header[4..].try_into().unwrap()) as usize;

    let mut payload = vec![0u8; len];
    rx.read_exact(&mut payload).await?;
    Ok(payload)
}

/// The receiving end handle of the framed channel.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame from the host.
    ///
    /// Buffers until every byte the frame declares is available; a stream
    /// that closes between frames yields `None`, a stream that closes in
    /// the middle of one is a fatal protocol error.
    ///
    /// # Returns
    /// The decoded frame, or `None` once the host hung up cleanly.
    pub async fn recv(&mut self) -> io::Result<Option<Inbound>> {
        let mut tag = [0u8; 1];
        match self.rx.read_exact(&mut tag).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        if tag[0] == MESSAGE_TAG {
            let payload = read_segment(&mut self.rx).await?;
            return Ok(Some(Inbound::Command(payload)));
        }

        let request_id = read_u32(&mut self.rx).await?;
        let count = read_u32(&mut self.rx).await? as usize;

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(read_segment(&mut self.rx).await?);
        }

        Ok(Some(Inbound::Delivery {
            request_id,
            segments,
        }))
    }
}

/// The sending end handle of the framed channel.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `frame` to the host.
    ///
    /// # Arguments
    /// * `frame` - The outbound frame to encode and write.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(&mut self, frame: &Outbound) -> io::Result<()> {
        let Self { tx, buf } = self;

        buf.clear();
        match frame {
            Outbound::Message(segments) => {
                if segments.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "a message frame carries at least its header segment",
                    ));
                }

                buf.push(MESSAGE_TAG);
                buf.extend_from_slice(&(segments.len() as u32 - 1).to_be_bytes());
                for segment in segments {
                    buf.extend_from_slice(&seg_header(segment.len()));
                    buf.extend_from_slice(segment);
                }
                buf.push(0);
            }
            Outbound::Notice(body) => {
                buf.push(NOTICE_TAG);
                buf.extend_from_slice(&seg_header(body.len()));
                buf.extend_from_slice(body);
            }
        }

        tx.write_all(buf).await?;
        tx.flush().await
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{self, AsyncWriteExt};

    use super::*;
    use crate::host;

    #[tokio::test]
    async fn command_frame_reaches_child() {
        let (one, two) = io::duplex(1024);
        let (rx, tx) = io::split(one);
        let (_, mut host_tx) = host::channel(rx, tx);

        host_tx.send_command(br#"{"method":"dispose"}"#).await.unwrap();

        let (rx, tx) = io::split(two);
        let (mut child_rx, _) = crate::channel(rx, tx);

        match child_rx.recv().await.unwrap().unwrap() {
            Inbound::Command(body) => assert_eq!(body, br#"{"method":"dispose"}"#),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_frame_keeps_segment_order() {
        let (one, two) = io::duplex(1024);
        let (rx, tx) = io::split(one);
        let (_, mut host_tx) = host::channel(rx, tx);

        let segments = vec![vec![1u8, 2, 3], vec![], vec![9u8]];
        host_tx.send_delivery(7, &segments).await.unwrap();

        let (rx, tx) = io::split(two);
        let (mut child_rx, _) = crate::channel(rx, tx);

        match child_rx.recv().await.unwrap().unwrap() {
            Inbound::Delivery {
                request_id,
                segments: got,
            } => {
                assert_eq!(request_id, 7);
                assert_eq!(got, segments);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_frame_round_trips() {
        let (one, two) = io::duplex(1024);
        let (rx, tx) = io::split(one);
        let (_, mut child_tx) = crate::channel(rx, tx);

        let segments = vec![b"{}".to_vec(), vec![0xAA; 16]];
        child_tx
            .send(&Outbound::Message(segments.clone()))
            .await
            .unwrap();

        let (rx, tx) = io::split(two);
        let (mut host_rx, _) = host::channel(rx, tx);

        match host_rx.recv().await.unwrap().unwrap() {
            Outbound::Message(got) => assert_eq!(got, segments),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notice_frame_round_trips() {
        let (one, two) = io::duplex(1024);
        let (rx, tx) = io::split(one);
        let (_, mut child_tx) = crate::channel(rx, tx);

        child_tx
            .send(&Outbound::Notice(b"{\"event\":\"shuffle\"}".to_vec()))
            .await
            .unwrap();

        let (rx, tx) = io::split(two);
        let (mut host_rx, _) = host::channel(rx, tx);

        match host_rx.recv().await.unwrap().unwrap() {
            Outbound::Notice(body) => assert_eq!(body, b"{\"event\":\"shuffle\"}"),
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_message_frame_is_rejected() {
        let (one, _two) = io::duplex(64);
        let (rx, tx) = io::split(one);
        let (_, mut child_tx) = crate::channel(rx, tx);

        let err = child_tx.send(&Outbound::Message(vec![])).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn clean_eof_ends_the_stream() {
        let (one, two) = io::duplex(64);
        drop(one);

        let (rx, tx) = io::split(two);
        let (mut child_rx, _) = crate::channel(rx, tx);

        assert!(child_rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_fatal() {
        let (mut one, two) = io::duplex(64);

        // A command tag plus a header that promises 100 bytes, then hang up.
        one.write_all(&[0u8]).await.unwrap();
        one.write_all(&seg_header(100)).await.unwrap();
        one.write_all(&[1, 2, 3]).await.unwrap();
        drop(one);

        let (rx, tx) = io::split(two);
        let (mut child_rx, _) = crate::channel(rx, tx);

        let err = child_rx.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
