mod envelope;
mod error;
mod frame;
pub mod host;

use tokio::io::{AsyncRead, AsyncWrite};

pub use envelope::{
    Call, CommandEnvelope, DatasetParam, EvalOutputMeta, Event, Message, Reply,
};
pub use error::{ErrBody, ErrCode};
pub use frame::{FrameReceiver, FrameSender, Inbound, Outbound};

/// Creates both ends of the child-side framed channel.
///
/// Given a reader and writer of the duplex host stream, returns the
/// decoder for host-originated frames and the encoder for child-originated
/// frames.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// The receiving and sending halves of the framed channel.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
