//! The child side's single funnel towards the host stream.
//!
//! Handlers run as concurrent tasks but the stream has one writer: every
//! outbound frame goes through the `HostLink` queue and a single writer
//! task drains it. The link also owns the pending-request table that
//! matches `request-data` notices with their data deliveries.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use framing::{Event, Outbound};
use log::debug;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, RunnerErr};

pub(crate) struct HostLink {
    out: mpsc::UnboundedSender<Outbound>,
    next_request_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<Vec<Vec<u8>>>>>,
    hung_up: AtomicBool,
}

impl HostLink {
    pub(crate) fn new(out: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            out,
            next_request_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            hung_up: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: Outbound) -> Result<()> {
        self.out.send(frame).map_err(|_| {
            RunnerErr::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "the host stream writer is gone",
            ))
        })
    }

    /// Queues one message frame, first segment first.
    pub(crate) fn send_message(&self, segments: Vec<Vec<u8>>) -> Result<()> {
        self.push(Outbound::Message(segments))
    }

    /// Queues one message frame whose header segment is `event`, followed
    /// by the raw payload segments.
    pub(crate) fn send_event(&self, event: &Event, payload: Vec<Vec<u8>>) -> Result<()> {
        // Serializing the derived `Event` cannot fail, it holds no
        // non-string-key maps.
        let mut segments = vec![serde_json::to_vec(event).unwrap()];
        segments.extend(payload);
        self.send_message(segments)
    }

    /// Queues one single-segment notice frame carrying `event`.
    pub(crate) fn send_notice(&self, event: &Event) -> Result<()> {
        // Serialization cannot fail, same as in `send_event`.
        self.push(Outbound::Notice(serde_json::to_vec(event).unwrap()))
    }

    /// Registers a fresh pending request.
    ///
    /// Ids come from a process-scoped monotonically increasing counter and
    /// are never reused while outstanding.
    ///
    /// # Returns
    /// The request id and the receiver its delivery will resolve.
    pub(crate) fn begin_request(&self) -> (u32, oneshot::Receiver<Vec<Vec<u8>>>) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        // After the host hung up no delivery can arrive; dropping the
        // sender here makes the waiter observe that immediately.
        if !self.hung_up.load(Ordering::SeqCst) {
            self.pending.lock().insert(request_id, tx);
        }
        (request_id, rx)
    }

    /// Fails every outstanding and future data request. Dropping the
    /// senders makes their waiters observe a hang-up instead of
    /// suspending forever; replies and events still flow so in-flight
    /// handlers can finish.
    pub(crate) fn hangup(&self) {
        self.hung_up.store(true, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    /// Resolves the pending request `request_id` with the delivered
    /// segments. A delivery nobody is waiting for (e.g. one arriving after
    /// its session was cancelled) is dropped.
    pub(crate) fn resolve(&self, request_id: u32, segments: Vec<Vec<u8>>) {
        match self.pending.lock().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(segments);
            }
            None => debug!("dropping delivery with no pending request: request_id={request_id}"),
        }
    }
}

/// The open/closed gate one lifecycle operation shares with every loader,
/// provider and tracker it hands to user code. Closing it makes further
/// use of those objects fail with `OperationClosed`.
#[derive(Clone, Default)]
pub(crate) struct OpScope(Arc<AtomicBool>);

impl OpScope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            return Err(RunnerErr::OperationClosed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn link() -> (Arc<HostLink>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(HostLink::new(tx)), rx)
    }

    #[tokio::test]
    async fn request_ids_are_monotonic() {
        let (link, _out) = link();
        let (first, _rx1) = link.begin_request();
        let (second, _rx2) = link.begin_request();
        assert!(second > first);
    }

    #[tokio::test]
    async fn delivery_resolves_its_request() {
        let (link, _out) = link();
        let (id, rx) = link.begin_request();

        link.resolve(id, vec![vec![1, 2, 3]]);
        assert_eq!(rx.await.unwrap(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn unknown_delivery_is_a_no_op() {
        let (link, _out) = link();
        // Must not panic or disturb later requests.
        link.resolve(999, vec![vec![1]]);

        let (id, rx) = link.begin_request();
        link.resolve(id, vec![]);
        assert!(rx.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hangup_fails_outstanding_and_future_requests() {
        let (link, _out) = link();
        let (_, outstanding) = link.begin_request();

        link.hangup();
        assert!(outstanding.await.is_err());

        let (_, late) = link.begin_request();
        assert!(late.await.is_err());
    }

    #[test]
    fn closed_scope_rejects_use() {
        let scope = OpScope::new();
        assert!(scope.ensure_open().is_ok());

        scope.close();
        assert!(matches!(
            scope.ensure_open(),
            Err(RunnerErr::OperationClosed)
        ));
    }
}
