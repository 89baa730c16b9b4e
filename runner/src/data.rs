//! Pull-based remote-dataset cursors.
//!
//! A `DataLoader` owns the cursor over one host-side dataset. Elements are
//! never pushed: each `next` call emits a `request-data` notice and
//! suspends until the host answers it with a data delivery carrying the
//! same request id. The cursor advances the moment the request is issued,
//! so overlapping `next` calls read disjoint contiguous ranges.

use std::sync::Arc;

use framing::{DatasetParam, Event};
use parking_lot::Mutex;

use crate::{
    error::{Result, RunnerErr},
    link::{HostLink, OpScope},
};

/// The cursor over one named dataset parameter.
pub struct DataLoader {
    param: DatasetParam,
    link: Arc<HostLink>,
    scope: OpScope,
    cursor: Mutex<u64>,
}

impl DataLoader {
    pub(crate) fn new(param: DatasetParam, link: Arc<HostLink>, scope: OpScope) -> Self {
        Self {
            param,
            link,
            scope,
            cursor: Mutex::new(0),
        }
    }

    /// The parameter name this loader was bound to.
    pub fn name(&self) -> &str {
        &self.param.name
    }

    /// The host-side dataset id elements are fetched from.
    pub fn dataset_id(&self) -> &str {
        &self.param.dataset_id
    }

    pub fn element_count(&self) -> u64 {
        self.param.element_count
    }

    pub fn total_byte_size(&self) -> u64 {
        self.param.total_byte_size
    }

    pub fn position(&self) -> u64 {
        *self.cursor.lock()
    }

    /// Elements left between the cursor and the end of the dataset.
    pub fn remaining(&self) -> u64 {
        self.element_count() - self.position()
    }

    /// Whether at least `n` elements are left to read.
    pub fn has_next(&self, n: u64) -> bool {
        self.remaining() >= n
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    /// `InvalidArgument` when `position` lies at or past the element count
    /// (an empty dataset only admits position zero).
    pub fn set_position(&self, position: u64) -> Result<()> {
        if position >= self.element_count() && position != 0 {
            return Err(RunnerErr::InvalidArgument(format!(
                "position {position} is out of range for {} elements of dataset {}",
                self.element_count(),
                self.dataset_id(),
            )));
        }

        *self.cursor.lock() = position;
        Ok(())
    }

    /// Fetches up to `n` elements from the cursor onwards.
    ///
    /// Clamps to the remaining element count; zero remaining resolves
    /// immediately to an empty vec. The cursor advances before this call
    /// suspends, so a concurrent `next` never observes a stale position.
    ///
    /// # Arguments
    /// * `n` - The number of elements asked for.
    ///
    /// # Returns
    /// The delivered segments, one per element, in index order.
    ///
    /// # Errors
    /// `OperationClosed` once the owning operation has completed.
    pub async fn next(&self, n: u64) -> Result<Vec<Vec<u8>>> {
        self.scope.ensure_open()?;

        let (start_index, amount) = {
            let mut cursor = self.cursor.lock();
            let amount = n.min(self.element_count() - *cursor);
            if amount == 0 {
                return Ok(Vec::new());
            }

            let start_index = *cursor;
            *cursor += amount;
            (start_index, amount)
        };

        let (request_id, delivery) = self.link.begin_request();
        self.link.send_notice(&Event::RequestData {
            request_id,
            dataset_id: self.param.dataset_id.clone(),
            start_index,
            amount,
        })?;

        delivery.await.map_err(|_| {
            RunnerErr::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "the host hung up before delivering data",
            ))
        })
    }

    /// Asks the host to permute this dataset. The local cursor is left
    /// untouched, repositioning is the caller's business.
    pub fn shuffle(&self) -> Result<()> {
        self.scope.ensure_open()?;
        self.link.send_notice(&Event::Shuffle {
            dataset_ids: vec![self.param.dataset_id.clone()],
        })
    }

    /// Asks the host to permute this dataset and every loader in `others`
    /// with one shared random order. No cursor is touched.
    pub fn shuffle_in_group(&self, others: &[&DataLoader]) -> Result<()> {
        self.scope.ensure_open()?;

        let mut dataset_ids = Vec::with_capacity(others.len() + 1);
        dataset_ids.push(self.param.dataset_id.clone());
        dataset_ids.extend(others.iter().map(|l| l.param.dataset_id.clone()));

        self.link.send_notice(&Event::Shuffle { dataset_ids })
    }
}

/// A single-element dataset read whole, the shape trained state arrives in.
pub struct ArtifactLoader {
    inner: DataLoader,
}

impl ArtifactLoader {
    pub(crate) fn new(inner: DataLoader) -> Result<Self> {
        if inner.element_count() != 1 {
            return Err(RunnerErr::InvalidArgument(format!(
                "artifact {} must have exactly one element, got {}",
                inner.name(),
                inner.element_count(),
            )));
        }
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn byte_size(&self) -> u64 {
        self.inner.total_byte_size()
    }

    /// Fetches the whole artifact value.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.inner.set_position(0)?;
        let mut segments = self.inner.next(1).await?;

        if segments.len() != 1 {
            return Err(RunnerErr::Protocol(format!(
                "expected one segment for artifact {}, got {}",
                self.inner.name(),
                segments.len(),
            )));
        }
        Ok(segments.swap_remove(0))
    }
}

#[cfg(test)]
mod test {
    use framing::Outbound;
    use tokio::sync::mpsc;

    use super::*;

    fn link() -> (Arc<HostLink>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(HostLink::new(tx)), rx)
    }

    fn loader(link: &Arc<HostLink>, scope: &OpScope, element_count: u64) -> DataLoader {
        let param = DatasetParam {
            name: "features".to_string(),
            dataset_id: "d1".to_string(),
            element_count,
            total_byte_size: element_count * 4,
        };
        DataLoader::new(param, link.clone(), scope.clone())
    }

    async fn expect_request(out: &mut mpsc::UnboundedReceiver<Outbound>) -> (u32, String, u64, u64) {
        let Some(Outbound::Notice(body)) = out.recv().await else {
            panic!("expected a notice frame");
        };
        match serde_json::from_slice(&body).unwrap() {
            Event::RequestData {
                request_id,
                dataset_id,
                start_index,
                amount,
            } => (request_id, dataset_id, start_index, amount),
            other => panic!("expected request-data, got {other:?}"),
        }
    }

    /// Answers every request with `amount` one-byte segments.
    fn pump(link: Arc<HostLink>, mut out: mpsc::UnboundedReceiver<Outbound>) {
        tokio::spawn(async move {
            while let Some(frame) = out.recv().await {
                let Outbound::Notice(body) = frame else {
                    continue;
                };
                if let Ok(Event::RequestData {
                    request_id,
                    start_index,
                    amount,
                    ..
                }) = serde_json::from_slice(&body)
                {
                    let segments = (start_index..start_index + amount)
                        .map(|i| vec![i as u8])
                        .collect();
                    link.resolve(request_id, segments);
                }
            }
        });
    }

    #[tokio::test]
    async fn next_clamps_to_the_element_count() {
        let (link, out) = link();
        let scope = OpScope::new();
        let loader = loader(&link, &scope, 5);
        pump(link.clone(), out);

        let first = loader.next(3).await.unwrap();
        let second = loader.next(4).await.unwrap();
        let third = loader.next(1).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(third.is_empty());
        assert_eq!(loader.position(), 5);
        assert_eq!(loader.remaining(), 0);
        assert!(!loader.has_next(1));
    }

    #[tokio::test]
    async fn set_position_rejects_out_of_range() {
        let (link, _out) = link();
        let scope = OpScope::new();
        let bounded = loader(&link, &scope, 4);

        for position in 0..4 {
            bounded.set_position(position).unwrap();
            assert_eq!(bounded.position(), position);
        }
        for position in [4, 5, 100] {
            assert!(matches!(
                bounded.set_position(position),
                Err(RunnerErr::InvalidArgument(_))
            ));
        }

        let empty = loader(&link, &scope, 0);
        empty.set_position(0).unwrap();
        assert!(empty.set_position(1).is_err());
    }

    #[tokio::test]
    async fn concurrent_next_calls_read_disjoint_ranges() {
        let (link, mut out) = link();
        let scope = OpScope::new();
        let loader = Arc::new(loader(&link, &scope, 10));

        let l1 = loader.clone();
        let first = tokio::spawn(async move { l1.next(4).await.unwrap() });
        let (id1, _, start1, amount1) = expect_request(&mut out).await;

        let l2 = loader.clone();
        let second = tokio::spawn(async move { l2.next(4).await.unwrap() });
        let (id2, _, start2, amount2) = expect_request(&mut out).await;

        // Cursor advancement order determines the ranges, not delivery order.
        assert_eq!((start1, amount1), (0, 4));
        assert_eq!((start2, amount2), (4, 4));

        link.resolve(id2, vec![vec![b'b']; 4]);
        link.resolve(id1, vec![vec![b'a']; 4]);

        assert_eq!(first.await.unwrap(), vec![vec![b'a']; 4]);
        assert_eq!(second.await.unwrap(), vec![vec![b'b']; 4]);
        assert_eq!(loader.position(), 8);
    }

    #[tokio::test]
    async fn next_fails_once_the_operation_completed() {
        let (link, _out) = link();
        let scope = OpScope::new();
        let loader = loader(&link, &scope, 5);

        scope.close();
        assert!(matches!(
            loader.next(1).await,
            Err(RunnerErr::OperationClosed)
        ));
    }

    #[tokio::test]
    async fn shuffle_in_group_names_every_dataset() {
        let (link, mut out) = link();
        let scope = OpScope::new();
        let a = loader(&link, &scope, 3);
        let mut b = loader(&link, &scope, 3);
        b.param.dataset_id = "d2".to_string();

        a.set_position(2).unwrap();
        a.shuffle_in_group(&[&b]).unwrap();

        let Some(Outbound::Notice(body)) = out.recv().await else {
            panic!("expected a notice frame");
        };
        match serde_json::from_slice(&body).unwrap() {
            Event::Shuffle { dataset_ids } => assert_eq!(dataset_ids, ["d1", "d2"]),
            other => panic!("expected shuffle, got {other:?}"),
        }

        // The cursor stays where it was.
        assert_eq!(a.position(), 2);
    }

    #[tokio::test]
    async fn artifact_loader_requires_a_single_element() {
        let (link, _out) = link();
        let scope = OpScope::new();

        assert!(ArtifactLoader::new(loader(&link, &scope, 2)).is_err());
        assert!(ArtifactLoader::new(loader(&link, &scope, 1)).is_ok());
    }

    #[tokio::test]
    async fn artifact_read_rewinds_and_fetches_the_value() {
        let (link, out) = link();
        let scope = OpScope::new();
        let artifact = ArtifactLoader::new(loader(&link, &scope, 1)).unwrap();
        pump(link.clone(), out);

        // Two reads in a row both see position zero.
        assert_eq!(artifact.read().await.unwrap(), vec![0]);
        assert_eq!(artifact.read().await.unwrap(), vec![0]);
    }
}
