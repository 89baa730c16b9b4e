//! Chunked export of key/value binary artifacts.
//!
//! A provider lives for exactly one `get-state` call. Values are packed
//! greedily into as few `provide-state-data` messages as possible without
//! any message's aggregate payload exceeding the byte budget, preserving
//! input order within and across messages.

use std::{collections::HashSet, sync::Arc};

use framing::Event;
use parking_lot::Mutex;

use crate::{
    error::{Result, RunnerErr},
    link::{HostLink, OpScope},
};

/// Most keys one provider instance may export over its lifetime.
pub const MAX_KEYS: usize = 100;

/// Largest single artifact value, in bytes.
pub const MAX_VALUE_BYTES: usize = 1 << 30;

/// Aggregate payload budget of one outbound message.
const MAX_MESSAGE_BYTES: usize = 1 << 30;

/// One key/value pair of exported state.
#[derive(Debug)]
pub struct Artifact {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// The export surface handed to a `get_state` callback.
pub struct ArtifactProvider {
    command_id: u64,
    link: Arc<HostLink>,
    scope: OpScope,
    provided: Mutex<HashSet<String>>,
}

impl ArtifactProvider {
    pub(crate) fn new(command_id: u64, link: Arc<HostLink>, scope: OpScope) -> Self {
        Self {
            command_id,
            link,
            scope,
            provided: Mutex::new(HashSet::new()),
        }
    }

    /// Exports one artifact.
    pub fn provide(&self, key: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        self.provide_all(vec![Artifact {
            key: key.into(),
            bytes,
        }])
    }

    /// Exports a batch of artifacts, in order.
    ///
    /// The whole batch is validated before any of it is flushed; a
    /// rejected batch leaves the provider exactly as it was.
    ///
    /// # Errors
    /// `DuplicateKey` when a key repeats within this provider's lifetime,
    /// `LimitExceeded` past the per-provider key budget, `ValueTooLarge`
    /// for any oversized value, `OperationClosed` after the owning
    /// operation finished.
    pub fn provide_all(&self, items: Vec<Artifact>) -> Result<()> {
        self.scope.ensure_open()?;
        if items.is_empty() {
            return Ok(());
        }

        {
            let mut provided = self.provided.lock();

            let mut batch = HashSet::new();
            for item in &items {
                if provided.contains(&item.key) || !batch.insert(item.key.as_str()) {
                    return Err(RunnerErr::DuplicateKey {
                        key: item.key.clone(),
                    });
                }
                if item.bytes.len() > MAX_VALUE_BYTES {
                    return Err(RunnerErr::ValueTooLarge {
                        key: item.key.clone(),
                        size: item.bytes.len(),
                        limit: MAX_VALUE_BYTES,
                    });
                }
            }

            if provided.len() + items.len() > MAX_KEYS {
                return Err(RunnerErr::LimitExceeded { limit: MAX_KEYS });
            }

            provided.extend(items.iter().map(|item| item.key.clone()));
        }

        for (keys, values) in pack(items, MAX_MESSAGE_BYTES) {
            self.link.send_event(
                &Event::ProvideStateData {
                    command_id: self.command_id,
                    keys,
                },
                values,
            )?;
        }
        Ok(())
    }
}

/// Greedily groups `items` into messages whose value bytes sum to at most
/// `budget`, never splitting one value and never reordering.
fn pack(items: Vec<Artifact>, budget: usize) -> Vec<(Vec<String>, Vec<Vec<u8>>)> {
    let mut messages = Vec::new();

    let mut keys = Vec::new();
    let mut values: Vec<Vec<u8>> = Vec::new();
    let mut used = 0usize;

    for item in items {
        if !keys.is_empty() && used + item.bytes.len() > budget {
            messages.push((std::mem::take(&mut keys), std::mem::take(&mut values)));
            used = 0;
        }

        used += item.bytes.len();
        keys.push(item.key);
        values.push(item.bytes);
    }

    if !keys.is_empty() {
        messages.push((keys, values));
    }
    messages
}
