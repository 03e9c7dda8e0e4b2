//! Raw-cell channel: bounded, single-producer/multi-consumer
//! hand-off of row batches, column-major, plus the shared abort flag and
//! first-error slot that make cancellation prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::batch::RowBatch;
use crate::error::ReadError;

/// How often a blocked send/recv re-checks the abort flag.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Builds one bounded channel per column; the tokenizer holds every
/// sender and broadcasts the same `Arc<RowBatch>` clone down each, so a
/// batch's backing storage is freed once every column worker has dropped
/// its receive.
pub(crate) fn build_channels(
    num_columns: usize,
    capacity: usize,
) -> (Vec<SyncSender<Arc<RowBatch>>>, Vec<Receiver<Arc<RowBatch>>>) {
    let mut senders = Vec::with_capacity(num_columns);
    let mut receivers = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        let (tx, rx) = sync_channel(capacity);
        senders.push(tx);
        receivers.push(rx);
    }
    (senders, receivers)
}

/// Shared process-wide-per-read cancellation flag.
#[derive(Clone, Default)]
pub(crate) struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Sends `batch`, polling the abort flag instead of blocking indefinitely
/// on a full channel, so a peer's failure is noticed within one poll
/// interval rather than only at the next naturally-occurring send.
pub(crate) fn checked_send(
    sender: &SyncSender<Arc<RowBatch>>,
    mut batch: Arc<RowBatch>,
    abort: &AbortFlag,
) -> Result<(), ReadError> {
    loop {
        if abort.is_set() {
            return Err(ReadError::AbortedByPeer);
        }
        match sender.try_send(batch) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(b)) => {
                batch = b;
                thread::sleep(POLL_INTERVAL);
            }
            Err(TrySendError::Disconnected(_)) => return Err(ReadError::AbortedByPeer),
        }
    }
}

/// Receives the next batch, polling the abort flag while the channel is
/// empty.
pub(crate) fn checked_recv(
    receiver: &Receiver<Arc<RowBatch>>,
    abort: &AbortFlag,
) -> Result<Arc<RowBatch>, ReadError> {
    loop {
        if abort.is_set() {
            return Err(ReadError::AbortedByPeer);
        }
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(batch) => return Ok(batch),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(ReadError::AbortedByPeer),
        }
    }
}

/// First-error-wins slot shared by every worker").
///
/// `AbortedByPeer` never overwrites a concrete error and is never itself
/// published (it's synthesized on read if no worker ever reported a real
/// cause and the read was cancelled from outside), so the orchestrator
/// always surfaces the one error that actually triggered the abort.
#[derive(Clone, Default)]
pub(crate) struct ErrorSlot(Arc<Mutex<Option<ReadError>>>);

impl ErrorSlot {
    pub fn new() -> Self {
        ErrorSlot(Arc::new(Mutex::new(None)))
    }

    /// Records `err` if no error has been recorded yet. Suppresses
    /// `AbortedByPeer` unconditionally: it carries no information beyond
    /// "something else failed", which will already be (or will shortly be)
    /// recorded by whichever worker failed first.
    pub fn set_first(&self, err: ReadError, abort: &AbortFlag) {
        if matches!(err, ReadError::AbortedByPeer) {
            return;
        }
        log::warn!("read aborted: {err}");
        abort.set();
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<ReadError> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
