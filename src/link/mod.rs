//! # Vehicle Link
//!
//! Connection handling towards the autopilot.
//!
//! - [`codec`] splits bytes into frames and serializes outbound messages
//! - [`transport`] abstracts one open MAVLink session
//! - [`supervisor`] keeps a session alive and feeds the classifier
//! - [`LinkHandle`] is the send path shared by the supervisor and the relay
//!
//! Only one session exists at a time. Each live session has a writer task
//! draining a bounded queue of message batches; [`LinkHandle`] only ever
//! enqueues, so callers never wait on the transport. Messages sent while no
//! session is attached, or while its queue is full, are dropped.

pub mod codec;
pub mod supervisor;
pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::dialect::MavMessage;
use mavlink::Message;

pub use supervisor::Supervisor;
pub use transport::{Connector, Endpoint, Link, MavlinkConnector, MavlinkLink};

/// Batches queued towards the writer of one session
pub const OUTBOX_QUEUE: usize = 64;

/// Sending side of a session's outbound queue
pub type Outbox = mpsc::Sender<Vec<MavMessage>>;

/// Shared send path to the current session
///
/// A sequence passed to [`LinkHandle::send_all`] is queued as one batch and
/// reaches the transport without interleaving with other senders.
#[derive(Clone, Default)]
pub struct LinkHandle {
    outbox: Arc<Mutex<Option<Outbox>>>,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl LinkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route sends to the queue of the current session
    pub fn attach(&self, outbox: Outbox) {
        *self.outbox.lock() = Some(outbox);
    }

    /// Drop the current session
    pub fn detach(&self) {
        *self.outbox.lock() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.outbox.lock().as_ref().is_some_and(|outbox| !outbox.is_closed())
    }

    /// Queue one message
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the message was queued
    pub fn send(&self, message: &MavMessage) -> bool {
        self.send_all(std::slice::from_ref(message))
    }

    /// Queue messages as one batch
    ///
    /// Never waits: a full queue drops the batch.
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the batch was queued
    pub fn send_all(&self, messages: &[MavMessage]) -> bool {
        let outbox = self.outbox.lock();
        let Some(outbox) = outbox.as_ref() else {
            if !messages.is_empty() {
                debug!("No session, dropping {} outbound message(s)", messages.len());
            }
            return false;
        };

        if messages.is_empty() {
            return true;
        }

        match outbox.try_send(messages.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(batch)) => {
                warn!("Outbound queue full, dropping {} message(s)", batch.len());
                false
            }
            Err(TrySendError::Closed(batch)) => {
                debug!("Session writer stopped, dropping {} message(s)", batch.len());
                false
            }
        }
    }
}

/// Start the writer task of a session
///
/// Batches are written in order. A failed write drops the rest of its
/// batch. The task ends when every [`Outbox`] clone is dropped.
///
/// # Returns
///
/// * `(Outbox, JoinHandle<()>)` - Queue to attach and the writer task
pub fn spawn_writer(link: Arc<dyn Link>) -> (Outbox, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<MavMessage>>(OUTBOX_QUEUE);

    let task = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            for message in &batch {
                if let Err(e) = link.send(message).await {
                    warn!("Failed to send {}: {}", message.message_name(), e);
                    break;
                }
            }
        }
        debug!("Writer stopped");
    });

    (tx, task)
}

/// Outbound queue without a transport behind it, collecting what was sent
#[cfg(test)]
pub(crate) struct Capture {
    queue: Mutex<mpsc::Receiver<Vec<MavMessage>>>,
    sent: Mutex<Vec<MavMessage>>,
}

#[cfg(test)]
impl Capture {
    /// Every message queued so far
    pub(crate) fn sent(&self) -> Vec<MavMessage> {
        let mut queue = self.queue.lock();
        let mut sent = self.sent.lock();
        while let Ok(batch) = queue.try_recv() {
            sent.extend(batch);
        }
        sent.clone()
    }
}

#[cfg(test)]
pub(crate) fn capture() -> (Outbox, Capture) {
    let (tx, rx) = mpsc::channel(OUTBOX_QUEUE);
    let capture = Capture {
        queue: Mutex::new(rx),
        sent: Mutex::new(Vec::new()),
    };
    (tx, capture)
}
