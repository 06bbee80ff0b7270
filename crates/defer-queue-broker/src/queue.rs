use defer_queue_core::{MessageAttributes, QueueError, ReceivedMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// A message held by the queue
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: MessageAttributes,
    /// Not handed out before this instant (send delay or visibility timeout)
    visible_at: Instant,
    /// Receipt of the latest delivery
    receipt: Option<String>,
    receive_count: u32,
}

/// One named queue: FIFO-ish storage with delayed visibility and
/// per-delivery visibility timeouts.
pub struct MessageQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
    visibility_timeout: Mutex<Duration>,
    arrivals: Notify,
    closed: AtomicBool,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        MessageQueue {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
            visibility_timeout: Mutex::new(visibility_timeout),
            arrivals: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message, visible once `delay` has passed
    pub fn push(&self, body: String, delay: Duration, attributes: MessageAttributes) -> String {
        let message_id = Uuid::new_v4().to_string();
        {
            let mut messages = self.messages.lock();
            messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body,
                attributes,
                visible_at: Instant::now() + delay,
                receipt: None,
                receive_count: 0,
            });
        }
        self.arrivals.notify_waiters();
        message_id
    }

    /// Hand out up to `max` visible messages, hiding each for the visibility timeout
    pub fn take_visible(&self, max: usize, now: Instant) -> Vec<ReceivedMessage> {
        let hidden_until = now + self.visibility_timeout();
        let mut messages = self.messages.lock();
        let mut batch = Vec::new();

        for message in messages.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            message.visible_at = hidden_until;
            message.receipt = Some(receipt.clone());
            message.receive_count += 1;

            batch.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt,
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
            });
        }

        batch
    }

    /// Earliest instant at which some message becomes visible
    pub fn next_visible_at(&self) -> Option<Instant> {
        let messages = self.messages.lock();
        messages.iter().map(|m| m.visible_at).min()
    }

    /// Remove the message delivered under `receipt`
    pub fn delete(&self, receipt: &str) -> bool {
        let mut messages = self.messages.lock();
        match messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
        {
            Some(index) => {
                messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Long-poll: return as soon as messages are visible or `wait` elapses
    pub async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register before checking so a push between check and wait is not missed
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::QueueNotFound(self.name.clone()));
            }

            let now = Instant::now();
            let batch = self.take_visible(max, now);
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            let wake_at = self
                .next_visible_at()
                .map_or(deadline, |visible_at| visible_at.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        *self.visibility_timeout.lock()
    }

    pub fn set_visibility_timeout(&self, timeout: Duration) {
        *self.visibility_timeout.lock() = timeout;
    }

    /// Total messages stored, in flight included
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the queue deleted and wake pending receivers
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.messages.lock().clear();
        self.arrivals.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
