//! Message-passing queue between transport callbacks and the poll thread.
//!
//! Producers may live on any thread; only the poll thread drains. The
//! registry is never touched from a callback.

use tokio::sync::mpsc;

/// Create a connected sender/queue pair.
pub fn event_queue<E>() -> (EventSender<E>, EventQueue<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventQueue { rx })
}

/// Producer half. Cheap to clone; safe to move to callback threads.
#[derive(Debug)]
pub struct EventSender<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> EventSender<E> {
    /// Queue an event for the next poll.
    ///
    /// Returns `false` if the consuming session is gone.
    pub fn push(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the consuming queue has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Consumer half, owned by the poll thread.
#[derive(Debug)]
pub struct EventQueue<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventQueue<E> {
    /// Move every queued event into `out`, preserving order.
    ///
    /// Returns the number of events drained.
    pub fn drain_into(&mut self, out: &mut Vec<E>) -> usize {
        let mut count = 0;
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
            count += 1;
        }
        count
    }

    /// Take the next queued event without blocking.
    pub fn try_next(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}
