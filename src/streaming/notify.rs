// SPDX-License-Identifier: GPL-3.0-only

//! Frame-ready notifications
//!
//! Delivery contract: the acquisition worker enqueues a [`FrameReady`] on every
//! subscriber's unbounded channel and moves on. It never waits for a consumer,
//! so a slow UI cannot stall acquisition. Consumers read the frame itself from
//! the frame table, which may already hold a newer frame by then.
//!
//! Events are coalesced per slot: while a subscriber has an unread event for a
//! slot, newer frames of that slot enqueue nothing. A subscriber that stops
//! polling therefore holds at most one queued event per slot.

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tracing::debug;

/// A new frame has been stored in `slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameReady {
    pub slot: usize,
}

/// Unread-event flags of one subscriber, indexed by slot
type PendingSlots = Arc<[AtomicBool]>;

fn pending_slots(slot_count: usize) -> PendingSlots {
    (0..slot_count).map(|_| AtomicBool::new(false)).collect()
}

/// Receiving end of a subscription; also usable as a `futures::Stream`
pub struct FrameReadyReceiver {
    inner: mpsc::UnboundedReceiver<FrameReady>,
    pending: PendingSlots,
}

impl FrameReadyReceiver {
    /// Take the next queued event without waiting
    pub fn try_recv(&mut self) -> Result<FrameReady, mpsc::TryRecvError> {
        let event = self.inner.try_recv()?;
        self.mark_read(event);
        Ok(event)
    }

    // Cleared before the consumer reads the frame table, so a frame stored
    // after this point queues a fresh event
    fn mark_read(&self, event: FrameReady) {
        if let Some(flag) = self.pending.get(event.slot) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

impl Stream for FrameReadyReceiver {
    type Item = FrameReady;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FrameReady>> {
        let poll = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(event)) = poll {
            self.mark_read(event);
        }
        poll
    }
}

struct Subscriber {
    sender: mpsc::UnboundedSender<FrameReady>,
    pending: PendingSlots,
}

impl Subscriber {
    /// Queue `event` unless one for the same slot is still unread; false once
    /// the receiver is gone
    fn notify(&self, event: FrameReady) -> bool {
        if self.sender.is_closed() {
            return false;
        }
        if let Some(flag) = self.pending.get(event.slot)
            && flag.swap(true, Ordering::SeqCst)
        {
            return true;
        }
        self.sender.unbounded_send(event).is_ok()
    }
}

/// Fan-out of frame-ready events to all live subscribers
pub struct FrameNotifier {
    slot_count: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl FrameNotifier {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> FrameReadyReceiver {
        let (sender, receiver) = mpsc::unbounded();
        let pending = pending_slots(self.slot_count);
        self.lock().push(Subscriber {
            sender,
            pending: Arc::clone(&pending),
        });
        FrameReadyReceiver {
            inner: receiver,
            pending,
        }
    }

    /// Notify every subscriber; subscribers whose receiver was dropped are removed
    pub fn publish(&self, slot: usize) -> usize {
        let event = FrameReady { slot };
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.notify(event));
        if subscribers.len() != before {
            debug!(
                removed = before - subscribers.len(),
                "Dropped closed frame subscribers"
            );
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_in_publish_order() {
        let notifier = FrameNotifier::new(6);
        let mut receiver = notifier.subscribe();

        assert_eq!(notifier.publish(4), 1);
        assert_eq!(notifier.publish(5), 1);

        assert_eq!(receiver.try_recv().unwrap(), FrameReady { slot: 4 });
        assert_eq!(receiver.try_recv().unwrap(), FrameReady { slot: 5 });
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_closed_subscribers_pruned() {
        let notifier = FrameNotifier::new(1);
        let mut kept = notifier.subscribe();
        let dropped = notifier.subscribe();
        drop(dropped);

        assert_eq!(notifier.publish(0), 1);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), FrameReady { slot: 0 });
    }

    #[test]
    fn test_idle_subscriber_holds_one_event_per_slot() {
        let notifier = FrameNotifier::new(3);
        let mut idle = notifier.subscribe();

        for _ in 0..1000 {
            for slot in 0..3 {
                notifier.publish(slot);
            }
        }

        let mut slots = Vec::new();
        while let Ok(event) = idle.try_recv() {
            slots.push(event.slot);
        }
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_read_event_rearms_slot() {
        let notifier = FrameNotifier::new(2);
        let mut receiver = notifier.subscribe();

        notifier.publish(1);
        notifier.publish(1);
        assert_eq!(receiver.try_recv().unwrap(), FrameReady { slot: 1 });
        assert!(receiver.try_recv().is_err());

        notifier.publish(1);
        assert_eq!(receiver.try_recv().unwrap(), FrameReady { slot: 1 });
    }

    #[test]
    fn test_coalescing_is_per_subscriber() {
        let notifier = FrameNotifier::new(1);
        let mut reader = notifier.subscribe();
        let mut idle = notifier.subscribe();

        notifier.publish(0);
        assert!(reader.try_recv().is_ok());
        notifier.publish(0);
        assert!(reader.try_recv().is_ok());

        assert!(idle.try_recv().is_ok());
        assert!(idle.try_recv().is_err());
    }

    #[test]
    fn test_stream_marks_events_read() {
        let notifier = FrameNotifier::new(1);
        let mut receiver = notifier.subscribe();

        notifier.publish(0);
        let event = futures::executor::block_on(receiver.next());
        assert_eq!(event, Some(FrameReady { slot: 0 }));

        notifier.publish(0);
        assert_eq!(receiver.try_recv().unwrap(), FrameReady { slot: 0 });
    }
}
