//! Single-slot handoff between the scheduler and the render tick.

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Slot<T> {
    item: Option<T>,
    started: bool,
    generation: u64,
}

/// One pending item plus the "playback started" flag, both behind one lock
/// that is held only for the swap or read.
///
/// Writes overwrite; reads drain. The producer never waits for the consumer.
/// Every [`clear`](Self::clear) starts a new generation; writers holding an
/// older one are turned away.
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    started: Notify,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                started: false,
                generation: 0,
            }),
            started: Notify::new(),
        }
    }

    /// Stores `item`, returning whatever unread item it displaced.
    ///
    /// The displaced item is dropped by the caller, outside the lock.
    #[must_use = "the displaced item should be dropped (and counted) by the caller"]
    pub fn put(&self, item: T) -> Option<T> {
        self.slot.lock().item.replace(item)
    }

    /// Stores `item` if the mailbox is still at `generation`.
    ///
    /// `Ok` carries the displaced item as in [`put`](Self::put); `Err` hands
    /// `item` back untouched when the mailbox has been cleared since.
    pub fn put_current(&self, generation: u64, item: T) -> Result<Option<T>, T> {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return Err(item);
        }
        Ok(slot.item.replace(item))
    }

    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// Takes the pending item, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().item.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().item.is_none()
    }

    /// Sets the started flag. Returns `true` only for the call that flipped it.
    pub fn mark_started(&self) -> bool {
        let first = {
            let mut slot = self.slot.lock();
            !std::mem::replace(&mut slot.started, true)
        };
        if first {
            self.started.notify_waiters();
        }
        first
    }

    pub fn is_started(&self) -> bool {
        self.slot.lock().started
    }

    /// Resolves once the started flag is set.
    pub async fn wait_started(&self) {
        loop {
            let notified = self.started.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `mark_started` is not lost.
            notified.as_mut().enable();
            if self.is_started() {
                return;
            }
            notified.await;
        }
    }

    /// Empties the slot and resets the started flag. Writers must pick up the
    /// new [`generation`](Self::generation) afterwards.
    pub fn clear(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        slot.started = false;
        slot.generation += 1;
        slot.item.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Stand-in for a frame's GPU buffers: counts live instances.
    struct Tracked {
        id: u32,
        live: Arc<AtomicUsize>,
    }

    impl Tracked {
        fn new(id: u32, live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self {
                id,
                live: live.clone(),
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn second_write_wins() {
        let live = Arc::new(AtomicUsize::new(0));
        let mailbox = Mailbox::new();

        assert!(mailbox.put(Tracked::new(1, &live)).is_none());
        let displaced = mailbox.put(Tracked::new(2, &live));
        assert_eq!(displaced.as_ref().map(|t| t.id), Some(1));
        drop(displaced);

        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(mailbox.take().map(|t| t.id), Some(2));
        assert!(mailbox.take().is_none());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn started_flips_once() {
        let mailbox: Mailbox<()> = Mailbox::new();
        assert!(!mailbox.is_started());
        assert!(mailbox.mark_started());
        assert!(!mailbox.mark_started());
        assert!(mailbox.is_started());
    }

    #[test]
    fn clear_resets_everything() {
        let mailbox = Mailbox::new();
        let _ = mailbox.put(7u32);
        mailbox.mark_started();

        assert_eq!(mailbox.clear(), Some(7));
        assert!(mailbox.is_empty());
        assert!(!mailbox.is_started());
        assert!(mailbox.mark_started());
    }

    #[test]
    fn writes_from_a_cleared_generation_are_refused() {
        let live = Arc::new(AtomicUsize::new(0));
        let mailbox = Mailbox::new();
        let old = mailbox.generation();
        assert!(matches!(mailbox.put_current(old, Tracked::new(1, &live)), Ok(None)));

        drop(mailbox.clear());
        let refused = mailbox.put_current(old, Tracked::new(2, &live));
        assert_eq!(refused.as_ref().err().map(|t| t.id), Some(2));
        drop(refused);
        assert!(mailbox.is_empty());
        assert_eq!(live.load(Ordering::SeqCst), 0);

        let current = mailbox.generation();
        assert_ne!(current, old);
        assert!(matches!(mailbox.put_current(current, Tracked::new(3, &live)), Ok(None)));
        assert_eq!(mailbox.take().map(|t| t.id), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_started_wakes_on_flag() {
        let mailbox = Arc::new(Mailbox::<()>::new());
        let waiter = tokio::spawn({
            let mailbox = mailbox.clone();
            async move { mailbox.wait_started().await }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        mailbox.mark_started();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_started_returns_immediately_when_set() {
        let mailbox = Mailbox::<()>::new();
        mailbox.mark_started();
        mailbox.wait_started().await;
    }
}
