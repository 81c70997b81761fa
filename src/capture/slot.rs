use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of waiting on a [`LatestSlot`]
#[derive(Debug, PartialEq)]
pub enum Take<T> {
    Item(T),
    TimedOut,
    Closed,
}

struct SlotState<T> {
    item: Option<T>,
    closed: bool,
}

/// Single-slot latest-wins buffer between the capture and process paths
///
/// A publish replaces whatever the consumer has not picked up yet, so memory and
/// latency stay bounded when processing falls behind. The lock is only held to move
/// one item in or out.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                item: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `item`, returning the unconsumed item it displaced
    ///
    /// After close the item is handed straight back.
    pub fn publish(&self, item: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(item);
        }
        let displaced = state.item.replace(item);
        drop(state);
        self.ready.notify_one();
        displaced
    }

    /// Wait up to `timeout` for an item
    pub fn take(&self, timeout: Duration) -> Take<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.item.take() {
                return Take::Item(item);
            }
            if state.closed {
                return Take::Closed;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.item.take() {
                    Some(item) => Take::Item(item),
                    None if state.closed => Take::Closed,
                    None => Take::TimedOut,
                };
            }
        }
    }

    /// Wake every waiter and refuse further items
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.item = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_latest_wins_after_rapid_publishes() {
        let slot = LatestSlot::new();
        let mut displaced = 0;
        for n in 1..=10u32 {
            if slot.publish(n).is_some() {
                displaced += 1;
            }
        }
        assert_eq!(displaced, 9);
        assert_eq!(slot.take(Duration::from_millis(1)), Take::Item(10));
        assert_eq!(slot.take(Duration::from_millis(1)), Take::TimedOut);
    }

    #[test]
    fn test_take_times_out() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        let start = Instant::now();
        assert_eq!(slot.take(Duration::from_millis(20)), Take::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let slot: Arc<LatestSlot<u32>> = Arc::new(LatestSlot::new());
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.take(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(waiter.join().unwrap(), Take::Closed);
        assert_eq!(slot.publish(7), Some(7));
    }

    #[test]
    fn test_consumer_sees_cross_thread_publish() {
        let slot: Arc<LatestSlot<Vec<u8>>> = Arc::new(LatestSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for n in 0..100u8 {
                    slot.publish(vec![n; 64]);
                }
            })
        };
        producer.join().unwrap();
        match slot.take(Duration::from_millis(10)) {
            // never a torn buffer: every byte comes from the same publish
            Take::Item(buf) => assert!(buf.iter().all(|&b| b == 99)),
            other => panic!("expected the last item, got {:?}", other),
        }
    }
}
