//! The bounded raw-message queue sitting between the receive pumps and the
//! application: single producer (the protocol decoder on an I/O worker),
//! single logical consumer (the owner of the socket wrapper).

use crate::stack::RawMessage;
use parking_lot::Mutex;
use shared::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Default bound for a socket wrapper's queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded FIFO of [`RawMessage`]s with non-blocking `offer` and `poll`.
///
/// When full, `offer` drops the incoming message and records the drop; the
/// queue never blocks either side. After [`close`](RawMessageQueue::close)
/// no new messages are admitted but the remainder stays drainable.
#[derive(Debug)]
pub struct RawMessageQueue {
    messages: Mutex<VecDeque<RawMessage>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Default for RawMessageQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl RawMessageQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends a message without blocking. The newest message is the one
    /// dropped on overflow.
    pub fn offer(&self, message: RawMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrQueueClosed);
        }
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ErrQueueFull);
        }
        messages.push_back(message);
        Ok(())
    }

    /// Removes the oldest message without blocking.
    pub fn poll(&self) -> Option<RawMessage> {
        self.messages.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Number of messages dropped on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting messages; queued ones remain pollable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod queue_test {
    use super::*;
    use bytes::BytesMut;
    use shared::{TransportAddress, TransportProtocol};
    use std::net::{IpAddr, Ipv4Addr};

    fn message(tag: u8) -> RawMessage {
        let addr = TransportAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            3478,
            TransportProtocol::UDP,
        );
        RawMessage::build(BytesMut::from(&[tag][..]), addr, addr)
    }

    #[test]
    fn test_queue_preserves_arrival_order() {
        let queue = RawMessageQueue::with_capacity(16);
        for tag in 0..5u8 {
            queue.offer(message(tag)).unwrap();
        }
        for tag in 0..5u8 {
            assert_eq!(queue.poll().unwrap().bytes()[0], tag);
        }
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_queue_drops_newest_on_overflow() {
        let queue = RawMessageQueue::with_capacity(2);
        queue.offer(message(0)).unwrap();
        queue.offer(message(1)).unwrap();
        assert_eq!(queue.offer(message(2)), Err(Error::ErrQueueFull));
        assert_eq!(queue.dropped(), 1);

        // the survivors are the two oldest
        assert_eq!(queue.poll().unwrap().bytes()[0], 0);
        assert_eq!(queue.poll().unwrap().bytes()[0], 1);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_queue_remains_drainable_after_close() {
        let queue = RawMessageQueue::with_capacity(4);
        queue.offer(message(7)).unwrap();
        queue.close();
        assert_eq!(queue.offer(message(8)), Err(Error::ErrQueueClosed));
        assert_eq!(queue.poll().unwrap().bytes()[0], 7);
        assert!(queue.is_empty());
    }
}
