use donation_watch_common::frame::Frame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

pub type SubscriberResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Box<dyn FnMut(&Frame) -> SubscriberResult + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Fan-out of decoded frames to registered observers.
///
/// Subscribers run synchronously on the calling thread, in subscription order.
/// A subscriber that errors or panics is logged and skipped for that frame;
/// later subscribers still receive it.
#[derive(Default)]
pub struct Dispatcher {
    next_id: u64,
    subscribers: Vec<(SubscriberId, Callback)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriberId
    where
        F: FnMut(&Frame) -> SubscriberResult + Send + 'static,
    {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `frame` to every subscriber. Returns how many succeeded.
    pub fn dispatch(&mut self, frame: Frame) -> usize {
        let mut delivered = 0;
        for (id, callback) in self.subscribers.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| callback(&frame))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscriber = id.0, seq = frame.seq, error = %e, "subscriber failed");
                }
                Err(_) => {
                    error!(subscriber = id.0, seq = frame.seq, "subscriber panicked");
                }
            }
        }
        delivered
    }
}
