// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::envelope::Message;
use crate::mailbox::Mailbox;

/// A single destination's pending batch, kept alongside a handle to the destination so
/// flushing doesn't need a second lookup.
struct Bucket {
    destination: Mailbox,
    messages: Vec<Message>,
}

/// Groups outgoing messages by destination so that many small sends to the same peer cost
/// one handoff instead of many. Messages destined for the same mailbox are flushed in the
/// order they were enqueued; there is no ordering guarantee across different destinations.
#[derive(Default)]
pub(crate) struct BufferedEventsQueue {
    buckets: Vec<Bucket>,
    initial_bucket_capacity: usize,
}

impl BufferedEventsQueue {
    pub(crate) fn new(initial_bucket_capacity: usize) -> Self {
        BufferedEventsQueue {
            buckets: Vec::new(),
            initial_bucket_capacity,
        }
    }

    /// Appends `message` to the batch pending for `destination`. Does not deliver.
    pub(crate) fn send(&mut self, destination: &Mailbox, message: Message) {
        if let Some(bucket) = self
            .buckets
            .iter_mut()
            .find(|bucket| bucket.destination == *destination)
        {
            bucket.messages.push(message);
            return;
        }
        let mut messages = Vec::with_capacity(self.initial_bucket_capacity.max(1));
        messages.push(message);
        self.buckets.push(Bucket {
            destination: destination.clone(),
            messages,
        });
    }

    /// Delivers every bucket to its destination's inbound queue and clears the queue.
    /// A no-op when there is nothing pending.
    pub(crate) fn dispatch_events(&mut self) {
        for bucket in self.buckets.drain(..) {
            for message in bucket.messages {
                bucket.destination.deliver(message);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, Weak};

    use super::*;
    use crate::envelope::{Response, ResponseProcessor};
    use crate::mailbox::MessageSink;

    struct ImmediateSink;
    impl MessageSink for ImmediateSink {
        fn handle_message(&self, msg: Message) {
            if let Message::Response(resp) = msg {
                let _ = resp.continuation.process(resp.outcome);
            }
        }
        fn name(&self) -> &str {
            "immediate"
        }
    }

    fn tagged_response(order: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Message {
        Message::Response(Response {
            outcome: Ok(Box::new(())),
            continuation: ResponseProcessor::new(move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            }),
        })
    }

    #[test]
    fn same_destination_messages_flush_in_send_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let destination = Mailbox::new_sync("dest", 2);
        let sink = Arc::new(ImmediateSink);
        destination.bind_owner(Arc::downgrade(&sink) as Weak<dyn MessageSink>);
        let mut queue = BufferedEventsQueue::new(2);

        queue.send(&destination, tagged_response(order.clone(), "first"));
        queue.send(&destination, tagged_response(order.clone(), "second"));
        assert!(!queue.is_empty());

        queue.dispatch_events();
        destination.dispatch_pending();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn dispatch_events_on_an_empty_queue_is_a_no_op() {
        let mut queue = BufferedEventsQueue::new(1);
        queue.dispatch_events();
        assert!(queue.is_empty());
    }
}
