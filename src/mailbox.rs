// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::buffered_events::BufferedEventsQueue;
use crate::envelope::{CurrentRequest, Message, Outcome, Response};

static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(0);

/// A sink an async mailbox's worker (or a cooperative drain sweep) feeds messages through.
/// Implemented by `ActorCell`; kept as a trait so `mailbox.rs` stays ignorant of actors.
pub(crate) trait MessageSink: Send + Sync {
    fn handle_message(&self, msg: Message);
    fn name(&self) -> &str;
}

struct MailboxInner {
    id: u64,
    name: String,
    is_async: bool,
    inbound: Mutex<VecDeque<Message>>,
    outbound: Mutex<BufferedEventsQueue>,
    /// `None` means "controlled by self", i.e. free.
    controlling: Mutex<Option<Mailbox>>,
    current_request: Mutex<Option<CurrentRequest>>,
    owner: Mutex<Option<Weak<dyn MessageSink>>>,
    /// Present only for async mailboxes: the channel their worker task drains.
    worker_tx: Option<UnboundedSender<Message>>,
    /// Taken exactly once, by whoever spawns this mailbox's worker task.
    worker_rx: Mutex<Option<UnboundedReceiver<Message>>>,
}

/// Serial execution context for one actor: an inbound queue, outbound buckets grouped by
/// destination, a control-token slot, and a current-request slot. Cheap to clone (an `Arc`
/// handle); equality is by identity, not content.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<MailboxInner>,
}

impl PartialEq for Mailbox {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Mailbox {}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("async", &self.inner.is_async)
            .finish()
    }
}

impl Mailbox {
    pub(crate) fn new_sync(name: impl Into<String>, initial_buffer_capacity: usize) -> Self {
        Mailbox {
            inner: Arc::new(MailboxInner {
                id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                is_async: false,
                inbound: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(BufferedEventsQueue::new(initial_buffer_capacity)),
                controlling: Mutex::new(None),
                current_request: Mutex::new(None),
                owner: Mutex::new(None),
                worker_tx: None,
                worker_rx: Mutex::new(None),
            }),
        }
    }

    /// An async mailbox owns its channel outright: the sender lives on the mailbox so
    /// `deliver` can push into it, and the receiver is handed out exactly once, to whoever
    /// spawns the worker task that drains it (see [`Mailbox::take_worker_receiver`]).
    pub(crate) fn new_async(name: impl Into<String>, initial_buffer_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Mailbox {
            inner: Arc::new(MailboxInner {
                id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                is_async: true,
                inbound: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(BufferedEventsQueue::new(initial_buffer_capacity)),
                controlling: Mutex::new(None),
                current_request: Mutex::new(None),
                owner: Mutex::new(None),
                worker_tx: Some(tx),
                worker_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    pub(crate) fn take_worker_receiver(&self) -> Option<UnboundedReceiver<Message>> {
        self.inner.worker_rx.lock().unwrap().take()
    }

    pub(crate) fn bind_owner(&self, owner: Weak<dyn MessageSink>) {
        *self.inner.owner.lock().unwrap() = Some(owner);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_async(&self) -> bool {
        self.inner.is_async
    }

    /// Appends `message` onto this mailbox's outbound bucket for `destination`. Delivery
    /// happens only at the next `send_pending_messages` flush.
    pub(crate) fn send(&self, destination: &Mailbox, message: Message) {
        self.inner.outbound.lock().unwrap().send(destination, message);
    }

    /// Direct hand-off into this mailbox's inbound queue, bypassing any outbound bucket.
    /// Used for genuine cross-mailbox delivery (a flush) and for the sourceless-call
    /// fallback, which has no outbound buffer of its own to go through.
    pub(crate) fn deliver(&self, message: Message) {
        if let Some(tx) = &self.inner.worker_tx {
            // An async mailbox's channel doubles as the queue and the wake-up: sending on
            // it both enqueues the message and lets the worker's `recv().await` resume.
            let _ = tx.send(message);
        } else {
            self.inner.inbound.lock().unwrap().push_back(message);
        }
    }

    /// Looks up `currentRequest`, clears its active bit, and routes the response back toward
    /// the requester's own mailbox so it is processed on the requester's own turn.
    pub(crate) fn response(&self, payload: Outcome) {
        let current = self.inner.current_request.lock().unwrap().take();
        let Some(current) = current else {
            debug!(mailbox = %self.name(), "response() with no current request, dropped");
            return;
        };
        match current.source {
            Some(source) => {
                let response = Message::Response(Response {
                    outcome: payload,
                    continuation: current.continuation,
                });
                let source_mailbox = source.mailbox().clone();
                source_mailbox.send(&source_mailbox, response);
                source_mailbox.send_pending_messages();
            }
            None => {
                // Sourceless request: nobody's mailbox to bounce through, so deliver directly.
                let _ = current.continuation.process(payload);
            }
        }
    }

    pub(crate) fn set_current_request(&self, req: CurrentRequest) {
        *self.inner.current_request.lock().unwrap() = Some(req);
    }

    /// Drains whatever is currently queued on a cooperative mailbox's inbound, processing
    /// each message in turn. No scheduler runs this automatically: a non-async mailbox only
    /// ever advances when something — its owner's event loop, or a test harness simulating
    /// one — calls this (or `dispatch_remaining` fires as part of a rule-4 loan). A no-op on
    /// an async mailbox, whose worker task drains it instead.
    pub fn dispatch_pending(&self) {
        if self.inner.is_async {
            return;
        }
        self.dispatch_remaining(self);
    }

    pub fn controlling_mailbox(&self) -> Mailbox {
        self.inner
            .controlling
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.clone())
    }

    /// Non-blocking test-and-set: succeeds if this mailbox is currently free or already
    /// loaned to `candidate`, in which case control becomes `candidate`. Never blocks.
    pub(crate) fn acquire_control(&self, candidate: &Mailbox) -> bool {
        let mut guard = self.inner.controlling.lock().unwrap();
        let free_or_matching = match guard.as_ref() {
            None => true,
            Some(current) => current == candidate,
        };
        if !free_or_matching {
            return false;
        }
        *guard = if *candidate == *self {
            None
        } else {
            Some(candidate.clone())
        };
        true
    }

    pub(crate) fn relinquish_control(&self) {
        *self.inner.controlling.lock().unwrap() = None;
    }

    /// Flushes this mailbox's outbound buckets, delivering every pending message.
    pub(crate) fn send_pending_messages(&self) {
        self.inner.outbound.lock().unwrap().dispatch_events();
    }

    pub(crate) fn outbound_is_empty(&self) -> bool {
        self.inner.outbound.lock().unwrap().is_empty()
    }

    /// Drains whatever accumulated on this mailbox's inbound queue while it was loaned out,
    /// then restores the controlling mailbox. `original_controller` names the mailbox that
    /// held the loan; the post-condition (tested in §8) is always `controllingMailbox == self`
    /// once the sweep completes, matching a non-reentrant loan.
    pub(crate) fn dispatch_remaining(&self, original_controller: &Mailbox) {
        let _ = original_controller;
        let owner = self.inner.owner.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(owner) = owner {
            loop {
                let next = self.inner.inbound.lock().unwrap().pop_front();
                match next {
                    Some(msg) => owner.handle_message(msg),
                    None => break,
                }
            }
        }
        *self.inner.controlling.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_control_is_compare_and_swap() {
        let mt = Mailbox::new_sync("mt", 4);
        let peer_a = Mailbox::new_sync("peer-a", 4);
        let peer_b = Mailbox::new_sync("peer-b", 4);

        assert_eq!(mt.controlling_mailbox(), mt);
        assert!(mt.acquire_control(&peer_a));
        assert_eq!(mt.controlling_mailbox(), peer_a);

        // A second, distinct candidate must not be able to jump the loan.
        assert!(!mt.acquire_control(&peer_b));
        assert_eq!(mt.controlling_mailbox(), peer_a);

        // The current holder re-acquiring is a no-op success, not a rejection.
        assert!(mt.acquire_control(&peer_a));

        mt.relinquish_control();
        assert_eq!(mt.controlling_mailbox(), mt);
        assert!(mt.acquire_control(&peer_b));
    }

    #[test]
    fn send_then_dispatch_pending_delivers_in_order() {
        struct Counter(Mutex<Vec<&'static str>>);
        impl MessageSink for Counter {
            fn handle_message(&self, msg: Message) {
                if let Message::Response(resp) = msg {
                    let _ = resp.continuation.process(resp.outcome);
                }
            }
            fn name(&self) -> &str {
                "counter"
            }
        }

        let mailbox = Mailbox::new_sync("m", 4);
        let sink = Arc::new(Counter(Mutex::new(Vec::new())));
        mailbox.bind_owner(Arc::downgrade(&sink) as Weak<dyn MessageSink>);

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            let k = crate::envelope::ResponseProcessor::new(move |_outcome| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
            mailbox.send(
                &mailbox,
                Message::Response(Response {
                    outcome: Ok(Box::new(())),
                    continuation: k,
                }),
            );
        }
        mailbox.send_pending_messages();
        mailbox.dispatch_pending();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
