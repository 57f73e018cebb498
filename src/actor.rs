// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Arc, Mutex, Weak};

use crate::envelope::{CurrentRequest, Message, Payload, Request, ResponseProcessor};
use crate::error::DispatchError;
use crate::mailbox::{MessageSink, Mailbox};

/// A handler installed on an actor to consume application errors raised by its own
/// `process_request`, or exceptions routed back along the async path. Returning `Err`
/// from a handler means "I could not consume this either" — the secondary error is what
/// the caller ultimately observes.
pub type ExceptionHandler = Arc<dyn Fn(DispatchError) -> Result<(), DispatchError> + Send + Sync>;

/// The one method a user type supplies. `respond` is consumed at most once; calling it
/// synchronously (before returning) or later from another thread are both valid — the
/// dispatch core adapts either way (see [`crate::dispatch`]).
///
/// Returning `Err` here signals that `process_request` itself failed before producing a
/// response (as opposed to a response whose `Outcome` happens to be `Err`, which is a
/// perfectly normal exceptional *answer*). A `DispatchError::Transparent` returned here is
/// understood to be the `respond` continuation's own failure bubbling back up, and bypasses
/// this actor's exception handler.
pub trait Actor: Send + Sync + 'static {
    fn process_request(
        &self,
        payload: Payload,
        respond: ResponseProcessor,
    ) -> Result<(), DispatchError>;
}

/// Binds a user [`Actor`] to its mailbox and exception-handler slot. Doubles as both the
/// Request Source adapter (callers read `mailbox()`/`exception_handler()` off of it) and the
/// Request Processor adapter (`process_request` invokes the wrapped actor).
pub struct ActorCell {
    name: String,
    actor: Box<dyn Actor>,
    mailbox: Mailbox,
    exception_handler: Mutex<Option<ExceptionHandler>>,
}

/// A shared handle to an actor. Cheap to clone; every reference sees the same mailbox and
/// exception-handler slot.
pub type ActorRef = Arc<ActorCell>;

impl ActorCell {
    pub(crate) fn new(name: String, actor: Box<dyn Actor>, mailbox: Mailbox) -> ActorRef {
        let cell = Arc::new(ActorCell {
            name,
            actor,
            mailbox,
            exception_handler: Mutex::new(None),
        });
        let sink: Weak<dyn MessageSink> = Arc::downgrade(&cell) as Weak<dyn MessageSink>;
        cell.mailbox.bind_owner(sink);

        if let Some(mut rx) = cell.mailbox.take_worker_receiver() {
            let worker: Weak<ActorCell> = Arc::downgrade(&cell);
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    match worker.upgrade() {
                        Some(owner) => owner.handle_message(msg),
                        None => break,
                    }
                }
            });
        }

        cell
    }

    /// Starts a [`crate::builder::SpawnBuilder`] for `actor`.
    pub fn builder<A: Actor>(actor: A) -> crate::builder::SpawnBuilder<A> {
        crate::builder::SpawnBuilder::new(actor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.exception_handler.lock().unwrap().clone()
    }

    pub fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *self.exception_handler.lock().unwrap() = handler;
    }

    pub(crate) fn invoke_process_request(
        &self,
        payload: Payload,
        respond: ResponseProcessor,
    ) -> Result<(), DispatchError> {
        self.actor.process_request(payload, respond)
    }
}

impl std::fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCell").field("name", &self.name).finish_non_exhaustive()
    }
}

impl MessageSink for ActorCell {
    fn handle_message(&self, msg: Message) {
        match msg {
            Message::Request(req) => self.process_request_message(req),
            Message::Response(resp) => {
                let _ = resp.continuation.process(resp.outcome);
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl ActorCell {
    /// The Request Processor adapter's `processRequest` entry point (§4.4): installs
    /// `currentRequest` so a later `mailbox.response(..)` knows where to route, then invokes
    /// the actor with a fresh continuation that funnels the unwrapped response into
    /// `mailbox.response(..)`. Reused verbatim by an async mailbox's worker loop and by
    /// `dispatchRemaining`'s drain sweep, both of which arrive here through `handle_message`.
    fn process_request_message(&self, req: Request) {
        let Request {
            source,
            processor: _processor,
            payload,
            continuation,
        } = req;

        self.mailbox.set_current_request(CurrentRequest {
            source,
            continuation,
        });

        let mailbox = self.mailbox.clone();
        let respond = ResponseProcessor::new(move |outcome| {
            mailbox.response(outcome);
            Ok(())
        });

        if let Err(err) = self.invoke_process_request(payload, respond.clone()) {
            // If `respond` already fired, this is a harmless no-op: the active bit dedups it.
            let _ = respond.process(Err(err));
        }
    }
}
