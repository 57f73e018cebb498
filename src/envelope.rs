// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::actor::ActorRef;
use crate::error::DispatchError;

/// An application payload. Actors agree out of band on what concrete type hides behind the
/// `dyn Any` and downcast accordingly; the dispatch core never inspects it.
pub type Payload = Box<dyn Any + Send>;

/// The result eventually delivered to a continuation: either the callee's payload, or an
/// error (the Rust encoding of "the response is an exception").
pub type Outcome = Result<Payload, DispatchError>;

/// A caller's continuation, as handed to `send`. Consumed exactly once.
pub type Continuation = Box<dyn FnOnce(Outcome) -> Result<(), DispatchError> + Send>;

/// Shared bookkeeping behind a single request: the one-response rule. `syncSend`'s own
/// `sync`/`async` re-entrancy flags (`ExtendedResponseProcessor`, §4.5) are scoped to that one
/// call site and live in [`crate::dispatch`] instead, since they have no meaning for a plain
/// continuation.
#[derive(Debug, Default)]
pub(crate) struct RequestState {
    /// True until the first response is delivered; further calls are silently dropped.
    active: AtomicBool,
}

impl RequestState {
    fn new() -> Arc<Self> {
        Arc::new(RequestState {
            active: AtomicBool::new(true),
        })
    }

    /// Clears the active bit, returning `true` the first time (i.e. the caller should deliver
    /// the response) and `false` on every subsequent call (duplicate, drop it).
    fn take_active(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// The continuation handed to a callee's `processRequest`. Whatever the path, calling it more
/// than once is safe: only the first call has any effect.
#[derive(Clone)]
pub struct ResponseProcessor {
    pub(crate) state: Arc<RequestState>,
    respond: Arc<dyn Fn(Outcome) -> Result<(), DispatchError> + Send + Sync>,
}

impl fmt::Debug for ResponseProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseProcessor").finish_non_exhaustive()
    }
}

impl ResponseProcessor {
    pub(crate) fn new(
        respond: impl Fn(Outcome) -> Result<(), DispatchError> + Send + Sync + 'static,
    ) -> Self {
        ResponseProcessor {
            state: RequestState::new(),
            respond: Arc::new(respond),
        }
    }

    /// Delivers `outcome`. A second and later call is a silent no-op.
    pub fn process(&self, outcome: Outcome) -> Result<(), DispatchError> {
        if self.state.take_active() {
            (self.respond)(outcome)
        } else {
            Ok(())
        }
    }
}

/// The envelope that travels across a mailbox boundary: a payload bound for `processor`,
/// carrying the continuation that will eventually receive the answer.
pub struct Request {
    pub(crate) source: Option<ActorRef>,
    pub(crate) processor: ActorRef,
    pub(crate) payload: Payload,
    pub(crate) continuation: ResponseProcessor,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("processor", &self.processor.name())
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

/// The envelope carrying a result back toward the mailbox that is waiting on it.
pub struct Response {
    pub(crate) outcome: Outcome,
    pub(crate) continuation: ResponseProcessor,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("is_err", &self.outcome.is_err())
            .finish_non_exhaustive()
    }
}

/// The two kinds of traffic a mailbox's inbound queue interleaves.
pub(crate) enum Message {
    Request(Request),
    Response(Response),
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => f.debug_tuple("Request").field(r).finish(),
            Message::Response(r) => f.debug_tuple("Response").field(r).finish(),
        }
    }
}

/// A request currently installed on a mailbox via `setCurrentRequest`, awaiting `response`.
pub(crate) struct CurrentRequest {
    pub(crate) source: Option<ActorRef>,
    pub(crate) continuation: ResponseProcessor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn second_response_is_silently_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let calls_for_respond = calls.clone();
        let seen_for_respond = seen.clone();
        let rp = ResponseProcessor::new(move |outcome| {
            calls_for_respond.fetch_add(1, Ordering::SeqCst);
            *seen_for_respond.lock().unwrap() = Some(outcome);
            Ok(())
        });

        assert!(rp.process(Ok(Box::new(1i64))).is_ok());
        assert!(rp.process(Ok(Box::new(2i64))).is_ok());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let value = *seen.lock().unwrap().take().unwrap().unwrap().downcast::<i64>().unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn clone_shares_the_same_active_bit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_respond = calls.clone();
        let rp = ResponseProcessor::new(move |_outcome| {
            calls_for_respond.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let rp_clone = rp.clone();

        assert!(rp.process(Ok(Box::new(()))).is_ok());
        // The clone sees the same request: its own call is the duplicate, not a fresh one.
        assert!(rp_clone.process(Ok(Box::new(()))).is_ok());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
