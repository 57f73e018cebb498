// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end scenarios mirroring the six walkthroughs the dispatch design was built against:
//! same-mailbox calls, cross-mailbox cooperation, crossing into an async actor, deferred
//! responses, duplicate responses, and continuation-fault isolation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use lpc_actors::{
    Actor, ActorCell, ActorRef, DispatchError, ExceptionHandler, InlineMailboxFactory, Payload,
    ResponseProcessor, ThreadedMailboxFactory,
};

/// An actor built from a plain closure, for tests that don't need per-actor state beyond
/// what the closure itself captures.
struct FnActor<F>(F)
where
    F: Fn(Payload, ResponseProcessor) -> Result<(), DispatchError> + Send + Sync + 'static;

impl<F> Actor for FnActor<F>
where
    F: Fn(Payload, ResponseProcessor) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    fn process_request(
        &self,
        payload: Payload,
        respond: ResponseProcessor,
    ) -> Result<(), DispatchError> {
        (self.0)(payload, respond)
    }
}

fn fn_actor<F>(f: F) -> FnActor<F>
where
    F: Fn(Payload, ResponseProcessor) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    FnActor(f)
}

fn recv_i64(result: &Arc<Mutex<Option<Result<Payload, DispatchError>>>>) -> i64 {
    let outcome = result.lock().unwrap().take().expect("no response delivered");
    *outcome.unwrap().downcast::<i64>().unwrap()
}

fn capturing_continuation() -> (
    Box<dyn FnOnce(Result<Payload, DispatchError>) -> Result<(), DispatchError> + Send>,
    Arc<Mutex<Option<Result<Payload, DispatchError>>>>,
) {
    let slot = Arc::new(Mutex::new(None));
    let slot_for_k = slot.clone();
    let k = Box::new(move |outcome| {
        *slot_for_k.lock().unwrap() = Some(outcome);
        Ok(())
    });
    (k, slot)
}

#[test]
fn same_mailbox_multiply_runs_synchronously() {
    let callee = ActorCell::builder(fn_actor(|payload, respond| {
        let (a, b) = *payload.downcast::<(i64, i64)>().unwrap();
        respond.process(Ok(Box::new(a * b)))
    }))
    .name("callee")
    .mailbox_factory(InlineMailboxFactory)
    .spawn()
    .unwrap();

    let shared_mailbox = callee.mailbox().clone();
    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox(shared_mailbox)
        .spawn()
        .unwrap();

    assert_eq!(caller.mailbox(), callee.mailbox());

    let (k, result) = capturing_continuation();
    lpc_actors::send(&caller, &callee, Box::new((3i64, 4i64)), k).unwrap();

    // No queueing was involved: the response is already there before `send` returns.
    assert_eq!(recv_i64(&result), 12);
}

#[test]
fn cross_mailbox_cooperative_call_flushes_and_relinquishes_control() {
    let callee = ActorCell::builder(fn_actor(|payload, respond| {
        let n = *payload.downcast::<i64>().unwrap();
        respond.process(Ok(Box::new(n + 1)))
    }))
    .name("callee")
    .mailbox_factory(InlineMailboxFactory)
    .spawn()
    .unwrap();

    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox_factory(InlineMailboxFactory)
        .spawn()
        .unwrap();

    assert_ne!(caller.mailbox(), callee.mailbox());

    let (k, result) = capturing_continuation();
    lpc_actors::send(&caller, &callee, Box::new(41i64), k).unwrap();

    assert_eq!(recv_i64(&result), 42);
    // Rule 4's cleanup block always leaves the callee owning itself again.
    assert_eq!(callee.mailbox().controlling_mailbox(), *callee.mailbox());
}

#[tokio::test]
async fn cross_domain_call_into_an_async_actor_completes_eventually() {
    let notify = Arc::new(tokio::sync::Notify::new());
    let notify_for_callee = notify.clone();

    let callee = ActorCell::builder(fn_actor(move |payload, respond| {
        let n = *payload.downcast::<i64>().unwrap();
        let outcome = respond.process(Ok(Box::new(n * 2)));
        notify_for_callee.notify_one();
        outcome
    }))
    .name("callee")
    .mailbox_factory(ThreadedMailboxFactory)
    .spawn()
    .unwrap();
    assert!(callee.mailbox().is_async());

    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox_factory(InlineMailboxFactory)
        .spawn()
        .unwrap();

    let (k, result) = capturing_continuation();
    lpc_actors::send(&caller, &callee, Box::new(21i64), k).unwrap();

    // The worker task runs concurrently; wait for it to have actually responded before
    // pumping the caller's own (cooperative) mailbox to run the continuation.
    notify.notified().await;
    caller.mailbox().dispatch_pending();

    assert_eq!(recv_i64(&result), 42);
}

#[test]
fn deferred_response_is_delivered_once_the_callee_completes() {
    let stored: Arc<Mutex<Option<ResponseProcessor>>> = Arc::new(Mutex::new(None));
    let stored_for_callee = stored.clone();

    let callee = ActorCell::builder(fn_actor(move |_payload, respond| {
        *stored_for_callee.lock().unwrap() = Some(respond);
        Ok(())
    }))
    .name("callee")
    .mailbox_factory(InlineMailboxFactory)
    .spawn()
    .unwrap();

    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox_factory(InlineMailboxFactory)
        .spawn()
        .unwrap();

    let (k, result) = capturing_continuation();
    lpc_actors::send(&caller, &callee, Box::new(()), k).unwrap();

    // Nothing has responded yet: processRequest returned without calling `respond`.
    assert!(result.lock().unwrap().is_none());

    let respond = stored.lock().unwrap().take().expect("processRequest stored its continuation");
    respond.process(Ok(Box::new(7i64))).unwrap();
    caller.mailbox().dispatch_pending();

    assert_eq!(recv_i64(&result), 7);
}

#[test]
fn duplicate_response_is_delivered_exactly_once() {
    let callee = ActorCell::builder(fn_actor(|_payload, respond| {
        respond.process(Ok(Box::new(1i64)))?;
        // A second call must be a silent no-op per the active-bit invariant.
        respond.process(Ok(Box::new(2i64)))
    }))
    .name("callee")
    .mailbox_factory(InlineMailboxFactory)
    .spawn()
    .unwrap();

    let shared_mailbox = callee.mailbox().clone();
    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox(shared_mailbox)
        .spawn()
        .unwrap();

    let calls = Arc::new(AtomicI64::new(0));
    let last = Arc::new(Mutex::new(None));
    let calls_for_k = calls.clone();
    let last_for_k = last.clone();
    let k: Box<dyn FnOnce(Result<Payload, DispatchError>) -> Result<(), DispatchError> + Send> =
        Box::new(move |outcome| {
            calls_for_k.fetch_add(1, Ordering::SeqCst);
            *last_for_k.lock().unwrap() = Some(*outcome.unwrap().downcast::<i64>().unwrap());
            Ok(())
        });

    lpc_actors::send(&caller, &callee, Box::new(()), k).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(last.lock().unwrap().take(), Some(1));
}

#[test]
fn continuation_fault_bypasses_the_callees_exception_handler() {
    #[derive(Debug)]
    struct Boom;
    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}

    let handler_invoked = Arc::new(Mutex::new(false));
    let handler_invoked_for_handler = handler_invoked.clone();
    let handler: ExceptionHandler = Arc::new(move |err| {
        *handler_invoked_for_handler.lock().unwrap() = true;
        Err(err)
    });

    let callee = ActorCell::builder(fn_actor(|_payload, respond| respond.process(Ok(Box::new(())))))
        .name("callee")
        .mailbox_factory(InlineMailboxFactory)
        .exception_handler(handler)
        .spawn()
        .unwrap();

    let shared_mailbox = callee.mailbox().clone();
    let caller = ActorCell::builder(fn_actor(|_, _| Ok(())))
        .name("caller")
        .mailbox(shared_mailbox)
        .spawn()
        .unwrap();

    let k: Box<dyn FnOnce(Result<Payload, DispatchError>) -> Result<(), DispatchError> + Send> =
        Box::new(|_outcome| Err(DispatchError::application(Boom)));

    let result = lpc_actors::send(&caller, &callee, Box::new(()), k);

    // The fault travels back to the caller's own call site, not through the callee's handler.
    assert!(result.is_err());
    assert!(!*handler_invoked.lock().unwrap());
}

fn _assert_actor_ref_is_send_sync(_: &ActorRef) {}
