// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `acceptRequest` decision tree (§4.5): picks one of four delivery paths for a request
//! from a source actor to a target actor, based on whether they share a mailbox, whether the
//! target is async, and who currently holds the target mailbox's control token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::actor::{ActorRef, ExceptionHandler};
use crate::envelope::{Continuation, CurrentRequest, Message, Outcome, Payload, Request, ResponseProcessor};
use crate::error::DispatchError;
use crate::mailbox::{Mailbox, MessageSink};

type ContinuationCell = Arc<Mutex<Option<Continuation>>>;

fn call_once(cell: &ContinuationCell, outcome: Outcome) -> Result<(), DispatchError> {
    match cell.lock().unwrap().take() {
        Some(k) => k(outcome),
        None => Ok(()),
    }
}

/// Delivers the secondary-exception routing shared by `asyncSend`'s K' and `syncSend`'s
/// deferred-response branch: absent a handler, the caller's continuation sees the fault
/// directly; present one, the handler gets first refusal and its own failure (if any) is
/// what the continuation ultimately observes.
fn route_async_exception(
    cc: &ContinuationCell,
    ehs: Option<ExceptionHandler>,
    err: DispatchError,
) -> Result<(), DispatchError> {
    let err = err.into_untransparent();
    match ehs {
        Some(handler) => match handler(err) {
            Ok(()) => Ok(()),
            Err(secondary) => call_once(cc, Err(secondary)),
        },
        None => call_once(cc, Err(err)),
    }
}

/// Entry point the engine exposes as `send`: routes `payload` from `source` to `target`,
/// eventually invoking `continuation` with the result. `source` stands in for both the
/// Request Source adapter lookup (mailbox, exception handler) that §4.3 describes.
pub fn send(
    source: &ActorRef,
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
) -> Result<(), DispatchError> {
    let ms = source.mailbox().clone();
    let mt = target.mailbox().clone();
    let ehs = source.exception_handler();

    if ms == mt {
        debug!(source = source.name(), target = target.name(), path = "syncProcess");
        return sync_process(source, target, payload, continuation, ehs);
    }

    if mt.is_async() {
        debug!(source = source.name(), target = target.name(), path = "asyncSend");
        return async_send(Some(source.clone()), target, payload, continuation, ehs);
    }

    let cs = ms.controlling_mailbox();
    let ct = mt.controlling_mailbox();

    if ct == cs {
        debug!(source = source.name(), target = target.name(), path = "syncSend");
        return sync_send(source, target, payload, continuation, ehs, &ms, &mt, &cs, false);
    }

    if mt.acquire_control(&cs) {
        debug!(source = source.name(), target = target.name(), path = "syncSend+flush");
        return sync_send(source, target, payload, continuation, ehs, &ms, &mt, &cs, true);
    }

    debug!(source = source.name(), target = target.name(), path = "asyncSend");
    async_send(Some(source.clone()), target, payload, continuation, ehs)
}

/// A request from outside any actor (`MS == none`): §9's "sourceless calls" resolution.
pub fn send_sourceless(
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
) -> Result<(), DispatchError> {
    async_send(None, target, payload, continuation, None)
}

fn sync_process(
    source: &ActorRef,
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
    ehs: Option<ExceptionHandler>,
) -> Result<(), DispatchError> {
    let cc: ContinuationCell = Arc::new(Mutex::new(Some(continuation)));
    let k = ResponseProcessor::new(move |outcome| call_once(&cc, outcome).map_err(DispatchError::transparent));

    let result = target.invoke_process_request(payload, k);

    source.set_exception_handler(ehs.clone());
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_transparent() => Err(err.into_untransparent()),
        Err(err) => match ehs {
            Some(handler) => handler(err),
            None => Err(err),
        },
    }
}

fn async_send(
    source: Option<ActorRef>,
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
    ehs: Option<ExceptionHandler>,
) -> Result<(), DispatchError> {
    let cc: ContinuationCell = Arc::new(Mutex::new(Some(continuation)));
    let source_for_k = source.clone();
    let ehs_for_k = ehs;
    let cc_for_k = cc.clone();
    let k = ResponseProcessor::new(move |outcome| {
        if let Some(src) = &source_for_k {
            src.set_exception_handler(ehs_for_k.clone());
        }
        match outcome {
            Err(err) => route_async_exception(&cc_for_k, ehs_for_k.clone(), err),
            // A normal response can still raise if the caller's own continuation faults;
            // that fault is routed exactly like an exceptional outcome would be.
            ok => match call_once(&cc_for_k, ok) {
                Ok(()) => Ok(()),
                Err(err) => route_async_exception(&cc_for_k, ehs_for_k.clone(), err),
            },
        }
    });

    let request = Request {
        source: source.clone(),
        processor: target.clone(),
        payload,
        continuation: k,
    };

    match &source {
        Some(src) => {
            // No background scheduler drains a cooperative mailbox's outbound bucket on its
            // behalf, so the turn that produced this message is also the one that flushes it.
            src.mailbox().send(target.mailbox(), Message::Request(request));
            src.mailbox().send_pending_messages();
            Ok(())
        }
        None => {
            if target.mailbox().is_async() {
                target.mailbox().deliver(Message::Request(request));
            } else {
                target.handle_message(Message::Request(request));
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn sync_send(
    source: &ActorRef,
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
    ehs: Option<ExceptionHandler>,
    ms: &Mailbox,
    mt: &Mailbox,
    cs: &Mailbox,
    flush_on_exit: bool,
) -> Result<(), DispatchError> {
    let cc: ContinuationCell = Arc::new(Mutex::new(Some(continuation)));
    let erp_sync = Arc::new(AtomicBool::new(false));
    let erp_async = Arc::new(AtomicBool::new(false));

    let source_owned = source.clone();
    let ms_owned = ms.clone();
    let mt_owned = mt.clone();
    let cs_owned = cs.clone();
    let ehs_for_erp = ehs.clone();
    let erp_sync_flag = erp_sync.clone();
    let erp_async_flag = erp_async.clone();
    let cc_for_erp = cc.clone();

    let erp = ResponseProcessor::new(move |outcome| {
        if !erp_async_flag.load(Ordering::Acquire) {
            erp_sync_flag.store(true, Ordering::Release);
            source_owned.set_exception_handler(ehs_for_erp.clone());
            return call_once(&cc_for_erp, outcome).map_err(DispatchError::transparent);
        }

        source_owned.set_exception_handler(ehs_for_erp.clone());
        match outcome {
            Err(err) if !err.is_transparent() => route_async_exception(&cc_for_erp, ehs_for_erp.clone(), err),
            other => {
                let cs_now = ms_owned.controlling_mailbox();
                let ct_now = mt_owned.controlling_mailbox();
                if cs_now == ct_now {
                    call_once(&cc_for_erp, other)
                } else if ms_owned.is_async() {
                    deliver_async_response(&mt_owned, &source_owned, cc_for_erp.clone(), other);
                    Ok(())
                } else if !mt_owned.acquire_control(&cs_owned) {
                    deliver_async_response(&mt_owned, &source_owned, cc_for_erp.clone(), other);
                    Ok(())
                } else {
                    let result = call_once(&cc_for_erp, other);
                    mt_owned.send_pending_messages();
                    mt_owned.relinquish_control();
                    mt_owned.dispatch_remaining(&cs_owned);
                    result
                }
            }
        }
    });

    let result = target.invoke_process_request(payload, erp);

    if !erp_sync.load(Ordering::Acquire) {
        erp_async.store(true, Ordering::Release);
    }

    source.set_exception_handler(ehs.clone());
    let final_result = match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_transparent() => Err(err.into_untransparent()),
        Err(err) => match &ehs {
            Some(handler) => handler(err),
            None => Err(err),
        },
    };

    if flush_on_exit {
        mt.send_pending_messages();
        mt.relinquish_control();
        mt.dispatch_remaining(cs);
    }

    final_result
}

/// `asyncResponse` (§4.5): rebuilds a request around the caller's continuation, installs it
/// as `MT.currentRequest`, and routes the payload through the normal async plumbing so it is
/// processed on the requester's own turn.
fn deliver_async_response(
    mt: &Mailbox,
    source: &ActorRef,
    cc: ContinuationCell,
    outcome: Outcome,
) {
    let k = ResponseProcessor::new(move |outcome| call_once(&cc, outcome));
    mt.set_current_request(CurrentRequest {
        source: Some(source.clone()),
        continuation: k,
    });
    mt.response(outcome);
}
