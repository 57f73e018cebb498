// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An adaptive local-procedure-call dispatch engine for actors.
//!
//! A [`send`] between two actors runs synchronously, on the caller's stack, whenever that is
//! safe — same mailbox, or a mailbox already under the caller's control — and falls back to
//! queued asynchronous delivery only when the target belongs to an independent scheduling
//! domain or its control token cannot be acquired without blocking.
//!
//! ```
//! use std::sync::Arc;
//!
//! use lpc_actors::{Actor, ActorCell, DispatchError, InlineMailboxFactory, ResponseProcessor};
//!
//! struct Multiplier;
//!
//! impl Actor for Multiplier {
//!     fn process_request(
//!         &self,
//!         payload: lpc_actors::Payload,
//!         respond: ResponseProcessor,
//!     ) -> Result<(), DispatchError> {
//!         let (a, b) = *payload.downcast::<(i64, i64)>().unwrap();
//!         respond.process(Ok(Box::new(a * b)))
//!     }
//! }
//!
//! # fn main() -> Result<(), DispatchError> {
//! let caller = ActorCell::builder(Multiplier)
//!     .name("caller")
//!     .mailbox_factory(InlineMailboxFactory)
//!     .spawn()?;
//! let callee = ActorCell::builder(Multiplier)
//!     .name("callee")
//!     .mailbox_factory(InlineMailboxFactory)
//!     .spawn()?;
//!
//! let result = Arc::new(std::sync::Mutex::new(None));
//! let result_for_k = result.clone();
//! lpc_actors::send(
//!     &caller,
//!     &callee,
//!     Box::new((3i64, 4i64)),
//!     Box::new(move |outcome| {
//!         *result_for_k.lock().unwrap() = Some(outcome);
//!         Ok(())
//!     }),
//! )?;
//!
//! let outcome = result.lock().unwrap().take().unwrap();
//! assert_eq!(*outcome.unwrap().downcast::<i64>().unwrap(), 12);
//! # Ok(())
//! # }
//! ```

mod actor;
mod buffered_events;
mod builder;
mod dispatch;
mod envelope;
mod error;
mod factory;
mod mailbox;

pub use actor::{Actor, ActorCell, ActorRef, ExceptionHandler};
pub use builder::SpawnBuilder;
pub use envelope::{Continuation, Outcome, Payload, ResponseProcessor};
pub use error::DispatchError;
pub use factory::{InlineMailboxFactory, MailboxFactory, ThreadedMailboxFactory, DEFAULT_INITIAL_BUFFER_CAPACITY};
pub use mailbox::Mailbox;

/// Routes `payload` from `source` to `target`'s `process_request`, eventually invoking
/// `continuation` with the result. Picks the fastest safe delivery path given the two
/// mailboxes' relationship: same mailbox, same controlling mailbox, a control token that can
/// be acquired without blocking, or — failing all of those — queued asynchronous delivery.
pub fn send(
    source: &ActorRef,
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
) -> Result<(), DispatchError> {
    dispatch::send(source, target, payload, continuation)
}

/// Routes `payload` to `target` with no originating actor — e.g. a call made from outside any
/// mailbox. The request can never ride an outbound buffer that doesn't exist, so it is handed
/// directly to the target: queued if the target is async, run in place otherwise.
pub fn send_sourceless(
    target: &ActorRef,
    payload: Payload,
    continuation: Continuation,
) -> Result<(), DispatchError> {
    dispatch::send_sourceless(target, payload, continuation)
}
