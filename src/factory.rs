// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mailbox factories (§6): the engine is oblivious to how a mailbox is bound to a scheduling
//! domain, as long as it satisfies the contract in [`crate::mailbox::Mailbox`]. These two are
//! the minimal reference implementations the engine's own test suite runs against; richer
//! scheduling policies belong to the layer above.

use crate::mailbox::Mailbox;

/// Default size hint for a freshly created mailbox's outbound buckets.
pub const DEFAULT_INITIAL_BUFFER_CAPACITY: usize = 4;

/// Produces a mailbox for a named actor. Whether that mailbox is cooperative or bound to an
/// independent worker is entirely up to the implementation.
pub trait MailboxFactory: Send + Sync {
    fn create_mailbox(&self, name: &str, initial_buffer_capacity: usize) -> Mailbox;
}

/// Produces cooperative mailboxes: no independent worker, `is_async() == false`. An actor
/// built with this factory only ever runs on whichever thread currently holds its
/// controlling-mailbox token — its own stack, a peer's via `syncSend`, or a
/// `dispatch_remaining` sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineMailboxFactory;

impl MailboxFactory for InlineMailboxFactory {
    fn create_mailbox(&self, name: &str, initial_buffer_capacity: usize) -> Mailbox {
        Mailbox::new_sync(name, initial_buffer_capacity)
    }
}

/// Produces mailboxes bound to an independent `tokio` task: `is_async() == true`, crossing
/// into them always requires queued delivery. The worker task itself is spawned once the
/// owning `ActorCell` exists (see `ActorCell::new`), since draining needs somewhere to
/// deliver messages to.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadedMailboxFactory;

impl MailboxFactory for ThreadedMailboxFactory {
    fn create_mailbox(&self, name: &str, initial_buffer_capacity: usize) -> Mailbox {
        Mailbox::new_async(name, initial_buffer_capacity)
    }
}
