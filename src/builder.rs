// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Actors are assembled through a `SpawnBuilder`-shaped builder rather than loose free
//! functions: a name, a mailbox or mailbox factory, an initial buffer capacity, and an
//! optional exception handler, all set before `spawn()` produces the actor's shared handle.

use crate::actor::{Actor, ActorCell, ActorRef, ExceptionHandler};
use crate::error::DispatchError;
use crate::factory::{MailboxFactory, DEFAULT_INITIAL_BUFFER_CAPACITY};
use crate::mailbox::Mailbox;

/// Builds and spawns one actor. Either a mailbox factory or an existing mailbox to share with
/// another actor must be supplied before `spawn()` — there is no implicit default, since the
/// choice of cooperative vs. worker-bound mailbox is the one decision this crate refuses to
/// make silently on the caller's behalf.
pub struct SpawnBuilder<A: Actor> {
    name: Option<String>,
    actor: A,
    mailbox_factory: Option<Box<dyn MailboxFactory>>,
    mailbox: Option<Mailbox>,
    initial_buffer_capacity: usize,
    exception_handler: Option<ExceptionHandler>,
}

impl<A: Actor> SpawnBuilder<A> {
    pub(crate) fn new(actor: A) -> Self {
        SpawnBuilder {
            name: None,
            actor,
            mailbox_factory: None,
            mailbox: None,
            initial_buffer_capacity: DEFAULT_INITIAL_BUFFER_CAPACITY,
            exception_handler: None,
        }
    }

    /// Defaults to an anonymous name derived from the actor's position in spawn order.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mailbox_factory(mut self, factory: impl MailboxFactory + 'static) -> Self {
        self.mailbox_factory = Some(Box::new(factory));
        self
    }

    /// Binds this actor onto an existing mailbox instead of creating one, so that two actors
    /// can cooperate on the same mailbox (path 1 of `acceptRequest`, `MS == MT`). Takes
    /// precedence over `mailbox_factory` if both are set.
    pub fn mailbox(mut self, mailbox: Mailbox) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Binds to the configured or freshly created mailbox and (for an async mailbox) spawns
    /// the worker task that drains it. Fails with [`DispatchError::NullMailbox`] if neither a
    /// mailbox nor a factory was ever configured.
    pub fn spawn(self) -> Result<ActorRef, DispatchError> {
        let name = self
            .name
            .unwrap_or_else(|| format!("actor-{}", next_anonymous_id()));
        let mailbox = match self.mailbox {
            Some(mailbox) => mailbox,
            None => self
                .mailbox_factory
                .ok_or(DispatchError::NullMailbox)?
                .create_mailbox(&name, self.initial_buffer_capacity),
        };
        let cell = ActorCell::new(name, Box::new(self.actor), mailbox);
        if self.exception_handler.is_some() {
            cell.set_exception_handler(self.exception_handler);
        }
        Ok(cell)
    }
}

fn next_anonymous_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
