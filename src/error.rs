// Copyright (c) 2024 Lpc Actors Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Everything that can go wrong while a request travels through the dispatch engine.
///
/// A `Response`'s payload is `Result<Payload, DispatchError>` (see [`crate::envelope::Outcome`]),
/// so an "exceptional" response is simply one whose outcome is `Err` of this type rather than a
/// distinct wrapper class checked with a runtime type test.
#[derive(Error)]
pub enum DispatchError {
    /// Raised by a `processRequest` body, or explicitly returned by an exception handler that
    /// consumed one error but failed with another. Eligible for a callee's exception handler.
    #[error("application error: {0}")]
    Application(#[source] Box<dyn StdError + Send + Sync>),

    /// The Rust encoding of `TransparentException`: an error that originated inside a
    /// continuation, not inside the callee's `processRequest` body. It MUST be unwrapped by the
    /// first path that observes it and never offered to the callee's exception handler.
    #[error("continuation error: {0}")]
    Transparent(Box<DispatchError>),

    /// A mailbox factory was asked to bind an actor with no mailbox.
    #[error("actor cannot be constructed with a null mailbox")]
    NullMailbox,

    /// The target mailbox's inbound or outbound plumbing has been torn down.
    #[error("mailbox is closed")]
    MailboxClosed,
}

impl fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Application(e) => f.debug_tuple("Application").field(e).finish(),
            DispatchError::Transparent(e) => f.debug_tuple("Transparent").field(e).finish(),
            DispatchError::NullMailbox => write!(f, "NullMailbox"),
            DispatchError::MailboxClosed => write!(f, "MailboxClosed"),
        }
    }
}

impl DispatchError {
    /// Wraps an arbitrary application error as raised by a `processRequest` body.
    pub fn application<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DispatchError::Application(Box::new(err))
    }

    /// Wraps `self` so that it bypasses the callee's exception handler when it is later
    /// inspected by the dispatch core. Mirrors constructing a `TransparentException`.
    pub fn transparent(self) -> Self {
        match self {
            already @ DispatchError::Transparent(_) => already,
            other => DispatchError::Transparent(Box::new(other)),
        }
    }

    /// Unwraps one layer of `Transparent`, if present, returning the inner error untouched.
    pub fn into_untransparent(self) -> Self {
        match self {
            DispatchError::Transparent(inner) => *inner,
            other => other,
        }
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self, DispatchError::Transparent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn app_error() -> DispatchError {
        DispatchError::application(io::Error::new(io::ErrorKind::Other, "boom"))
    }

    #[test]
    fn transparent_wraps_exactly_once() {
        let wrapped = app_error().transparent();
        assert!(wrapped.is_transparent());
        let wrapped_twice = wrapped.transparent();
        // Wrapping an already-transparent error again must not nest a second layer.
        assert!(matches!(wrapped_twice, DispatchError::Transparent(inner) if !inner.is_transparent()));
    }

    #[test]
    fn into_untransparent_unwraps_one_layer() {
        let unwrapped = app_error().transparent().into_untransparent();
        assert!(!unwrapped.is_transparent());
        assert!(matches!(unwrapped, DispatchError::Application(_)));
    }

    #[test]
    fn into_untransparent_on_a_plain_error_is_a_no_op() {
        let err = DispatchError::NullMailbox;
        assert!(matches!(err.into_untransparent(), DispatchError::NullMailbox));
    }
}
