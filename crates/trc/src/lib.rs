/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Structured event/error plumbing shared by every crate in the
//! workspace. Nothing here talks to a socket or a file; it exists so
//! that a failure anywhere in the connection-handling core carries a
//! typed classification (`EventType`), an optional human reason, and a
//! breadcrumb of call sites, and so that logging a failure and
//! propagating it as a `Result` are the same call.

use std::{borrow::Cow, fmt};

pub type Result<T> = std::result::Result<T, Error>;

/// A single call-site captured by the [`location!`] macro.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[macro_export]
macro_rules! location {
    () => {
        $crate::Location {
            file: file!(),
            line: line!(),
        }
    };
}

/// Classifies an error by the subsystem that raised it. Mirrors the
/// error kinds a DIM station actually raises (see the station-wide
/// error handling design): transport failures kill a connection,
/// protocol/auth/replay failures drop a single envelope, route and
/// mailbox failures turn into a receipt sent back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Transport(TransportEvent),
    Protocol(ProtocolEvent),
    Auth(AuthEvent),
    Route(RouteEvent),
    Mailbox(MailboxEvent),
    Replay(ReplayEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    ReadError,
    WriteError,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    UnknownTransport,
    Malformed,
    HeaderImplausible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignatureInvalid,
    DecodeInvalid,
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEvent {
    IoError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEvent {
    TooOld,
    TooNew,
}

impl EventType {
    pub fn into_err(self) -> Error {
        Error::new(self)
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub event: EventType,
    pub details: Option<Cow<'static, str>>,
    pub reason: Option<String>,
    pub trace: Vec<Location>,
}

impl Error {
    pub fn new(event: EventType) -> Self {
        Error {
            event,
            details: None,
            reason: None,
            trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<Cow<'static, str>>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl fmt::Display) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn caused_by(mut self, location: Location) -> Self {
        self.trace.push(location);
        self
    }

    pub fn matches(&self, event: EventType) -> bool {
        self.event == event
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.event)?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        EventType::Transport(TransportEvent::ReadError)
            .into_err()
            .reason(err)
    }
}

/// Lets `.caused_by(location!())` be chained directly on a `Result`
/// returned from a fallible call, not just on a bare [`Error`].
pub trait AddContext<T> {
    fn caused_by(self, location: Location) -> Result<T>;
}

impl<T> AddContext<T> for Result<T> {
    fn caused_by(self, location: Location) -> Result<T> {
        self.map_err(|err| err.caused_by(location))
    }
}

/// Logs an [`Error`] value at `error` level, preserving its
/// classification and reason as structured fields, then yields the
/// same value back for further propagation if needed.
#[macro_export]
macro_rules! error {
    ($err:expr) => {{
        let __e = $err;
        tracing::error!(
            event = ?__e.event,
            details = __e.details.as_deref().unwrap_or_default(),
            reason = __e.reason.as_deref().unwrap_or_default(),
            "{}",
            __e
        );
        __e
    }};
}

/// Logs a debug-level, non-error event: state transitions, routing
/// decisions, and the like that are worth tracing but never bubble up
/// as an `Err`.
#[macro_export]
macro_rules! event {
    ($event:expr, $($field:tt)*) => {
        tracing::debug!(event = ?$event, $($field)*);
    };
    ($event:expr) => {
        tracing::debug!(event = ?$event);
    };
}
