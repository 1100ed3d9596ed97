/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The `name@address[/terminal]` identifier that every actor in the
//! network — a user, a group, a station — is named by.

use std::fmt;

/// The network kind carried by an [`Identifier`]'s address. The core
/// never needs to know more about a user or group than this tag plus
/// the address string; resolving it to an actual account is the
/// `Barrack` collaborator's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    User,
    Station,
    GroupPolylogue,
    GroupChatroom,
}

impl NetworkKind {
    pub fn is_group(self) -> bool {
        matches!(self, NetworkKind::GroupPolylogue | NetworkKind::GroupChatroom)
    }
}

pub const ANYONE: &str = "ANYONE@ANYWHERE";
pub const EVERYONE: &str = "EVERYONE@EVERYWHERE";

/// A value-typed, immutable identifier. Equality and hashing are by
/// string form, matching the wire representation exactly so an `ID`
/// round-trips through JSON without reformatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub name: String,
    pub address: String,
    pub terminal: Option<String>,
    pub kind: NetworkKind,
}

impl Identifier {
    pub fn new(name: impl Into<String>, address: impl Into<String>, kind: NetworkKind) -> Self {
        Identifier {
            name: name.into(),
            address: address.into(),
            terminal: None,
            kind,
        }
    }

    pub fn anyone() -> Self {
        Identifier::new("ANYONE", "ANYWHERE", NetworkKind::User)
    }

    /// Parses `name@address` or `name@address/terminal`. The network
    /// kind is not recoverable from the string alone; callers that
    /// need it look the identifier up via `Barrack` first.
    pub fn parse(s: &str, kind: NetworkKind) -> Option<Self> {
        let (name, rest) = s.split_once('@')?;
        if name.is_empty() || rest.is_empty() {
            return None;
        }
        let (address, terminal) = match rest.split_once('/') {
            Some((addr, term)) => (addr, Some(term.to_string())),
            None => (rest, None),
        };
        Some(Identifier {
            name: name.to_string(),
            address: address.to_string(),
            terminal,
            kind,
        })
    }

    pub fn is_broadcast(&self) -> bool {
        let s = self.to_string();
        s == ANYONE || s == EVERYONE
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)?;
        if let Some(terminal) = &self.terminal {
            write!(f, "/{terminal}")?;
        }
        Ok(())
    }
}
