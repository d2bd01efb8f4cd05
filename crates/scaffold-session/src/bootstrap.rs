//! Session bootstrap: room identity and initial stage, decided once per load
//!
//! The URL is the invitation. An empty fragment means we are first: mint a
//! token, write it back into the URL and admit ourselves. Anything else
//! means we are joining and start gated.
//!
//! Two tabs opened at once without a token mint two different rooms. That
//! is inherent to client-side minting.

use crate::admission::Stage;
use scaffold_net::RoomToken;
use std::fmt;

/// Address of the tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocation {
    href: String,
}

impl SessionLocation {
    /// Wrap a URL
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }

    /// Full URL
    #[inline]
    #[must_use]
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Fragment without the leading `#`; empty when absent
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.href.split_once('#').map_or("", |(_, fragment)| fragment)
    }

    /// Replace the fragment
    pub fn set_fragment(&mut self, fragment: &str) {
        let base = self.href.split_once('#').map_or(self.href.as_str(), |(base, _)| base);
        self.href = format!("{base}#{fragment}");
    }
}

impl fmt::Display for SessionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

/// How this tab entered the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Minted the room token; self-admitted
    Creator,
    /// Arrived through an invite link; starts gated
    Joiner,
}

/// Outcome of bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    /// Room to join
    pub room: RoomToken,
    /// Creator or joiner
    pub role: Role,
}

impl Bootstrap {
    /// Stage the admission gate starts in
    #[must_use]
    pub fn initial_stage(&self) -> Stage {
        match self.role {
            Role::Creator => Stage::Active,
            Role::Joiner => Stage::Gated,
        }
    }
}

/// Decide room and role from `location`, minting a token if needed
pub fn resolve(location: &mut SessionLocation, token_len: usize) -> Bootstrap {
    if let Some(room) = RoomToken::from_fragment(location.fragment()) {
        tracing::info!(room = %room, "joining existing room");
        return Bootstrap {
            room,
            role: Role::Joiner,
        };
    }
    let room = RoomToken::mint(token_len);
    location.set_fragment(room.as_str());
    tracing::info!(room = %room, invite = %location, "minted new room");
    Bootstrap {
        room,
        role: Role::Creator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_fragment_mints_and_writes_back() {
        let mut location = SessionLocation::new("https://scaffold.local/");
        let boot = resolve(&mut location, 6);

        assert_eq!(boot.role, Role::Creator);
        assert_eq!(boot.initial_stage(), Stage::Active);
        assert_eq!(boot.room.as_str().len(), 6);
        assert_eq!(location.fragment(), boot.room.as_str());
        assert_eq!(location.href(), format!("https://scaffold.local/#{}", boot.room));
    }

    #[test]
    fn bare_hash_counts_as_empty() {
        let mut location = SessionLocation::new("https://scaffold.local/#");
        assert_eq!(resolve(&mut location, 8).role, Role::Creator);
        assert!(!location.href().ends_with("##"));
    }

    #[test]
    fn existing_fragment_joins_gated() {
        let mut location = SessionLocation::new("https://scaffold.local/#abc123");
        let boot = resolve(&mut location, 12);

        assert_eq!(boot.role, Role::Joiner);
        assert_eq!(boot.room, RoomToken::new("abc123"));
        assert_eq!(boot.initial_stage(), Stage::Gated);
        assert_eq!(location.href(), "https://scaffold.local/#abc123");
    }

    #[test]
    fn simultaneous_creators_get_separate_rooms() {
        let mut first = SessionLocation::new("https://scaffold.local/");
        let mut second = SessionLocation::new("https://scaffold.local/");
        assert_ne!(resolve(&mut first, 12).room, resolve(&mut second, 12).room);
    }
}
