//! Room and connection identity

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque room token carried in the URL fragment
///
/// Token equality is the only basis for discovery; no registry of rooms
/// exists anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomToken(String);

impl RoomToken {
    /// Default length of minted tokens
    pub const DEFAULT_LEN: usize = 12;

    /// Mint a fresh random alphanumeric token
    #[must_use]
    pub fn mint(len: usize) -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len.max(1))
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Wrap an existing token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse the fragment part of a URL (`#token` or `token`)
    ///
    /// An empty fragment yields `None`.
    #[must_use]
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        let token = fragment.trim().trim_start_matches('#');
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_owned()))
        }
    }

    /// Render as a URL fragment
    #[must_use]
    pub fn to_fragment(&self) -> String {
        format!("#{}", self.0)
    }

    /// Borrow the raw token
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-assigned id of one live connection
///
/// Presence entries are keyed by this id, not by peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Random connection id
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_alphanumeric_and_sized() {
        let token = RoomToken::mint(RoomToken::DEFAULT_LEN);
        assert_eq!(token.as_str().len(), RoomToken::DEFAULT_LEN);
        assert!(token.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn two_mints_differ() {
        assert_ne!(RoomToken::mint(12), RoomToken::mint(12));
    }

    #[test]
    fn fragment_round_trip() {
        let token = RoomToken::from_fragment("#abc123").unwrap();
        assert_eq!(token.as_str(), "abc123");
        assert_eq!(token.to_fragment(), "#abc123");
        assert_eq!(RoomToken::from_fragment("#"), None);
        assert_eq!(RoomToken::from_fragment(""), None);
    }
}
