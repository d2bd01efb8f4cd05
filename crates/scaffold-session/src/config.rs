//! Session configuration

use crate::error::SessionError;
use scaffold_net::RoomToken;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Session configuration
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name advertised in presence; derived from the peer id when unset
    pub display_name: Option<String>,
    /// Colour tags handed out to peers
    pub palette: Vec<String>,
    /// Length of minted room tokens
    pub token_len: usize,
    /// Propagation steps run by the heuristic simulator
    pub simulation_steps: usize,
    /// Answer from the heuristic analyst when a supplied analyst fails
    pub heuristic_fallback: bool,
}

impl SessionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// With colour palette
    #[inline]
    #[must_use]
    pub fn with_palette(mut self, palette: Vec<String>) -> Self {
        self.palette = palette;
        self
    }

    /// With room token length
    #[inline]
    #[must_use]
    pub fn with_token_len(mut self, len: usize) -> Self {
        self.token_len = len;
        self
    }

    /// With simulation steps
    #[inline]
    #[must_use]
    pub fn with_simulation_steps(mut self, steps: usize) -> Self {
        self.simulation_steps = steps;
        self
    }

    /// With or without the heuristic safety net behind a supplied analyst
    #[inline]
    #[must_use]
    pub fn with_heuristic_fallback(mut self, enabled: bool) -> Self {
        self.heuristic_fallback = enabled;
        self
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] on malformed or invalid input
    pub fn from_toml_str(input: &str) -> Result<Self, SessionError> {
        let config: Self =
            toml::from_str(input).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] naming the offending field
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.palette.is_empty() {
            return Err(SessionError::Config("palette must not be empty".into()));
        }
        if self.token_len == 0 {
            return Err(SessionError::Config("token_len must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            palette: [
                "#e11d48", "#2563eb", "#16a34a", "#d97706", "#7c3aed", "#0891b2", "#db2777",
                "#65a30d",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            token_len: RoomToken::DEFAULT_LEN,
            simulation_steps: 12,
            heuristic_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(SessionConfig::from_toml_str("").unwrap(), SessionConfig::default());
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = SessionConfig::from_toml_str(
            r##"
            display_name = "Ada"
            token_len = 8
            palette = ["#000000"]
            "##,
        )
        .unwrap();
        assert_eq!(config.display_name.as_deref(), Some("Ada"));
        assert_eq!(config.token_len, 8);
        assert_eq!(config.palette, vec!["#000000".to_string()]);
        assert_eq!(config.simulation_steps, 12);
        assert!(config.heuristic_fallback);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(SessionConfig::from_toml_str("palette = []").is_err());
        assert!(SessionConfig::from_toml_str("token_len = 0").is_err());
        assert!(SessionConfig::from_toml_str("token_len = \"x\"").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "simulation_steps = 3").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.simulation_steps, 3);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SessionConfig::load("/nonexistent/scaffold.toml").unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn builder_chains() {
        let config = SessionConfig::new()
            .with_display_name("Grace")
            .with_token_len(4)
            .with_simulation_steps(2);
        assert_eq!(config.display_name.as_deref(), Some("Grace"));
        assert_eq!(config.token_len, 4);
        assert_eq!(config.simulation_steps, 2);
        assert!(config.validate().is_ok());
    }
}
