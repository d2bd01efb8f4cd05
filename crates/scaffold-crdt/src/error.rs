//! Error types for the replicated document
//!
//! Local mutations and remote merges never fail; the only fallible surface is
//! the byte codec used when updates cross a process boundary.

/// Document error
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    /// Update bytes could not be encoded or decoded
    #[error("update codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_display() {
        let err: DocError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert!(err.to_string().contains("update codec error"));
    }
}
