//! Sandbox runtime notifications.

use serde::{Deserialize, Serialize};

/// Readiness signal emitted by a sandbox runtime once the previewed server
/// has bound a network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    /// Bound port inside the sandbox.
    pub port: u16,
    /// Preview address reachable from the embedding surface.
    pub url: String,
}

impl ServerReady {
    pub fn new(port: u16, url: impl Into<String>) -> Self {
        Self {
            port,
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ready = ServerReady::new(3000, "http://localhost:3000");
        let json = serde_json::to_string(&ready).unwrap();
        let back: ServerReady = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ready);
    }
}
