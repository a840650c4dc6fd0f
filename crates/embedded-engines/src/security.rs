//! Minimal username/password credentials shared by the engines.

use serde::{Deserialize, Serialize};

/// A plain username/password pair
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credential {
    /// Create a new credential
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check a presented username/password against a list of accepted credentials
    pub fn accepts(accepted: &[Credential], username: &str, password: &str) -> bool {
        accepted
            .iter()
            .any(|c| c.username == username && c.password == password)
    }
}

// Passwords stay out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts() {
        let accepted = vec![
            Credential::new("srvkafkabroker", "kafkabroker"),
            Credential::new("srvkafkaclient", "kafkaclient"),
        ];

        assert!(Credential::accepts(&accepted, "srvkafkaclient", "kafkaclient"));
        assert!(!Credential::accepts(&accepted, "srvkafkaclient", "wrong"));
        assert!(!Credential::accepts(&[], "srvkafkaclient", "kafkaclient"));
    }

    #[test]
    fn test_debug_hides_password() {
        let credential = Credential::new("user", "secret");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret"));
    }
}
