//! Security context handed to services at startup.

use embedded_engines::{BrokerSecurity, Credential};

const BROKER_USER: (&str, &str) = ("srvkafkabroker", "kafkabroker");
const CLIENT_USER: (&str, &str) = ("srvkafkaclient", "kafkaclient");

/// SASL settings shared by every service of an environment.
///
/// The services treat it as opaque: a disabled context yields plaintext
/// listeners and no credentials anywhere.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    enabled: bool,
    broker: Credential,
    client: Credential,
    users: Vec<Credential>,
}

impl SecurityContext {
    /// Plaintext everywhere
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            broker: Credential::new(BROKER_USER.0, BROKER_USER.1),
            client: Credential::new(CLIENT_USER.0, CLIENT_USER.1),
            users: Vec::new(),
        }
    }

    /// SASL with the default broker/client pair plus extra users
    pub fn enabled(users: Vec<Credential>) -> Self {
        Self {
            enabled: true,
            users,
            ..Self::disabled()
        }
    }

    /// Build from the security flag and user list of a configuration
    pub fn from_flag(with_security: bool, users: &[Credential]) -> Self {
        if with_security {
            Self::enabled(users.to_vec())
        } else {
            Self::disabled()
        }
    }

    /// Whether SASL is on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Broker listener protocol
    pub fn protocol(&self) -> &'static str {
        if self.enabled {
            "SASL_PLAINTEXT"
        } else {
            "PLAINTEXT"
        }
    }

    /// Broker-to-coordination credential
    pub fn broker_credential(&self) -> &Credential {
        &self.broker
    }

    /// Credential used by the environment's own clients, when secured
    pub fn client_credential(&self) -> Option<Credential> {
        self.enabled.then(|| self.client.clone())
    }

    /// Credentials the coordination service accepts, when secured
    pub fn coordination_credentials(&self) -> Option<Vec<Credential>> {
        self.enabled.then(|| vec![self.broker.clone()])
    }

    /// Broker SASL settings, when secured
    pub fn broker_security(&self) -> Option<BrokerSecurity> {
        self.enabled.then(|| {
            let mut users = vec![self.client.clone()];
            users.extend(self.users.iter().cloned());
            BrokerSecurity {
                inter_broker: self.broker.clone(),
                users,
            }
        })
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::disabled()
    }
}
