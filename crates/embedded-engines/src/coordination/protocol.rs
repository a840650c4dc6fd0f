//! Wire protocol of the coordination service.
//!
//! A connection opens either with a 4-letter diagnostic word, answered in
//! plain text before the connection is closed, or with a JSON object, which
//! starts a metadata session of newline-delimited JSON requests and responses.

use serde::{Deserialize, Serialize};

/// Diagnostic 4-letter words understood by the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourLetterWord {
    /// Are you ok? Answers `imok`.
    Ruok,
    /// Outstanding requests. Answers nothing when idle.
    Reqs,
    /// Full server statistics including clients
    Stat,
    /// Server statistics
    Srvr,
    /// Server configuration
    Conf,
    /// Read-only mode check. Answers `rw`.
    Isro,
    /// Monitoring key/value pairs
    Mntr,
    /// Sessions and ephemeral nodes
    Dump,
    /// Server environment
    Envi,
}

impl FourLetterWord {
    /// All known words
    pub const ALL: [FourLetterWord; 9] = [
        FourLetterWord::Ruok,
        FourLetterWord::Reqs,
        FourLetterWord::Stat,
        FourLetterWord::Srvr,
        FourLetterWord::Conf,
        FourLetterWord::Isro,
        FourLetterWord::Mntr,
        FourLetterWord::Dump,
        FourLetterWord::Envi,
    ];

    /// Parse the first four bytes of a connection
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|word| word.as_str().as_bytes() == bytes)
    }

    /// The word as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            FourLetterWord::Ruok => "ruok",
            FourLetterWord::Reqs => "reqs",
            FourLetterWord::Stat => "stat",
            FourLetterWord::Srvr => "srvr",
            FourLetterWord::Conf => "conf",
            FourLetterWord::Isro => "isro",
            FourLetterWord::Mntr => "mntr",
            FourLetterWord::Dump => "dump",
            FourLetterWord::Envi => "envi",
        }
    }
}

/// Request sent within a metadata session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionRequest {
    /// Authenticate the session
    Auth {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Create a node, creating missing parents as persistent empty nodes
    Create {
        /// Absolute node path
        path: String,
        /// Node payload
        #[serde(default)]
        data: String,
        /// Remove the node when this session ends
        #[serde(default)]
        ephemeral: bool,
    },
    /// Read a node
    Get {
        /// Absolute node path
        path: String,
    },
    /// Replace a node's payload
    Set {
        /// Absolute node path
        path: String,
        /// New payload
        data: String,
    },
    /// Delete a childless node
    Delete {
        /// Absolute node path
        path: String,
    },
    /// List the direct children of a node
    Children {
        /// Absolute node path
        path: String,
    },
    /// Check whether a node exists
    Exists {
        /// Absolute node path
        path: String,
    },
}

/// Response to a [`SessionRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SessionResponse {
    /// Request applied
    Ok,
    /// Node payload
    Data {
        /// Payload
        data: String,
        /// Number of times the payload was replaced
        version: u32,
    },
    /// Child node names, sorted
    Children {
        /// Names relative to the parent
        children: Vec<String>,
    },
    /// Existence check result
    Exists {
        /// Whether the node exists
        exists: bool,
    },
    /// Request rejected
    Error {
        /// Error code
        code: CoordinationErrorCode,
        /// Human readable detail
        message: String,
    },
}

impl SessionResponse {
    /// Build an error response
    pub fn error(code: CoordinationErrorCode, message: impl Into<String>) -> Self {
        SessionResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Error codes returned by the coordination service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoordinationErrorCode {
    /// Node already exists
    NodeExists,
    /// Node does not exist
    NoNode,
    /// Node still has children
    NotEmpty,
    /// Path is malformed
    BadArguments,
    /// Credentials rejected
    AuthFailed,
    /// Session must authenticate first
    NotAuthenticated,
    /// Request could not be parsed
    BadRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_four_letter_words() {
        assert_eq!(FourLetterWord::parse(b"ruok"), Some(FourLetterWord::Ruok));
        assert_eq!(FourLetterWord::parse(b"reqs"), Some(FourLetterWord::Reqs));
        assert_eq!(FourLetterWord::parse(b"RUOK"), None);
        assert_eq!(FourLetterWord::parse(b"{\"op"), None);
    }

    #[test]
    fn test_request_wire_format() {
        let request = SessionRequest::Create {
            path: "/brokers/ids/0".to_string(),
            data: "{}".to_string(),
            ephemeral: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.starts_with("{\"op\":\"create\""));

        let parsed: SessionRequest =
            serde_json::from_str(r#"{"op":"create","path":"/a"}"#).unwrap();
        assert_eq!(
            parsed,
            SessionRequest::Create {
                path: "/a".to_string(),
                data: String::new(),
                ephemeral: false,
            }
        );
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_string(&SessionResponse::Ok).unwrap(),
            r#"{"result":"ok"}"#
        );

        let error: SessionResponse =
            serde_json::from_str(r#"{"result":"error","code":"NoNode","message":"/x"}"#)
                .unwrap();
        assert_eq!(
            error,
            SessionResponse::error(CoordinationErrorCode::NoNode, "/x")
        );
    }
}
