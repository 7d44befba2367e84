//! Core types shared across the token exchange pipeline.

use serde::{Deserialize, Serialize};

/// The grant flow that produced a session, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantMethod {
    IdToken,
}

impl GrantMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantMethod::IdToken => "id_token",
        }
    }
}

/// An externally asserted identity that passed every verification gate.
///
/// Produced once per request by the token verifier and immutable afterwards;
/// the linker consumes it to find or create the local account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub provider_type: String,
    pub subject: String,
    pub audience: Vec<String>,
    pub nonce: Option<String>,
    pub access_token_hash: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl VerifiedIdentity {
    /// Profile claims as a JSON object suitable for persisting on the
    /// external identity record.
    pub fn identity_data(&self) -> serde_json::Value {
        let mut data = serde_json::Map::new();
        data.insert("sub".to_string(), self.subject.clone().into());
        if let Some(email) = &self.email {
            data.insert("email".to_string(), email.clone().into());
        }
        if let Some(name) = &self.display_name {
            data.insert("name".to_string(), name.clone().into());
        }
        if let Some(serde_json::Value::Object(extra)) = &self.metadata {
            for (key, value) in extra {
                data.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        serde_json::Value::Object(data)
    }
}
