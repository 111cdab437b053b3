//! Shared types for engine operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of an encryptable object, optionally versioned.
///
/// Displayed as `<uuid>` or `<uuid>@<version>`; the same form is used as a
/// local storage key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKeyId {
    pub object_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl ObjectKeyId {
    pub fn new(object_id: Uuid) -> Self {
        Self {
            object_id,
            version: None,
        }
    }

    pub fn versioned(object_id: Uuid, version: u64) -> Self {
        Self {
            object_id,
            version: Some(version),
        }
    }

    /// A fresh, time-ordered, unversioned id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl fmt::Display for ObjectKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}@{version}", self.object_id),
            None => write!(f, "{}", self.object_id),
        }
    }
}

impl FromStr for ObjectKeyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, version) = match s.split_once('@') {
            Some((id, version)) => {
                let version = version
                    .parse::<u64>()
                    .map_err(|e| format!("invalid object version {version:?}: {e}"))?;
                (id, Some(version))
            }
            None => (s, None),
        };
        let object_id = Uuid::parse_str(id).map_err(|e| format!("invalid object id {id:?}: {e}"))?;
        Ok(Self { object_id, version })
    }
}

/// Platform user identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Public material a user publishes so others can share with them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKeys {
    pub user: UserId,
    pub identity_public_key: Vec<u8>,
    pub search_public_key: Vec<u8>,
}

/// Key material addressed to one grantee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranteeGrant {
    pub grantee: UserId,
    /// Document crypto service sealed to the grantee's identity.
    pub wrapped_service: Vec<u8>,
    /// Document sharing key sealed to the grantee's identity.
    pub wrapped_sharing_key: Vec<u8>,
}

/// Request submitted to the sharing service for one document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub document: ObjectKeyId,
    pub owner: UserId,
    pub grants: Vec<GranteeGrant>,
    /// The sharing key sealed to the owner's own identity.
    pub owner_sharing_key: Vec<u8>,
}

/// A share waiting in a recipient's incoming queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingShare {
    pub share_id: Uuid,
    pub document: ObjectKeyId,
    pub owner: UserId,
    pub wrapped_service: Vec<u8>,
    pub wrapped_sharing_key: Vec<u8>,
    pub shared_at: DateTime<Utc>,
}

/// Registers a recipient's bridge key for a shared document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterKeysRequest {
    pub document: ObjectKeyId,
    pub user: UserId,
    /// Bridge key sealed to the registering user's identity.
    pub wrapped_bridge_key: Vec<u8>,
}

/// Outcome of sharing a document with one grantee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GranteeOutcome {
    Granted,
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranteeResult {
    pub grantee: UserId,
    pub outcome: GranteeOutcome,
}

/// Per-grantee results of one share operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareReport {
    pub document: ObjectKeyId,
    pub results: Vec<GranteeResult>,
}

impl ShareReport {
    pub fn granted(&self) -> impl Iterator<Item = &UserId> {
        self.results
            .iter()
            .filter(|r| r.outcome == GranteeOutcome::Granted)
            .map(|r| &r.grantee)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&UserId, &str)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            GranteeOutcome::Failed { reason } => Some((&r.grantee, reason.as_str())),
            GranteeOutcome::Granted => None,
        })
    }

    pub fn granted_count(&self) -> usize {
        self.granted().count()
    }

    /// True when every grantee received the document.
    pub fn is_complete(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == GranteeOutcome::Granted)
    }
}
