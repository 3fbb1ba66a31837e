//! Family and member documents.
//!
//! A family is one document in the `families` collection holding the whole
//! ordered member list. Every change to any member is a read-modify-write of
//! that single document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::status::SafetyStatus;
use crate::store::{Document, FAMILIES};

/// Number of digits in a family code.
pub const FAMILY_CODE_LEN: usize = 6;

/// A member entry inside a family document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// User identifier.
    pub user_id: String,
    /// Current safety status.
    pub status: SafetyStatus,
    /// When the member last updated their status by hand.
    pub last_update: DateTime<Utc>,
    /// Whether the current status was written by escalation.
    #[serde(default)]
    pub auto_updated: bool,
    /// Why escalation changed the status.
    #[serde(default)]
    pub auto_update_reason: Option<String>,
    /// When escalation last changed the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_updated_at: Option<DateTime<Utc>>,
    /// Whether the member administers the family.
    #[serde(default)]
    pub is_admin: bool,
}

impl Member {
    /// A member who just joined and has not answered yet.
    #[must_use]
    pub fn joined(user_id: impl Into<String>, at: DateTime<Utc>, is_admin: bool) -> Self {
        Self {
            user_id: user_id.into(),
            status: SafetyStatus::NotYetResponded,
            last_update: at,
            auto_updated: false,
            auto_update_reason: None,
            auto_updated_at: None,
            is_admin,
        }
    }

    /// Record a manual status change.
    ///
    /// Clears any trace of automatic escalation.
    pub fn apply_manual(&mut self, status: SafetyStatus, at: DateTime<Utc>) {
        self.status = status;
        self.last_update = at;
        self.auto_updated = false;
        self.auto_update_reason = None;
        self.auto_updated_at = None;
    }

    /// Record an automatic escalation. `last_update` is left untouched.
    pub fn apply_escalation(&mut self, status: SafetyStatus, reason: &str, at: DateTime<Utc>) {
        self.status = status;
        self.auto_updated = true;
        self.auto_update_reason = Some(reason.to_string());
        self.auto_updated_at = Some(at);
    }
}

/// A family document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    /// Six-digit family code, also the document id.
    pub code: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ordered member list.
    #[serde(default)]
    pub members: Vec<Member>,
    /// Archived families are no longer monitored.
    #[serde(default)]
    pub is_archived: bool,
    /// Creation instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Family {
    /// A new family with its creator as the only (admin) member.
    #[must_use]
    pub fn new(code: impl Into<String>, name: Option<String>, creator: &str, at: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            name,
            members: vec![Member::joined(creator, at, true)],
            is_archived: false,
            created_at: Some(at),
        }
    }

    /// Decode a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDocument`] if the document does not have the
    /// family shape.
    pub fn from_document(id: &str, document: &Document) -> Result<Self> {
        serde_json::from_value(document.clone())
            .map_err(|e| Error::invalid_document(FAMILIES, id, e.to_string()))
    }

    /// Encode for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_document(&self) -> Result<Document> {
        Ok(serde_json::to_value(self)?)
    }

    /// Look up a member.
    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    /// Look up a member for modification.
    pub fn member_mut(&mut self, user_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    /// Whether the user belongs to the family.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    /// Remove a member, returning it.
    ///
    /// When the departing member was the last admin, the first remaining
    /// member is promoted. A family left empty is archived.
    pub fn remove_member(&mut self, user_id: &str) -> Option<Member> {
        let index = self.members.iter().position(|m| m.user_id == user_id)?;
        let removed = self.members.remove(index);

        if removed.is_admin && !self.members.iter().any(|m| m.is_admin) {
            if let Some(first) = self.members.first_mut() {
                first.is_admin = true;
            }
        }
        if self.members.is_empty() {
            self.is_archived = true;
        }
        Some(removed)
    }
}

/// Check that `code` is a family code.
///
/// # Errors
///
/// Returns [`Error::InvalidFamilyCode`] unless the code is exactly six ASCII
/// digits.
pub fn validate_family_code(code: &str) -> Result<()> {
    if code.len() == FAMILY_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidFamilyCode(code.to_string()))
    }
}

/// Derive a candidate family code.
///
/// The code is a BLAKE3 digest of the creator, the creation instant and an
/// attempt counter, folded into six decimal digits. Callers bump `attempt`
/// when the candidate is already taken.
#[must_use]
pub fn derive_family_code(creator: &str, at: DateTime<Utc>, attempt: u32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(creator.as_bytes());
    hasher.update(&at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(&attempt.to_le_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    let value = u64::from_le_bytes(prefix) % 1_000_000;
    format!("{value:06}")
}
