use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::api_types::{embedded_list, lead_id, timestamp};

/// A sales lead as held in memory and in the cache.
///
/// `flags` is display state set by reconciliation; it is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
  #[serde(default, deserialize_with = "lead_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub company: Option<String>,
  #[serde(default)]
  pub status: String,
  pub campaign: Option<String>,
  pub source: Option<String>,
  #[serde(default, deserialize_with = "embedded_list")]
  pub assigned_to: Vec<Assignment>,
  #[serde(default, deserialize_with = "embedded_list")]
  pub comments: Vec<Comment>,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp")]
  pub follow_up_at: Option<DateTime<Utc>>,
  /// Fields we don't model, kept so cached copies round-trip.
  #[serde(flatten)]
  pub extra: BTreeMap<String, serde_json::Value>,
  #[serde(skip)]
  pub flags: ChangeFlags,
}

/// Transient markers shown for a few seconds after a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
  pub is_new: bool,
  pub is_modified: bool,
}

impl ChangeFlags {
  pub fn is_set(&self) -> bool {
    self.is_new || self.is_modified
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
  #[serde(alias = "id")]
  pub user_id: String,
  #[serde(default)]
  pub name: String,
  pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  #[serde(default)]
  pub author: String,
  #[serde(default, alias = "text", alias = "comment")]
  pub body: String,
  #[serde(default, deserialize_with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
}

/// Identity whose leads are fetched and cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
  pub id: String,
  pub email: String,
  pub team: Option<String>,
}

impl Lead {
  /// Copy of this lead with the display flags cleared.
  pub fn without_flags(&self) -> Lead {
    Lead {
      flags: ChangeFlags::default(),
      ..self.clone()
    }
  }

  pub fn has_id(&self) -> bool {
    !self.id.trim().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_numeric_id_and_stringified_lists() {
    let json = r#"{
      "id": 42,
      "name": "Ada",
      "status": "new",
      "assignedTo": "[{\"userId\":\"u1\",\"name\":\"Sam\"}]",
      "comments": "",
      "createdAt": "2024-03-01T10:00:00Z",
      "priority": "high"
    }"#;
    let lead: Lead = serde_json::from_str(json).unwrap();
    assert_eq!(lead.id, "42");
    assert_eq!(lead.assigned_to.len(), 1);
    assert_eq!(lead.assigned_to[0].user_id, "u1");
    assert!(lead.comments.is_empty());
    assert_eq!(lead.extra.get("priority").unwrap(), "high");
  }

  #[test]
  fn test_missing_id_decodes_as_empty() {
    let lead: Lead = serde_json::from_str(r#"{"name":"no id"}"#).unwrap();
    assert!(!lead.has_id());
  }

  #[test]
  fn test_flags_are_not_serialized() {
    let mut lead = Lead {
      id: "1".into(),
      ..Default::default()
    };
    lead.flags.is_new = true;
    let json = serde_json::to_value(&lead).unwrap();
    assert!(json.get("flags").is_none());
    assert!(json.get("isNew").is_none());

    let back: Lead = serde_json::from_value(json).unwrap();
    assert!(!back.flags.is_set());
    assert_eq!(back.id, "1");
  }
}
