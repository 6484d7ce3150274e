//! Content fingerprints for change detection.
//!
//! The server gives us no revision numbers, so a lead counts as modified when
//! the digest of a configured, ordered subset of its fields changes. Fields
//! outside the subset can change without the lead being flagged.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

use super::types::Lead;

const SEPARATOR: char = '\u{1f}';

/// Number of digest bytes kept.
const DIGEST_LEN: usize = 16;

/// A lead field that can take part in the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
  Name,
  Email,
  Phone,
  Company,
  Status,
  Campaign,
  Source,
  Assignments,
  Comments,
  CreatedAt,
  UpdatedAt,
  FollowUpAt,
}

impl LeadField {
  /// Normalized text value. Absent values are the empty string.
  fn value(self, lead: &Lead) -> String {
    match self {
      LeadField::Name => lead.name.clone(),
      LeadField::Email => opt(&lead.email),
      LeadField::Phone => opt(&lead.phone),
      LeadField::Company => opt(&lead.company),
      LeadField::Status => lead.status.clone(),
      LeadField::Campaign => opt(&lead.campaign),
      LeadField::Source => opt(&lead.source),
      LeadField::Assignments => lead
        .assigned_to
        .iter()
        .map(|a| a.user_id.as_str())
        .collect::<Vec<_>>()
        .join(","),
      LeadField::Comments => lead
        .comments
        .iter()
        .map(|c| format!("{}:{}:{}", c.author, c.body, time(&c.created_at)))
        .collect::<Vec<_>>()
        .join(","),
      LeadField::CreatedAt => time(&lead.created_at),
      LeadField::UpdatedAt => time(&lead.updated_at),
      LeadField::FollowUpAt => time(&lead.follow_up_at),
    }
  }
}

fn opt(value: &Option<String>) -> String {
  value.clone().unwrap_or_default()
}

fn time(value: &Option<DateTime<Utc>>) -> String {
  value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Fields hashed when the config doesn't say otherwise.
///
/// Assignments and comments are left out; enable them in `fingerprint_fields`
/// if reassignment or a new comment should mark a lead as modified.
pub const DEFAULT_FIELDS: &[LeadField] = &[
  LeadField::Name,
  LeadField::Email,
  LeadField::Phone,
  LeadField::Company,
  LeadField::Status,
  LeadField::Campaign,
  LeadField::Source,
  LeadField::FollowUpAt,
  LeadField::UpdatedAt,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Computes fingerprints over a fixed field list.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
  fields: Vec<LeadField>,
}

impl Default for Fingerprinter {
  fn default() -> Self {
    Self::new(DEFAULT_FIELDS.to_vec())
  }
}

impl Fingerprinter {
  pub fn new(fields: Vec<LeadField>) -> Self {
    Self { fields }
  }

  pub fn fields(&self) -> &[LeadField] {
    &self.fields
  }

  pub fn fingerprint(&self, lead: &Lead) -> Fingerprint {
    let mut input = String::new();
    for (i, field) in self.fields.iter().enumerate() {
      if i > 0 {
        input.push(SEPARATOR);
      }
      input.push_str(&field.value(lead));
    }

    let digest = Sha256::digest(input.as_bytes());
    Fingerprint(hex::encode(&digest[..DIGEST_LEN]))
  }
}
