//! Serde helpers for the lead list endpoint.
//!
//! The backend is loose about types: identifiers come back as numbers or
//! strings, and nested lists are sometimes JSON-encoded strings. Everything is
//! normalized here, once, so the rest of the crate only sees typed values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::types::Lead;

/// A decoded list response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedLeads {
  pub leads: Vec<Lead>,
  /// Elements of the response that could not be decoded as a lead
  pub skipped: usize,
}

impl From<Vec<Lead>> for FetchedLeads {
  fn from(leads: Vec<Lead>) -> Self {
    Self { leads, skipped: 0 }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Embedded<T> {
  List(Vec<T>),
  Text(String),
}

/// Accept `[...]`, `"[...]"`, `""` or `null` for a list field.
pub fn embedded_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  use serde::de::Error;

  match Option::<Embedded<T>>::deserialize(deserializer)? {
    None => Ok(Vec::new()),
    Some(Embedded::List(items)) => Ok(items),
    Some(Embedded::Text(s)) if s.trim().is_empty() => Ok(Vec::new()),
    Some(Embedded::Text(s)) => serde_json::from_str(&s).map_err(D::Error::custom),
  }
}

/// Lead identifiers may be strings or numbers. Anything else decodes as empty
/// and the record is dropped later with a warning.
pub fn lead_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::String(s)) => s,
    Some(Value::Number(n)) => n.to_string(),
    _ => String::new(),
  })
}

/// Timestamps arrive as RFC 3339, as naive `YYYY-MM-DD HH:MM:SS` (taken as
/// UTC), as a bare date, or as epoch milliseconds. Null and `""` mean unset.
pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  use serde::de::Error;

  match Option::<Value>::deserialize(deserializer)? {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
    Some(Value::String(s)) => parse_timestamp(s.trim())
      .map(Some)
      .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp {:?}", s))),
    Some(Value::Number(n)) => n
      .as_i64()
      .and_then(DateTime::from_timestamp_millis)
      .map(Some)
      .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", n))),
    Some(other) => Err(D::Error::custom(format!("expected a timestamp, got {}", other))),
  }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
    return Some(t.with_timezone(&Utc));
  }
  for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(t.and_utc());
    }
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|t| t.and_utc())
}

/// Decode a list response body.
///
/// The body must be a JSON array. Elements are decoded one at a time and any
/// that fail are skipped with a warning, so one bad record never costs the
/// rest of the list.
pub fn parse_leads(body: &[u8]) -> serde_json::Result<FetchedLeads> {
  let items: Vec<Value> = serde_json::from_slice(body)?;
  let mut fetched = FetchedLeads {
    leads: Vec::with_capacity(items.len()),
    skipped: 0,
  };

  for (index, item) in items.into_iter().enumerate() {
    match serde_json::from_value::<Lead>(item) {
      Ok(lead) => fetched.leads.push(lead),
      Err(e) => {
        warn!(index, error = %e, "skipping undecodable lead");
        fetched.skipped += 1;
      }
    }
  }
  Ok(fetched)
}

/// Decode a single-record response body.
pub fn parse_lead(body: &[u8]) -> serde_json::Result<Lead> {
  serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_array_is_valid() {
    let fetched = parse_leads(b"[]").unwrap();
    assert!(fetched.leads.is_empty());
    assert_eq!(fetched.skipped, 0);
  }

  #[test]
  fn test_object_body_is_rejected_for_list() {
    assert!(parse_leads(br#"{"id":"1"}"#).is_err());
  }

  #[test]
  fn test_truncated_body_is_an_error() {
    assert!(parse_leads(br#"[{"id":"1"},"#).is_err());
  }

  #[test]
  fn test_bad_records_are_skipped_not_fatal() {
    let body = br#"[
      {"id":"1","comments":"[not json"},
      42,
      {"id":"3","createdAt":"last tuesday"},
      {"id":"4","name":"ok"}
    ]"#;
    let fetched = parse_leads(body).unwrap();
    assert_eq!(fetched.skipped, 3);
    assert_eq!(fetched.leads.len(), 1);
    assert_eq!(fetched.leads[0].name, "ok");
  }

  #[test]
  fn test_naive_and_loose_timestamps() {
    let body = br#"[
      {"id":"1","createdAt":"2024-01-15 10:23:45"},
      {"id":"2","createdAt":"2024-01-15T10:23:45.250Z","updatedAt":""},
      {"id":"3","createdAt":"2024-01-15","followUpAt":null},
      {"id":"4","createdAt":1705314225000}
    ]"#;
    let fetched = parse_leads(body).unwrap();
    assert_eq!(fetched.skipped, 0);

    let at = |i: usize| fetched.leads[i].created_at.unwrap().to_rfc3339();
    assert_eq!(at(0), "2024-01-15T10:23:45+00:00");
    assert_eq!(at(1), "2024-01-15T10:23:45.250+00:00");
    assert_eq!(at(2), "2024-01-15T00:00:00+00:00");
    assert_eq!(at(3), "2024-01-15T10:23:45+00:00");
    assert!(fetched.leads[1].updated_at.is_none());
    assert!(fetched.leads[2].follow_up_at.is_none());
  }

  #[test]
  fn test_comments_as_array_and_null() {
    let body = br#"[
      {"id":"1","comments":[{"author":"a","text":"called"}]},
      {"id":"2","comments":null}
    ]"#;
    let leads = parse_leads(body).unwrap().leads;
    assert_eq!(leads[0].comments[0].body, "called");
    assert!(leads[1].comments.is_empty());
  }
}
