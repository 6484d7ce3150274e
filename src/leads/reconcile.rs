//! Merge a freshly fetched lead list into the one we already hold.

use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::fingerprint::Fingerprinter;
use super::types::{ChangeFlags, Lead};

type Comparator = Arc<dyn Fn(&Lead, &Lead) -> Ordering + Send + Sync>;

/// Output ordering of a reconciled list.
#[derive(Clone, Default)]
pub enum LeadOrder {
  #[default]
  CreatedDesc,
  CreatedAsc,
  UpdatedDesc,
  NameAsc,
  Custom(Comparator),
}

impl LeadOrder {
  pub fn custom<F>(f: F) -> Self
  where
    F: Fn(&Lead, &Lead) -> Ordering + Send + Sync + 'static,
  {
    LeadOrder::Custom(Arc::new(f))
  }

  pub fn compare(&self, a: &Lead, b: &Lead) -> Ordering {
    match self {
      // None sorts last in descending order
      LeadOrder::CreatedDesc => b.created_at.cmp(&a.created_at),
      LeadOrder::CreatedAsc => a.created_at.cmp(&b.created_at),
      LeadOrder::UpdatedDesc => b.updated_at.cmp(&a.updated_at),
      LeadOrder::NameAsc => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
      LeadOrder::Custom(f) => f(a, b),
    }
  }
}

impl fmt::Debug for LeadOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LeadOrder::CreatedDesc => f.write_str("CreatedDesc"),
      LeadOrder::CreatedAsc => f.write_str("CreatedAsc"),
      LeadOrder::UpdatedDesc => f.write_str("UpdatedDesc"),
      LeadOrder::NameAsc => f.write_str("NameAsc"),
      LeadOrder::Custom(_) => f.write_str("Custom"),
    }
  }
}

/// Config-file spelling of the built-in orders.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
  #[default]
  CreatedDesc,
  CreatedAsc,
  UpdatedDesc,
  NameAsc,
}

impl From<SortKey> for LeadOrder {
  fn from(key: SortKey) -> Self {
    match key {
      SortKey::CreatedDesc => LeadOrder::CreatedDesc,
      SortKey::CreatedAsc => LeadOrder::CreatedAsc,
      SortKey::UpdatedDesc => LeadOrder::UpdatedDesc,
      SortKey::NameAsc => LeadOrder::NameAsc,
    }
  }
}

/// Result of merging a fetched list.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
  pub merged: Vec<Arc<Lead>>,
  /// Leads not present before. Always zero on first load.
  pub new_count: usize,
  pub modified_count: usize,
  /// Leads held before but absent from the fetch.
  pub removed_count: usize,
  /// Fetched records skipped for a missing or duplicate id.
  pub dropped_count: usize,
  /// Ids whose content changed, for invalidating per-lead overrides.
  pub modified_ids: Vec<String>,
  pub first_load: bool,
}

impl Reconciliation {
  pub fn has_changes(&self) -> bool {
    self.new_count > 0 || self.modified_count > 0 || self.removed_count > 0
  }
}

/// Classify each fetched lead as new, modified or unchanged.
///
/// Unchanged leads keep the previous `Arc`, so consumers comparing by pointer
/// see no change. The fetched set decides membership; the result is sorted by
/// `order`. On first load (empty `previous`) nothing is flagged or counted.
pub fn reconcile(
  previous: &[Arc<Lead>],
  fetched: Vec<Lead>,
  fingerprinter: &Fingerprinter,
  order: &LeadOrder,
) -> Reconciliation {
  let first_load = previous.is_empty();
  let by_id: HashMap<&str, &Arc<Lead>> = previous.iter().map(|l| (l.id.as_str(), l)).collect();

  let mut result = Reconciliation {
    first_load,
    ..Default::default()
  };
  let mut seen: HashSet<String> = HashSet::with_capacity(fetched.len());
  let mut retained = 0usize;

  for mut lead in fetched {
    if !lead.has_id() {
      warn!(name = %lead.name, "dropping fetched lead without an id");
      result.dropped_count += 1;
      continue;
    }
    if !seen.insert(lead.id.clone()) {
      warn!(id = %lead.id, "dropping duplicate lead in fetch");
      result.dropped_count += 1;
      continue;
    }

    match by_id.get(lead.id.as_str()) {
      Some(prev) => {
        retained += 1;
        if fingerprinter.fingerprint(prev) == fingerprinter.fingerprint(&lead) {
          result.merged.push(Arc::clone(prev));
        } else {
          lead.flags = ChangeFlags {
            is_new: false,
            is_modified: true,
          };
          result.modified_count += 1;
          result.modified_ids.push(lead.id.clone());
          result.merged.push(Arc::new(lead));
        }
      }
      None => {
        lead.flags = ChangeFlags::default();
        if !first_load {
          lead.flags.is_new = true;
          result.new_count += 1;
        }
        result.merged.push(Arc::new(lead));
      }
    }
  }

  result.removed_count = previous.len().saturating_sub(retained);
  result.merged.sort_by(|a, b| order.compare(a, b));
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn lead(id: &str, status: &str) -> Lead {
    Lead {
      id: id.into(),
      status: status.into(),
      ..Default::default()
    }
  }

  fn arcs(leads: Vec<Lead>) -> Vec<Arc<Lead>> {
    leads.into_iter().map(Arc::new).collect()
  }

  #[test]
  fn test_new_and_modified_classification() {
    let fp = Fingerprinter::default();
    let previous = arcs(vec![lead("1", "new")]);
    let fetched = vec![lead("1", "followup"), lead("2", "new")];

    let r = reconcile(&previous, fetched, &fp, &LeadOrder::CreatedDesc);
    assert_eq!(r.new_count, 1);
    assert_eq!(r.modified_count, 1);
    assert_eq!(r.modified_ids, vec!["1".to_string()]);

    let one = r.merged.iter().find(|l| l.id == "1").unwrap();
    let two = r.merged.iter().find(|l| l.id == "2").unwrap();
    assert!(one.flags.is_modified && !one.flags.is_new);
    assert!(two.flags.is_new && !two.flags.is_modified);
  }

  #[test]
  fn test_unchanged_keeps_same_reference() {
    let fp = Fingerprinter::default();
    let previous = arcs(vec![lead("1", "new"), lead("2", "won")]);
    let fetched = vec![lead("2", "won"), lead("1", "new")];

    let r = reconcile(&previous, fetched, &fp, &LeadOrder::CreatedDesc);
    assert!(!r.has_changes());
    for merged in &r.merged {
      let prev = previous.iter().find(|p| p.id == merged.id).unwrap();
      assert!(Arc::ptr_eq(prev, merged));
      assert!(!merged.flags.is_set());
    }
  }

  #[test]
  fn test_first_load_is_not_reported() {
    let fp = Fingerprinter::default();
    let r = reconcile(&[], vec![lead("1", "new"), lead("2", "new")], &fp, &LeadOrder::CreatedDesc);
    assert!(r.first_load);
    assert_eq!(r.new_count, 0);
    assert_eq!(r.merged.len(), 2);
    assert!(r.merged.iter().all(|l| !l.flags.is_set()));
  }

  #[test]
  fn test_missing_from_fetch_is_removed() {
    let fp = Fingerprinter::default();
    let previous = arcs(vec![lead("1", "new"), lead("2", "new")]);
    let r = reconcile(&previous, vec![lead("2", "new")], &fp, &LeadOrder::CreatedDesc);
    assert_eq!(r.removed_count, 1);
    assert_eq!(r.merged.len(), 1);
    assert_eq!(r.merged[0].id, "2");
  }

  #[test]
  fn test_empty_fetch_removes_everything() {
    let fp = Fingerprinter::default();
    let previous = arcs(vec![lead("1", "new")]);
    let r = reconcile(&previous, Vec::new(), &fp, &LeadOrder::CreatedDesc);
    assert!(r.merged.is_empty());
    assert_eq!(r.removed_count, 1);
  }

  #[test]
  fn test_bad_records_are_dropped_not_fatal() {
    let fp = Fingerprinter::default();
    let previous = arcs(vec![lead("1", "new")]);
    let fetched = vec![lead("", "new"), lead("1", "new"), lead("1", "lost"), lead("3", "new")];

    let r = reconcile(&previous, fetched, &fp, &LeadOrder::CreatedDesc);
    assert_eq!(r.dropped_count, 2);
    assert_eq!(r.merged.len(), 2);
    assert_eq!(r.new_count, 1);
    assert_eq!(r.modified_count, 0);
  }

  #[test]
  fn test_output_is_resorted() {
    let fp = Fingerprinter::default();
    let at = |d: u32| Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
    let mut a = lead("a", "new");
    a.created_at = at(1);
    let mut b = lead("b", "new");
    b.created_at = at(3);
    let mut c = lead("c", "new");
    c.created_at = at(2);

    let previous = arcs(vec![a.clone(), b.clone(), c.clone()]);
    let r = reconcile(&previous, vec![a.clone(), b.clone(), c.clone()], &fp, &LeadOrder::CreatedDesc);
    let ids: Vec<_> = r.merged.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "a"]);

    let by_id = LeadOrder::custom(|x, y| x.id.cmp(&y.id));
    let r = reconcile(&previous, vec![c, b, a], &fp, &by_id);
    let ids: Vec<_> = r.merged.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
  }
}
