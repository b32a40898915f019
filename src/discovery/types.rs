//! Discovery data model

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable, crawl-wide key for one real-world item (usually a canonical URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemIdentifier(String);

impl ItemIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Minimal fields visible on a listing card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ItemSummary {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: BTreeMap::new(),
        }
    }
}

/// Items visible at one instant. Identifiers are unique.
#[derive(Debug, Clone, Default)]
pub struct ListingSnapshot {
    entries: Vec<(ItemIdentifier, ItemSummary)>,
}

impl ListingSnapshot {
    /// Later repeats of an identifier are dropped.
    pub fn new(entries: impl IntoIterator<Item = (ItemIdentifier, ItemSummary)>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|(id, _)| seen.insert(id.clone()))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ItemIdentifier, ItemSummary)> {
        self.entries.iter()
    }
}

impl FromIterator<(ItemIdentifier, ItemSummary)> for ListingSnapshot {
    fn from_iter<T: IntoIterator<Item = (ItemIdentifier, ItemSummary)>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Cumulative, insertion-ordered, append-only set of discovered items.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredSet {
    order: Vec<ItemIdentifier>,
    summaries: HashMap<ItemIdentifier, ItemSummary>,
}

impl DiscoveredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of identifiers not seen before.
    pub fn merge(&mut self, snapshot: &ListingSnapshot) -> usize {
        let before = self.order.len();
        for (id, summary) in snapshot.iter() {
            if !self.summaries.contains_key(id) {
                self.order.push(id.clone());
                self.summaries.insert(id.clone(), summary.clone());
            }
        }
        self.order.len() - before
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &ItemIdentifier) -> bool {
        self.summaries.contains_key(id)
    }

    pub fn summary(&self, id: &ItemIdentifier) -> Option<&ItemSummary> {
        self.summaries.get(id)
    }

    /// Identifiers in discovery order
    pub fn identifiers(&self) -> impl Iterator<Item = &ItemIdentifier> {
        self.order.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Loading,
    Advancing,
    Checking,
    Draining,
    Done,
    Aborted,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// Surface signalled there is nothing more
    EndOfResults,
    /// Drain grace used up without growth
    DrainCeiling,
    /// Hard iteration cap hit; items are partial
    Exhausted,
    /// Stop signal honored; items are partial
    Cancelled,
}

impl Termination {
    pub fn is_complete(&self) -> bool {
        matches!(self, Termination::EndOfResults | Termination::DrainCeiling)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub items: DiscoveredSet,
    pub termination: Termination,
    pub iterations: u32,
    pub elapsed: Duration,
}

/// Periodic observability event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub discovered: usize,
    pub iteration: u32,
    pub elapsed: Duration,
    /// Estimated time to completion, when a total is known
    pub eta: Option<Duration>,
}
