//! In-memory collaborators for unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::discovery::{ItemIdentifier, ItemSummary, ListingSnapshot};
use crate::error::{HarvestError, Result};
use crate::ingest::{InsertOutcome, Record, RecordFilter};
use crate::traits::{ControlKind, DetailFetcher, DurableStore, FlatExport, SurfaceDriver};

pub fn record(id: &str) -> Record {
    Record::new(ItemIdentifier::new(id), format!("title {id}"))
}

/// Listing that reveals `per_step` more items on each successful advance,
/// up to `grow_steps` advances.
pub struct ScriptedSurface {
    per_step: usize,
    grow_steps: u32,
    advances: u32,
    load_more: bool,
    next: bool,
    failing_clicks: bool,
    hanging_clicks: bool,
    failing_scrolls: bool,
    /// visible count after k advances; overrides `per_step` when non-empty
    schedule: Vec<usize>,
    end_after: Option<u32>,
    advertised: Option<usize>,
    cancel: Option<(u32, CancellationToken)>,
    end_checks: u32,
    actions: Vec<&'static str>,
}

impl ScriptedSurface {
    pub fn growing(per_step: usize, grow_steps: u32) -> Self {
        Self {
            per_step,
            grow_steps,
            advances: 0,
            load_more: false,
            next: false,
            failing_clicks: false,
            hanging_clicks: false,
            failing_scrolls: false,
            schedule: Vec::new(),
            end_after: None,
            advertised: None,
            cancel: None,
            end_checks: 0,
            actions: Vec::new(),
        }
    }

    /// Visible count after each advance; the last entry holds from then on
    pub fn scheduled(counts: &[usize]) -> Self {
        let mut surface = Self::growing(0, 0);
        surface.schedule = counts.to_vec();
        surface
    }

    pub fn with_load_more(mut self, present: bool) -> Self {
        self.load_more = present;
        self
    }

    pub fn with_next(mut self, present: bool) -> Self {
        self.next = present;
        self
    }

    pub fn with_failing_clicks(mut self, failing: bool) -> Self {
        self.failing_clicks = failing;
        self
    }

    /// Clicks never return
    pub fn with_hanging_clicks(mut self, hanging: bool) -> Self {
        self.hanging_clicks = hanging;
        self
    }

    pub fn with_failing_scrolls(mut self, failing: bool) -> Self {
        self.failing_scrolls = failing;
        self
    }

    /// End-of-results visible once `advances` reaches the given count
    pub fn with_end_signal_after(mut self, advances: u32) -> Self {
        self.end_after = Some(advances);
        self
    }

    pub fn with_advertised_total(mut self, total: usize) -> Self {
        self.advertised = Some(total);
        self
    }

    pub fn cancel_after(&mut self, advances: u32, token: CancellationToken) {
        self.cancel = Some((advances, token));
    }

    /// Items visible after `advances` successful advances
    pub fn visible_at(&self, advances: u32) -> usize {
        if let Some(last) = self.schedule.len().checked_sub(1) {
            return self.schedule[(advances as usize).min(last)];
        }
        self.per_step * (1 + advances.min(self.grow_steps) as usize)
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.actions.clone()
    }

    pub fn end_checks(&self) -> u32 {
        self.end_checks
    }

    fn advanced(&mut self) {
        self.advances += 1;
        if let Some((at, token)) = &self.cancel {
            if self.advances >= *at {
                token.cancel();
            }
        }
    }
}

#[async_trait]
impl SurfaceDriver for ScriptedSurface {
    async fn current_snapshot(&mut self) -> Result<ListingSnapshot> {
        let visible = self.visible_at(self.advances);
        Ok((0..visible)
            .map(|n| {
                let id = format!("item-{n}");
                let mut summary = ItemSummary::titled(id.clone());
                summary.fields.insert("rank".into(), n.to_string());
                (ItemIdentifier::new(id), summary)
            })
            .collect())
    }

    async fn has_load_more_control(&mut self) -> Result<bool> {
        Ok(self.load_more)
    }

    async fn has_next_control(&mut self) -> Result<bool> {
        Ok(self.next)
    }

    async fn activate_control(&mut self, kind: ControlKind) -> Result<()> {
        let (ok, failed) = match kind {
            ControlKind::LoadMore => ("load_more", "load_more_failed"),
            ControlKind::NextPage => ("next", "next_failed"),
        };
        if self.failing_clicks {
            self.actions.push(failed);
            return Err(HarvestError::JavaScript("element detached".into()));
        }
        if self.hanging_clicks {
            self.actions.push("click_hung");
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.actions.push(ok);
        self.advanced();
        Ok(())
    }

    async fn scroll_advance(&mut self) -> Result<()> {
        if self.failing_scrolls {
            self.actions.push("scroll_failed");
            return Err(HarvestError::JavaScript("scrollTo threw".into()));
        }
        self.actions.push("scroll");
        self.advanced();
        Ok(())
    }

    async fn has_end_of_results_signal(&mut self) -> Result<bool> {
        self.end_checks += 1;
        Ok(self.end_after.is_some_and(|n| self.advances >= n))
    }

    async fn advertised_total(&mut self) -> Result<Option<usize>> {
        Ok(self.advertised)
    }
}

/// Returns a record for every identifier except those listed as failing.
#[derive(Default)]
pub struct ScriptedFetcher {
    /// identifier -> attempts that fail before one succeeds; `u32::MAX` never succeeds
    failures: HashMap<String, u32>,
    attempts: HashMap<String, u32>,
}

impl ScriptedFetcher {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failures: ids.iter().map(|id| (id.to_string(), u32::MAX)).collect(),
            attempts: HashMap::new(),
        }
    }

    pub fn flaky(id: &str, failures: u32) -> Self {
        Self {
            failures: HashMap::from([(id.to_string(), failures)]),
            attempts: HashMap::new(),
        }
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DetailFetcher for ScriptedFetcher {
    async fn fetch(&mut self, identifier: &ItemIdentifier) -> Result<Record> {
        let attempts = self.attempts.entry(identifier.to_string()).or_default();
        *attempts += 1;
        match self.failures.get(identifier.as_str()) {
            Some(&fails) if *attempts <= fails => Err(HarvestError::fetch(identifier, "HTTP 500")),
            _ => Ok(record(identifier.as_str())),
        }
    }
}

#[derive(Default)]
struct MemoryStoreState {
    rows: BTreeMap<ItemIdentifier, Record>,
    failures_left: u32,
    hangs_left: u32,
    insert_calls: u32,
}

/// Uniqueness-enforcing store with injectable whole-batch failures.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` insert calls fail outright
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().failures_left = n;
    }

    /// The next `n` insert calls never return
    pub fn hang_next(&self, n: u32) {
        self.state.lock().unwrap().hangs_left = n;
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .rows
            .keys()
            .map(|id| id.to_string())
            .collect()
    }

    pub fn insert_calls(&self) -> u32 {
        self.state.lock().unwrap().insert_calls
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn provision(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_batch(&self, records: &[Record]) -> Result<InsertOutcome> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.insert_calls += 1;
            if state.hangs_left > 0 {
                state.hangs_left -= 1;
                true
            } else {
                false
            }
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(HarvestError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut outcome = InsertOutcome::default();
        for record in records {
            if state.rows.contains_key(&record.identifier) {
                outcome.duplicates += 1;
            } else {
                state.rows.insert(record.identifier.clone(), record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn upsert(&self, record: &Record) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .rows
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn find_by_keys(&self, filter: &RecordFilter, limit: u32) -> Result<Vec<Record>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .values()
            .filter(|r| filter.identifiers.is_empty() || filter.identifiers.contains(&r.identifier))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_all(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().rows.len() as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|_, r| r.fetched_at >= cutoff);
        Ok((before - state.rows.len()) as u64)
    }
}

/// Export that keeps appended records in memory.
#[derive(Clone, Default)]
pub struct MemoryExport {
    rows: Arc<Mutex<Vec<Record>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryExport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.identifier.to_string())
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl FlatExport for MemoryExport {
    async fn append(&mut self, records: &[Record]) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(HarvestError::FileIO(std::io::Error::other("disk full")));
        }
        self.rows.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}
