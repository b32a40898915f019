//! Discovery loop state machine

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{ProgressTracker, TracingProgress};
use super::types::{DiscoveredSet, DiscoveryOutcome, DiscoveryState, ListingSnapshot, Termination};
use crate::config::DiscoveryConfig;
use crate::error::{HarvestError, Result};
use crate::traits::{ControlKind, ProgressSink, SurfaceDriver};

/// How the surface was advanced in one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Control(ControlKind),
    Scroll,
}

/// Drives a listing until every item has been seen.
///
/// Owns the [`DiscoveredSet`] for the duration of one run.
pub struct DiscoveryLoop {
    config: DiscoveryConfig,
    progress: Arc<dyn ProgressSink>,
    state: DiscoveryState,
}

impl DiscoveryLoop {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            progress: Arc::new(TracingProgress),
            state: DiscoveryState::Loading,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Run to completion.
    ///
    /// Only an empty listing is an error ([`HarvestError::NoInitialContent`]);
    /// the hard iteration cap and cancellation return what was accumulated.
    pub async fn run<D>(&mut self, driver: &mut D, cancel: &CancellationToken) -> Result<DiscoveryOutcome>
    where
        D: SurfaceDriver + ?Sized,
    {
        let started = Instant::now();
        let mut items = DiscoveredSet::new();

        self.state = DiscoveryState::Loading;
        let Some(first) = self.wait_for_initial(driver, cancel).await? else {
            info!("Discovery cancelled while loading");
            self.state = DiscoveryState::Aborted;
            return Ok(outcome(items, Termination::Cancelled, 0, started));
        };
        items.merge(&first);
        info!("Listing loaded with {} initial items", items.len());

        let total = match self.config.expected_total {
            Some(total) => Some(total),
            None => bounded(self.config.action_timeout, "total lookup", driver.advertised_total())
                .await
                .unwrap_or_else(|e| {
                    debug!("Advertised total unavailable: {}", e);
                    None
                }),
        };

        let threshold = self.config.stagnation_threshold.max(1);
        let ceiling = threshold + self.config.drain_checks;
        let mut tracker = ProgressTracker::new(
            self.config.progress_every_items,
            self.config.progress_every_iterations,
        );
        let mut stagnation: u32 = 0;
        let mut scroll_failures: u32 = 0;
        let mut force_scroll = false;
        let mut iteration: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                info!(
                    "Discovery cancelled at iteration {} with {} items",
                    iteration,
                    items.len()
                );
                self.state = DiscoveryState::Aborted;
                return Ok(outcome(items, Termination::Cancelled, iteration, started));
            }

            if iteration >= self.config.max_iterations {
                warn!(
                    "Discovery exhausted after {} iterations, returning {} items",
                    iteration,
                    items.len()
                );
                self.state = DiscoveryState::Aborted;
                return Ok(outcome(items, Termination::Exhausted, iteration, started));
            }
            iteration += 1;

            self.state = DiscoveryState::Advancing;
            let (how, attempt) = self.advance(driver, force_scroll).await;
            force_scroll = false;
            let missed = match (how, attempt) {
                (_, Ok(())) => {
                    debug!("Iteration {}: advanced via {:?}", iteration, how);
                    if how == Advance::Scroll {
                        scroll_failures = 0;
                    }
                    false
                }
                (Advance::Control(_), Err(e)) => {
                    warn!("Iteration {}: {}", iteration, e);
                    force_scroll = true;
                    true
                }
                (Advance::Scroll, Err(e)) => {
                    scroll_failures += 1;
                    warn!(
                        "Iteration {}: {} ({} consecutive scroll failures)",
                        iteration, e, scroll_failures
                    );
                    scroll_failures <= self.config.scroll_retries
                }
            };
            sleep(self.config.settle_delay).await;

            self.state = DiscoveryState::Checking;
            let added = match bounded(self.config.action_timeout, "snapshot", driver.current_snapshot()).await {
                Ok(snapshot) => items.merge(&snapshot),
                Err(e) => {
                    warn!("Iteration {}: snapshot failed: {}", iteration, e);
                    force_scroll = true;
                    continue;
                }
            };

            if let Some(event) = tracker.observe(items.len(), iteration, started.elapsed(), total) {
                self.progress.emit(&event);
            }

            if added > 0 {
                debug!(
                    "Iteration {}: +{} items ({} total)",
                    iteration,
                    added,
                    items.len()
                );
                stagnation = 0;
                scroll_failures = 0;
                continue;
            }

            if missed {
                // a failed action says nothing about whether the listing is exhausted
                continue;
            }

            stagnation += 1;
            debug!("Iteration {}: no growth (stagnation {})", iteration, stagnation);
            if stagnation < threshold {
                continue;
            }

            self.state = DiscoveryState::Draining;
            let end = bounded(
                self.config.action_timeout,
                "end-of-results check",
                driver.has_end_of_results_signal(),
            )
            .await
            .unwrap_or_else(|e| {
                debug!("End-of-results check failed: {}", e);
                false
            });

            if end {
                info!(
                    "End of results after {} iterations: {} items",
                    iteration,
                    items.len()
                );
                self.state = DiscoveryState::Done;
                return Ok(outcome(items, Termination::EndOfResults, iteration, started));
            }

            if stagnation >= ceiling {
                info!(
                    "No growth for {} iterations, finishing with {} items",
                    stagnation,
                    items.len()
                );
                self.state = DiscoveryState::Done;
                return Ok(outcome(items, Termination::DrainCeiling, iteration, started));
            }

            debug!(
                "Draining ({}/{}): no end signal yet",
                stagnation - threshold,
                self.config.drain_checks
            );
        }
    }

    /// Polls until the listing shows at least one item.
    ///
    /// `Ok(None)` means the stop signal arrived first.
    async fn wait_for_initial<D>(
        &self,
        driver: &mut D,
        cancel: &CancellationToken,
    ) -> Result<Option<ListingSnapshot>>
    where
        D: SurfaceDriver + ?Sized,
    {
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            match bounded(self.config.action_timeout, "initial snapshot", driver.current_snapshot()).await {
                Ok(snapshot) if !snapshot.is_empty() => return Ok(Some(snapshot)),
                Ok(_) => debug!("Listing still empty after {:?}", start.elapsed()),
                Err(e) => debug!("Initial snapshot failed: {}", e),
            }

            if start.elapsed() >= self.config.initial_wait {
                self.report_no_content(start.elapsed());
                return Err(HarvestError::NoInitialContent {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }

            sleep(self.config.poll_interval).await;
        }
    }

    fn report_no_content(&self, waited: Duration) {
        warn!("Listing produced no items within {:?}", waited);
    }

    /// Load more, then next page, then scroll.
    ///
    /// Returns the action attempted alongside its result.
    async fn advance<D>(&self, driver: &mut D, force_scroll: bool) -> (Advance, Result<()>)
    where
        D: SurfaceDriver + ?Sized,
    {
        let timeout = self.config.action_timeout;

        if !force_scroll {
            let control = if probe(timeout, "load-more probe", driver.has_load_more_control()).await {
                Some(ControlKind::LoadMore)
            } else if probe(timeout, "next probe", driver.has_next_control()).await {
                Some(ControlKind::NextPage)
            } else {
                None
            };

            if let Some(kind) = control {
                let result = bounded(timeout, "control activation", driver.activate_control(kind))
                    .await
                    .map_err(|e| HarvestError::SurfaceActionMiss(format!("{kind:?}: {e}")));
                return (Advance::Control(kind), result);
            }
        }

        let result = bounded(timeout, "scroll", driver.scroll_advance())
            .await
            .map_err(|e| HarvestError::SurfaceActionMiss(format!("scroll: {e}")));
        (Advance::Scroll, result)
    }
}

fn outcome(
    items: DiscoveredSet,
    termination: Termination,
    iterations: u32,
    started: Instant,
) -> DiscoveryOutcome {
    DiscoveryOutcome {
        items,
        termination,
        iterations,
        elapsed: started.elapsed(),
    }
}

async fn bounded<T>(timeout: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarvestError::Timeout(format!("{what} after {timeout:?}"))),
    }
}

async fn probe(timeout: Duration, what: &str, fut: impl Future<Output = Result<bool>>) -> bool {
    bounded(timeout, what, fut).await.unwrap_or_else(|e| {
        debug!("{} failed: {}", what, e);
        false
    })
}
