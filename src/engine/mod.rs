//! Correlation engine: windows signals spatially and temporally, scores
//! candidate clusters, and assigns each signal to the cluster it most
//! plausibly belongs to.

pub mod cluster;
pub mod scoring;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::cluster::{Cluster, ClusterId};
use crate::engine::scoring::{confidence_multiplier, raw_pair_score, ScoreParams};
use crate::fusion::{self, FusedEvent};
use crate::signal::Signal;
use crate::utils::error::Result;
use crate::utils::geo::{x_search_radius, GridCell};

/// Number of lock stripes serializing writers per grid cell.
const CELL_LOCK_STRIPES: usize = 64;

/// Outcome of one ingest call.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Identical signal already processed; nothing changed.
    Duplicate,
    /// Signal joined or opened a cluster still below the fusion floor.
    Pending { cluster_id: ClusterId },
    /// The cluster crossed the fusion floor; its event was built/updated.
    Fused(FusedEvent),
}

impl IngestOutcome {
    pub fn event(&self) -> Option<&FusedEvent> {
        match self {
            IngestOutcome::Fused(event) => Some(event),
            IngestOutcome::Duplicate | IngestOutcome::Pending { .. } => None,
        }
    }
}

/// Counters for operational logging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineReport {
    pub signals_ingested: u64,
    pub duplicates: u64,
    pub clusters_opened: u64,
    pub clusters_closed: u64,
    pub events_fused: u64,
}

#[derive(Default)]
struct EngineState {
    /// Open cluster ids resident in each grid cell.
    cells: HashMap<GridCell, Vec<ClusterId>>,
    clusters: HashMap<ClusterId, Cluster>,
    /// Identities of accepted signals keyed to their observed time, for
    /// idempotent ingest. Evicted by `sweep_expired` once a replay
    /// could no longer land inside any live cluster's window.
    seen: HashMap<String, DateTime<Utc>>,
    newest_observed: Option<DateTime<Utc>>,
}

/// The engine instance owns its cluster index and configuration; there
/// are no process-wide globals. Construct one per deployment and share
/// it behind an `Arc`.
pub struct CorrelationEngine {
    cfg: EngineConfig,
    params: ScoreParams,
    state: RwLock<EngineState>,
    /// Striped per-cell writer locks: two concurrent ingests landing in
    /// the same cell serialize here, cross-cell reads stay concurrent.
    cell_locks: Vec<Mutex<()>>,
    next_cluster_id: AtomicU64,
    signals_ingested: AtomicU64,
    duplicates: AtomicU64,
    clusters_opened: AtomicU64,
    clusters_closed: AtomicU64,
    events_fused: AtomicU64,
}

impl CorrelationEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        let params = ScoreParams::from(&cfg);
        Self {
            cfg,
            params,
            state: RwLock::new(EngineState::default()),
            cell_locks: (0..CELL_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            next_cluster_id: AtomicU64::new(1),
            signals_ingested: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            clusters_opened: AtomicU64::new(0),
            clusters_closed: AtomicU64::new(0),
            events_fused: AtomicU64::new(0),
        }
    }

    fn cell_lock(&self, cell: GridCell) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        cell.hash(&mut hasher);
        &self.cell_locks[hasher.finish() as usize % CELL_LOCK_STRIPES]
    }

    /// Ingest one normalized signal.
    ///
    /// Candidate discovery runs under a read lock; the assignment is
    /// applied under the write lock after revalidation, so two
    /// concurrent ingests can never both win the same slot
    /// inconsistently.
    pub fn ingest(&self, signal: Signal) -> Result<IngestOutcome> {
        let identity = signal.identity();
        let home_cell = GridCell::containing(signal.location, self.cfg.spatial_threshold_km);
        let _cell_guard = self.cell_lock(home_cell).lock().expect("cell lock poisoned");

        // Discovery phase: score candidates in the neighboring cells.
        // The column radius widens with latitude so the searched window
        // always covers the spatial threshold in ground distance.
        let x_radius = x_search_radius(signal.location.lat, self.cfg.spatial_threshold_km);
        let (best, expired) = {
            let state = self.state.read().expect("engine state poisoned");
            if state.seen.contains_key(&identity) {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                return Ok(IngestOutcome::Duplicate);
            }

            let window = Duration::seconds((self.cfg.temporal_window_hours * 3600.0) as i64);
            let mut best: Option<(f64, DateTime<Utc>, ClusterId)> = None;
            let mut expired = Vec::new();

            for cell in home_cell.neighborhood(self.cfg.spatial_threshold_km, x_radius) {
                let Some(ids) = state.cells.get(&cell) else { continue };
                for &id in ids {
                    let Some(cluster) = state.clusters.get(&id) else { continue };
                    if cluster.closed {
                        continue;
                    }
                    // Window cutoff is against observed_at, not receipt time.
                    if signal.observed_at - cluster.envelope_start > window {
                        expired.push(id);
                        continue;
                    }
                    let score = self.candidate_score(&signal, cluster);
                    if score < self.cfg.min_correlation_score {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some((bs, bt, bid)) => {
                            score > *bs
                                // Ties go to the oldest cluster, for stability.
                                || (score == *bs && (cluster.opened_at, cluster.id) < (*bt, *bid))
                        }
                    };
                    if better {
                        best = Some((score, cluster.opened_at, id));
                    }
                }
            }
            (best, expired)
        };

        // Apply phase.
        let mut state = self.state.write().expect("engine state poisoned");
        if state.seen.insert(identity, signal.observed_at).is_some() {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(IngestOutcome::Duplicate);
        }
        if state.newest_observed.map_or(true, |t| signal.observed_at > t) {
            state.newest_observed = Some(signal.observed_at);
        }
        self.signals_ingested.fetch_add(1, Ordering::Relaxed);

        for id in expired {
            self.close_cluster(&mut state, id);
        }

        // Revalidate the chosen candidate under the write lock; it may
        // have been closed or drifted below threshold since discovery.
        let target = best.and_then(|(_, _, id)| {
            let cluster = state.clusters.get(&id)?;
            if cluster.closed || self.candidate_score(&signal, cluster) < self.cfg.min_correlation_score
            {
                None
            } else {
                Some(id)
            }
        });

        match target {
            Some(id) => Ok(self.join_cluster(&mut state, id, signal)),
            None => {
                let id = self.open_cluster(&mut state, signal);
                Ok(IngestOutcome::Pending { cluster_id: id })
            }
        }
    }

    fn candidate_score(&self, signal: &Signal, cluster: &Cluster) -> f64 {
        let raw = raw_pair_score(signal, &cluster.centroid_signal(), &self.params);
        raw * confidence_multiplier(signal.confidence)
    }

    fn join_cluster(&self, state: &mut EngineState, id: ClusterId, signal: Signal) -> IngestOutcome {
        let old_cell;
        let new_cell;
        {
            let cluster = state.clusters.get_mut(&id).expect("validated above");
            old_cell = GridCell::containing(cluster.centroid, self.cfg.spatial_threshold_km);
            cluster.add(signal, &self.params);
            new_cell = GridCell::containing(cluster.centroid, self.cfg.spatial_threshold_km);
        }
        if new_cell != old_cell {
            self.reindex(state, id, old_cell, new_cell);
        }

        let cluster = state.clusters.get_mut(&id).expect("validated above");
        debug!(
            "signal joined cluster {} ({} members, aggregate {:.3})",
            id,
            cluster.members.len(),
            cluster.aggregate_score
        );

        let outcome = if cluster.aggregate_score >= 0.4 {
            let mut event = fusion::materialize(cluster);
            match &cluster.fused_id {
                // event_id is pinned at first materialization.
                Some(id) => event.event_id = id.clone(),
                None => {
                    cluster.fused_id = Some(event.event_id.clone());
                    self.events_fused.fetch_add(1, Ordering::Relaxed);
                }
            }
            IngestOutcome::Fused(event)
        } else {
            IngestOutcome::Pending { cluster_id: id }
        };

        if cluster.members.len() >= self.cfg.max_cluster_members {
            warn!("cluster {} hit member cap, force-closing", id);
            self.close_cluster(state, id);
        }
        outcome
    }

    fn open_cluster(&self, state: &mut EngineState, seed: Signal) -> ClusterId {
        let id = self.next_cluster_id.fetch_add(1, Ordering::Relaxed);
        let cell = GridCell::containing(seed.location, self.cfg.spatial_threshold_km);
        let cluster = Cluster::new(id, seed, Utc::now());
        state.clusters.insert(id, cluster);
        state.cells.entry(cell).or_default().push(id);
        self.clusters_opened.fetch_add(1, Ordering::Relaxed);
        debug!("opened singleton cluster {}", id);
        id
    }

    fn close_cluster(&self, state: &mut EngineState, id: ClusterId) {
        let Some(cluster) = state.clusters.get_mut(&id) else { return };
        if cluster.closed {
            return;
        }
        cluster.closed = true;
        let cell = GridCell::containing(cluster.centroid, self.cfg.spatial_threshold_km);
        if let Some(ids) = state.cells.get_mut(&cell) {
            ids.retain(|&other| other != id);
        }
        self.clusters_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn reindex(&self, state: &mut EngineState, id: ClusterId, from: GridCell, to: GridCell) {
        if let Some(ids) = state.cells.get_mut(&from) {
            ids.retain(|&other| other != id);
        }
        state.cells.entry(to).or_default().push(id);
    }

    /// Force-close clusters whose wall-clock age exceeds the cap,
    /// independent of ingest traffic. Returns the number closed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let max_age = Duration::seconds((self.cfg.max_cluster_age_hours * 3600.0) as i64);
        let mut state = self.state.write().expect("engine state poisoned");
        let stale: Vec<ClusterId> = state
            .clusters
            .values()
            .filter(|c| !c.closed && now - c.opened_at > max_age)
            .map(|c| c.id)
            .collect();
        let count = stale.len();
        for id in stale {
            self.close_cluster(&mut state, id);
        }
        // Closed clusters are dropped entirely once swept. Identities
        // are kept only while a replay could still land inside the
        // correlation window of a cluster that has not aged out; older
        // ones are evicted so `seen` stays bounded.
        state.clusters.retain(|_, c| !c.closed);
        if let Some(newest) = state.newest_observed {
            let window = Duration::seconds((self.cfg.temporal_window_hours * 3600.0) as i64);
            let horizon = newest - window - max_age;
            state.seen.retain(|_, observed| *observed >= horizon);
        }
        count
    }

    /// Number of identities currently held for duplicate detection.
    pub fn tracked_identities(&self) -> usize {
        let state = self.state.read().expect("engine state poisoned");
        state.seen.len()
    }

    /// Number of open clusters, for tests and reporting.
    pub fn open_clusters(&self) -> usize {
        let state = self.state.read().expect("engine state poisoned");
        state.clusters.values().filter(|c| !c.closed).count()
    }

    /// Membership size of one cluster, if it still exists.
    pub fn cluster_size(&self, id: ClusterId) -> Option<usize> {
        let state = self.state.read().expect("engine state poisoned");
        state.clusters.get(&id).map(|c| c.members.len())
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            signals_ingested: self.signals_ingested.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            clusters_opened: self.clusters_opened.load(Ordering::Relaxed),
            clusters_closed: self.clusters_closed.load(Ordering::Relaxed),
            events_fused: self.events_fused.load(Ordering::Relaxed),
        }
    }
}
