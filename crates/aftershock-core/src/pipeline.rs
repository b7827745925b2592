//! The per-event ingestion saga and the poll cycle that drives it.
//!
//! For each candidate the saga runs, under the event's lock:
//!
//! 1. classify against the last ledger entry;
//! 2. for an unchanged event, append the ledger entry and stop;
//! 3. download the hazard archive;
//! 4. for an updated event, archive the previous artifacts;
//! 5. write `epicenter.json`, extract the archive, decode the layers and
//!    record the event metadata;
//! 6. insert the hazard cells, optionally purging older versions;
//! 7. aggregate, persist and export exposure per granularity;
//! 8. append the ledger entry.
//!
//! The ledger write is last. Any failure before it leaves the ledger as
//! it was, so the next poll classifies the event the same way and the
//! saga resumes from the start.
//!
//! `epicenter.json` is written before extraction and names the version
//! the loose files belong to. A retry of an update that failed after
//! archival finds its own version there and does not archive again.

use std::fs;
use std::path::{Path, PathBuf};

use aftershock_db::GeometryStore;
use aftershock_feed::{
    Candidate, FeedError, FeedPoller, LayerLoad, extract_archive, read_hazard_layers,
};
use aftershock_types::{
    Event, EventId, EventVersion, InsertSummary, RunId, StatusLogEntry, Transition,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::Instrument;

use crate::archive::{ArchiveManager, ArchiveOutcome, CollisionPolicy};
use crate::config::AftershockConfig;
use crate::error::PipelineError;
use crate::exposure::{ExposureAggregator, ExposureRun, MergeStrategy};
use crate::locks::EventLocks;
use crate::versioning::decide;

/// Event metadata file written beside the extracted layers.
pub const EPICENTER_FILE: &str = "epicenter.json";

// ---------------------------------------------------------------------------
// Settings and results
// ---------------------------------------------------------------------------

/// Pipeline settings, extracted from [`AftershockConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Root of the per-event directories.
    pub data_dir: PathBuf,
    /// Granularities exposure is computed for.
    pub granularities: Vec<String>,
    /// How hazard layers are joined per unit.
    pub merge_strategy: MergeStrategy,
    /// Archive label collision handling.
    pub collision_policy: CollisionPolicy,
    /// Delete cells of older versions after ingestion.
    pub purge_superseded_cells: bool,
    /// Events processed concurrently.
    pub max_concurrent_events: usize,
}

impl PipelineSettings {
    /// Settings from a loaded configuration.
    pub fn from_config(config: &AftershockConfig) -> Self {
        Self {
            data_dir: config.storage.data_dir.clone(),
            granularities: config.exposure.granularities.clone(),
            merge_strategy: config.exposure.merge_strategy,
            collision_policy: config.archive.collision_policy,
            purge_superseded_cells: config.exposure.purge_superseded_cells,
            max_concurrent_events: config.pipeline.max_concurrent_events,
        }
    }

    /// Default settings rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::from_config(&AftershockConfig::default())
        }
    }

    /// Directory holding the artifacts of one event.
    pub fn event_dir(&self, event_id: &EventId) -> PathBuf {
        self.data_dir.join(event_id.as_str())
    }
}

/// What the saga did for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    /// Event evaluated.
    pub event_id: EventId,
    /// Transition taken and written to the ledger.
    pub transition: Transition,
    /// Hazard cells written and found already present.
    pub cells: InsertSummary,
    /// Hazard records skipped while decoding.
    pub skipped_cells: usize,
    /// Archival of the previous version, for updated events.
    pub archive: Option<ArchiveOutcome>,
    /// One entry per granularity.
    pub exposures: Vec<ExposureRun>,
}

impl EventOutcome {
    fn unchanged(event_id: EventId) -> Self {
        Self {
            event_id,
            transition: Transition::Unchanged,
            cells: InsertSummary::default(),
            skipped_cells: 0,
            archive: None,
            exposures: Vec::new(),
        }
    }
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Poll run the ledger entries were written under.
    pub run_id: RunId,
    /// Candidates that reached the pipeline, including failures.
    pub evaluated: usize,
    /// Events ingested for the first time.
    pub new: usize,
    /// Events ingested as a new version.
    pub updated: usize,
    /// Events whose version was already recorded.
    pub unchanged: usize,
    /// Events that failed and left the ledger untouched.
    pub failed: usize,
}

impl PollSummary {
    const fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            evaluated: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
        }
    }

    const fn record(&mut self, result: &Result<EventOutcome, PipelineError>) {
        self.evaluated = self.evaluated.saturating_add(1);
        let slot = match result {
            Ok(outcome) => match outcome.transition {
                Transition::New => &mut self.new,
                Transition::Updated => &mut self.updated,
                Transition::Unchanged => &mut self.unchanged,
            },
            Err(_) => &mut self.failed,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Filesystem results of the blocking staging step.
struct Staged {
    archive: Option<ArchiveOutcome>,
    layers: Vec<LayerLoad>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives candidates from the feed through the ingestion saga.
#[derive(Debug, Clone)]
pub struct Pipeline {
    poller: FeedPoller,
    store: GeometryStore,
    aggregator: ExposureAggregator,
    archiver: ArchiveManager,
    settings: PipelineSettings,
    locks: EventLocks,
}

impl Pipeline {
    /// Assemble a pipeline.
    pub fn new(poller: FeedPoller, store: GeometryStore, settings: PipelineSettings) -> Self {
        Self {
            aggregator: ExposureAggregator::new(store.clone(), settings.merge_strategy),
            archiver: ArchiveManager::new(settings.collision_policy),
            poller,
            store,
            settings,
            locks: EventLocks::new(),
        }
    }

    /// The store the pipeline writes to.
    pub const fn store(&self) -> &GeometryStore {
        &self.store
    }

    /// The pipeline settings.
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Poll the feed once and process every candidate.
    ///
    /// A failing event is logged and counted; it never stops the others.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Feed`] if the summary feed cannot be
    /// fetched or decoded.
    pub async fn run_once(&self) -> Result<PollSummary, PipelineError> {
        let run_id = RunId::new();
        let span = tracing::info_span!("poll", run_id = %run_id);
        self.poll(run_id).instrument(span).await
    }

    async fn poll(&self, run_id: RunId) -> Result<PollSummary, PipelineError> {
        let candidates = self.poller.poll().await?;
        let results: Vec<Result<EventOutcome, PipelineError>> = candidates
            .map(|item| self.evaluate(item, run_id))
            .buffer_unordered(self.settings.max_concurrent_events.max(1))
            .collect()
            .await;

        let mut summary = PollSummary::new(run_id);
        for result in &results {
            summary.record(result);
        }
        self.locks.prune().await;

        tracing::info!(
            evaluated = summary.evaluated,
            new = summary.new,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "Poll complete"
        );
        Ok(summary)
    }

    async fn evaluate(
        &self,
        item: Result<Candidate, FeedError>,
        run_id: RunId,
    ) -> Result<EventOutcome, PipelineError> {
        let candidate = match item {
            Ok(candidate) => candidate,
            Err(e) => {
                let e = PipelineError::from(e);
                tracing::warn!(class = e.class().as_str(), error = %e, "Event skipped");
                return Err(e);
            }
        };

        let event_id = candidate.event.id.clone();
        self.process(candidate, run_id).await.inspect_err(|e| {
            tracing::warn!(
                event_id = %event_id,
                class = e.class().as_str(),
                error = %e,
                "Event failed, ledger untouched"
            );
        })
    }

    /// Run the saga for one candidate.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any step fails. The ledger is not
    /// written in that case.
    pub async fn process(
        &self,
        candidate: Candidate,
        run_id: RunId,
    ) -> Result<EventOutcome, PipelineError> {
        let Candidate { event, product } = candidate;
        let _guard = self.locks.acquire(&event.id).await;

        let last = self.store.last_status(&event.id).await?;
        let decision = decide(&event, last.as_ref());
        let transition = decision.transition;

        if !transition.requires_ingestion() {
            self.store
                .append_status(&StatusLogEntry::observed(&event, transition, run_id))
                .await?;
            tracing::info!(event_id = %event.id, transition = %transition, "Event evaluated");
            return Ok(EventOutcome::unchanged(event.id));
        }

        let bytes = self
            .poller
            .fetcher()
            .fetch_bytes(&product.shape_zip_url)
            .await?;

        let event_dir = self.settings.event_dir(&event.id);
        let superseded = decision.superseded().map(|previous| previous.updated);
        let staged = {
            let event = event.clone();
            let event_dir = event_dir.clone();
            let archiver = self.archiver;
            tokio::task::spawn_blocking(move || {
                stage(&event, &bytes, &event_dir, superseded, archiver)
            })
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??
        };

        self.store.record_event(&event).await?;

        let skipped_cells = staged.layers.iter().map(|layer| layer.skipped).sum::<usize>();
        let cells: Vec<_> = staged
            .layers
            .into_iter()
            .flat_map(|layer| layer.cells)
            .collect();
        let inserted = self.store.insert_hazard_cells(&cells).await?;
        if skipped_cells > 0 {
            tracing::warn!(event_id = %event.id, skipped = skipped_cells, "Hazard records skipped");
        }

        if self.settings.purge_superseded_cells {
            let purged = self
                .store
                .purge_superseded_cells(&event.id, event.updated)
                .await?;
            tracing::debug!(event_id = %event.id, purged, "Superseded cells purged");
        }

        let mut exposures = Vec::with_capacity(self.settings.granularities.len());
        for granularity in &self.settings.granularities {
            exposures.push(
                self.aggregator
                    .run(&event.id, event.updated, granularity, &event_dir)
                    .await?,
            );
        }

        self.store
            .append_status(&StatusLogEntry::observed(&event, transition, run_id))
            .await?;

        tracing::info!(
            event_id = %event.id,
            transition = %transition,
            magnitude = event.magnitude,
            cells = inserted.inserted,
            duplicates = inserted.duplicates,
            "Event ingested"
        );

        Ok(EventOutcome {
            event_id: event.id,
            transition,
            cells: inserted,
            skipped_cells,
            archive: staged.archive,
            exposures,
        })
    }
}

// ---------------------------------------------------------------------------
// Blocking filesystem steps
// ---------------------------------------------------------------------------

/// Archive previous artifacts, extract the new archive and decode it.
fn stage(
    event: &Event,
    bytes: &[u8],
    event_dir: &Path,
    superseded: Option<DateTime<Utc>>,
    archiver: ArchiveManager,
) -> Result<Staged, PipelineError> {
    let archive = match superseded {
        Some(_) if staged_version(event_dir).as_ref() == Some(&event.version()) => {
            tracing::debug!(event_id = %event.id, "Loose files already belong to this version");
            None
        }
        Some(previous) => Some(archiver.preserve(event_dir, previous)?),
        None => None,
    };
    if let Some(outcome) = &archive {
        tracing::info!(event_id = %event.id, outcome = ?outcome, "Previous version preserved");
    }

    if let Err(source) = fs::create_dir_all(event_dir) {
        return Err(PipelineError::Io {
            path: event_dir.to_path_buf(),
            source,
        });
    }
    write_epicenter(event_dir, event)?;
    extract_archive(bytes, event_dir)?;
    let layers = read_hazard_layers(event_dir, &event.id, event.updated)?;
    for layer in &layers {
        tracing::debug!(
            event_id = %event.id,
            dataset = %layer.dataset,
            cells = layer.cells.len(),
            skipped = layer.skipped,
            "Layer decoded"
        );
    }
    Ok(Staged { archive, layers })
}

/// Version named by the loose `epicenter.json`, if it can be read.
fn staged_version(event_dir: &Path) -> Option<EventVersion> {
    let bytes = fs::read(event_dir.join(EPICENTER_FILE)).ok()?;
    serde_json::from_slice::<Event>(&bytes)
        .ok()
        .map(|event| event.version())
}

/// Write the event record next to its layers.
fn write_epicenter(event_dir: &Path, event: &Event) -> Result<(), PipelineError> {
    let path = event_dir.join(EPICENTER_FILE);
    let json = serde_json::to_vec_pretty(event)?;
    if let Err(source) = fs::write(&path, json) {
        return Err(PipelineError::Io { path, source });
    }
    Ok(())
}
