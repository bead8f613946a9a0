//! One review run: collect, aggregate, write and narrate, deliver.

use crate::analysis::{aggregate, run_collectors};
use crate::collectors::Collector;
use crate::delivery::{DeliveryCoordinator, DeliveryResult};
use crate::error::{PipelineError, WriteError};
use crate::models::{Artifact, Narrative, Report};
use crate::narrative::NarrativeEngine;
use crate::report::writer;
use crate::source::QueryContext;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub account: String,
    pub lookback_days: i64,
    pub max_key_age_days: i64,
    /// Bounded wait for each collector.
    pub collector_wait: Duration,
    /// Directory receiving the durable artifact.
    pub output_dir: PathBuf,
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Arc<Report>,
    pub artifact: Artifact,
    pub artifact_path: PathBuf,
    pub narrative: Narrative,
    pub delivery: DeliveryResult,
}

impl RunOutcome {
    /// Process exit code: 2 when delivery failed, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.delivery.is_success() {
            0
        } else {
            2
        }
    }
}

pub struct Pipeline {
    collectors: Vec<Arc<dyn Collector>>,
    engine: NarrativeEngine,
    delivery: DeliveryCoordinator,
    settings: RunSettings,
    cancel_token: CancellationToken,
    active_run: Mutex<Option<CancellationToken>>,
}

impl Pipeline {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        engine: NarrativeEngine,
        delivery: DeliveryCoordinator,
        settings: RunSettings,
    ) -> Self {
        Self {
            collectors,
            engine,
            delivery,
            settings,
            cancel_token: CancellationToken::new(),
            active_run: Mutex::new(None),
        }
    }

    /// Use an externally owned shutdown token.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Shutdown token. Once cancelled, this and every later run skip the model.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancel the model call of the run in progress, if any.
    ///
    /// Each run derives its own child token, so later runs are unaffected.
    pub fn cancel_run(&self) {
        if let Ok(active) = self.active_run.lock() {
            if let Some(token) = active.as_ref() {
                info!("Cancelling the active run");
                token.cancel();
            }
        }
    }

    fn set_active_run(&self, token: Option<CancellationToken>) {
        if let Ok(mut active) = self.active_run.lock() {
            *active = token;
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one full run.
    ///
    /// Collection and generation failures are absorbed into the report and
    /// the narrative. Only aggregation and artifact write failures return an
    /// error; delivery failures are carried in the outcome.
    pub async fn run_once(&self) -> Result<RunOutcome, PipelineError> {
        let settings = &self.settings;
        let query = QueryContext::new(settings.account.as_str(), Utc::now(), settings.lookback_days)
            .with_max_key_age(settings.max_key_age_days);

        info!(
            "Running {} collectors for {} ({} to {})",
            self.collectors.len(),
            query.account,
            query.window_start.format("%Y-%m-%d"),
            query.window_end.format("%Y-%m-%d")
        );
        let outputs = run_collectors(&self.collectors, &query, settings.collector_wait).await;

        let report = Arc::new(aggregate(&settings.account, outputs, Utc::now())?);

        let write_task = {
            let report = Arc::clone(&report);
            let dir = settings.output_dir.clone();
            tokio::task::spawn_blocking(move || writer::write_to_dir(&report, &dir))
        };
        let run_token = self.cancel_token.child_token();
        self.set_active_run(Some(run_token.clone()));
        let narrative_task = self.engine.generate(Arc::clone(&report), &run_token);

        let (written, narrative) = tokio::join!(write_task, narrative_task);
        self.set_active_run(None);

        let (artifact, artifact_path) = written.map_err(|e| WriteError {
            name: writer::artifact_name(&report),
            cause: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })??;

        info!(
            "Narrative ready (origin: {}), delivering {}",
            narrative.origin(),
            artifact.name
        );
        let delivery = self.delivery.deliver(&artifact, &narrative).await;
        if !delivery.is_success() {
            warn!("Delivery finished with {} error(s)", delivery.errors.len());
        }

        Ok(RunOutcome {
            report,
            artifact,
            artifact_path,
            narrative,
            delivery,
        })
    }
}
