use std::fs;

use tracing::{error, info};

use crate::companion::{self, CompanionConfig};
use crate::conflict;
use crate::error::CaptureError;
use crate::outcome::{CaptureOutcome, outcome_for};
use crate::params::{CaptureRequest, ManagerConfig, Perspective};
use crate::shape::{self, RawDatasetShape};
use crate::share::{ShareConnection, ShareConnector};
use crate::strategy::{self, StrategyContext};

/// One capture invocation end to end: destination setup, conflict
/// resolution, share connection, shape discovery, strategy dispatch, and
/// outcome classification. No error crosses the public boundary; every
/// fault comes back as a classified [`CaptureOutcome`].
pub struct CaptureEngine<C: ShareConnector> {
    connector: C,
    config: ManagerConfig,
}

impl<C: ShareConnector> CaptureEngine<C> {
    pub fn new(connector: C, config: ManagerConfig) -> Self {
        Self { connector, config }
    }

    pub fn capture(&self, request: &CaptureRequest) -> CaptureOutcome {
        info!(
            dataset = %request.dataset,
            job = %request.job,
            class = %request.instrument_class,
            "capture started"
        );
        match self.run(request) {
            Ok(message) => {
                info!(dataset = %request.dataset, %message, "capture succeeded");
                CaptureOutcome::success(message)
            }
            Err(err) => {
                // Short machine-set message goes into the outcome; the full
                // fault detail belongs to the operator log.
                error!(
                    dataset = %request.dataset,
                    job = %request.job,
                    error = %err,
                    detail = ?err,
                    "capture failed"
                );
                outcome_for(&err)
            }
        }
    }

    fn run(&self, request: &CaptureRequest) -> Result<String, CaptureError> {
        let source_dir = request.source_dir();
        let dest_dir = request.dest_dir();

        let parent = dest_dir.parent().ok_or_else(|| {
            CaptureError::Filesystem(format!("destination {dest_dir} has no parent"))
        })?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CaptureError::Filesystem(format!("create {parent}: {err}")))?;

        let policy = request.instrument_class.policy();
        conflict::resolve_conflict(
            &dest_dir,
            self.config.conflict_policy,
            policy.resumable_copy,
            self.config.max_resume_files,
            self.config.max_resume_folders,
        )?;

        // Held for the rest of the invocation; dropping it disconnects on
        // every exit path, early returns included.
        let _connection = match request.perspective {
            Perspective::Client => Some(ShareConnection::open(
                &self.connector,
                request.connector,
                &self.config.username,
                &self.config.password,
                &request.share_path(),
            )?),
            Perspective::Server => None,
        };

        let mut descriptor = shape::resolve(
            &source_dir,
            request.source_entry_name(),
            request.instrument_class,
        )?;
        if descriptor.shape == RawDatasetShape::NotFound {
            return Err(CaptureError::DatasetNotFound(format!(
                "{} in {source_dir}",
                request.source_entry_name()
            )));
        }
        if !request.instrument_class.allows(descriptor.shape) {
            return Err(CaptureError::UnexpectedShape {
                shape: descriptor.shape.to_string(),
                class: request.instrument_class.to_string(),
            });
        }
        // The displayed name stays the canonical dataset name even when a
        // source-name override matched a differently named entry.
        descriptor.dataset = request.dataset.clone();

        let companion_config = CompanionConfig {
            search_root: self.config.companion_root.clone(),
            method_extension: self.config.method_extension.clone(),
            filter_by_timestamp: self.config.filter_method_timestamps,
        };
        let ctx = StrategyContext {
            dataset: &request.dataset,
            descriptor: &descriptor,
            source_dir: &source_dir,
            dest_dir: &dest_dir,
            class: request.instrument_class,
            sleep_secs: self.config.sleep_secs,
            companion: &companion_config,
        };
        let message = strategy::run(&ctx)?;

        if let Some(root) = &self.config.companion_root
            && companion::purge_due(&hostname())
        {
            companion::purge_stale_buckets(root);
        }

        Ok(message)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
