pub mod decision;

pub use decision::{Decision, FAULT_TITLE, Outcome, VIOLATION_TITLE};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Config, FaultPolicy};
use crate::error::{Error, Result};
use crate::scan::{ChangesetProvider, ContentProvider, Deadline, FileScanner};
use crate::settings::{RepositoryRef, SettingsResolver, SettingsStore};

/// One merge attempt as handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MergeContext {
    /// Destination repository.
    pub repository: RepositoryRef,
    /// Commit (or ref) whose content would land.
    pub changeset_ref: String,
    /// Merge base, used to list changed paths.
    #[serde(default)]
    pub base_ref: Option<String>,
}

impl MergeContext {
    pub fn new(repository: RepositoryRef, changeset_ref: impl Into<String>) -> Self {
        Self {
            repository,
            changeset_ref: changeset_ref.into(),
            base_ref: None,
        }
    }

    pub fn with_base(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = Some(base_ref.into());
        self
    }
}

/// Settings lookup, scanning and reporting for one merge attempt.
pub struct DecisionEngine {
    settings: SettingsResolver,
    scanner: FileScanner,
    content: Arc<dyn ContentProvider>,
    changes: Option<Arc<dyn ChangesetProvider>>,
    fault_policy: FaultPolicy,
    time_budget: Option<Duration>,
}

impl DecisionEngine {
    /// Engine with a fail-open policy and no time budget.
    pub fn new(
        settings: SettingsResolver,
        scanner: FileScanner,
        content: Arc<dyn ContentProvider>,
    ) -> Self {
        Self {
            settings,
            scanner,
            content,
            changes: None,
            fault_policy: FaultPolicy::Open,
            time_budget: None,
        }
    }

    /// Build the engine from configuration and the host's collaborators.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SettingsStore>,
        content: Arc<dyn ContentProvider>,
        changes: Option<Arc<dyn ChangesetProvider>>,
    ) -> Self {
        let settings = SettingsResolver::new(store, config.settings.default_enabled);
        let mut engine = Self::new(settings, FileScanner::from_config(config), content)
            .with_fault_policy(config.settings.fault_policy)
            .with_time_budget(Duration::from_millis(config.scan.time_budget_ms));
        engine.changes = changes;
        engine
    }

    pub fn with_changeset_provider(mut self, changes: Arc<dyn ChangesetProvider>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Run the pipeline, surfacing any fault.
    pub fn try_evaluate(&self, ctx: &MergeContext) -> Result<Decision> {
        let deadline = self.time_budget.map(Deadline::starting_now);
        let resolution = self.settings.resolve(&ctx.repository)?;
        if !resolution.enabled {
            let why = match resolution.source {
                Some(scope) => format!("debug scan disabled at {scope}"),
                None => "debug scan disabled by default".to_string(),
            };
            return Ok(Decision::accepted(why));
        }

        let paths = self.scanner.candidates(ctx, self.changes.as_deref())?;
        check(deadline)?;
        let result = self.scanner.scan(
            self.content.as_ref(),
            &ctx.repository,
            &ctx.changeset_ref,
            &paths,
            deadline,
        )?;
        log::debug!(
            "{}: scanned {} file(s), skipped {}, {} violation(s)",
            ctx.changeset_ref,
            result.files_scanned,
            result.files_skipped,
            result.violations.len()
        );
        check(deadline)?;

        if result.is_clean() {
            Ok(Decision::accepted(format!(
                "no debug settings in {} candidate file(s)",
                result.files_scanned
            )))
        } else {
            Ok(Decision::from_violations(&result.violations))
        }
    }

    /// Hook boundary: never fails and never unwinds.
    ///
    /// Errors and panics from the pipeline become the fault policy's decision.
    pub fn evaluate(&self, ctx: &MergeContext) -> Decision {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.try_evaluate(ctx)));
        let decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => self.fault_decision(&e),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".into());
                self.fault_decision(&Error::UnexpectedInternalFault(msg))
            }
        };
        crate::logging::log_decision(ctx, &decision);
        decision
    }

    /// The decision the fault policy prescribes for `err`.
    pub fn fault_decision(&self, err: &Error) -> Decision {
        log::warn!("debug check failed ({:?} policy): {err}", self.fault_policy);
        match self.fault_policy {
            FaultPolicy::Open => Decision::accepted(format!("check skipped: {err}")),
            FaultPolicy::Closed => Decision::rejected(
                FAULT_TITLE,
                format!("The debug configuration check could not complete: {err}"),
            ),
        }
    }
}

fn check(deadline: Option<Deadline>) -> Result<()> {
    deadline.map_or(Ok(()), |d| d.check())
}
