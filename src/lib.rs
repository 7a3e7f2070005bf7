//! debug-gate: a merge check that blocks integrations shipping debug-enabled configuration.
//!
//! On each merge attempt the gate resolves whether scanning is switched on for
//! the destination repository (repository → project → global, falling back to a
//! configured default), reads a set of candidate configuration files at the
//! incoming changeset, and rejects the merge if any line matches a
//! debug-indicator pattern such as `debug="true"` or `DEBUG = True`.
//!
//! # Architecture
//!
//! - **[`patterns`]**: Pattern compilation and first-match line evaluation.
//! - **[`settings`]**: Scope chain resolution and the scope-keyed settings store.
//! - **[`scan`]**: Candidate discovery (fixed list or changed files) and line scanning.
//! - **[`eval`]**: The decision pipeline, report text, and the fail-open hook boundary.
//! - **[`admin`]**: Settings write/read endpoint with value validation.
//! - **[`config`]**: Configuration loading: embedded defaults + user overlay merge.
//! - **[`logging`]**: Logger setup and per-decision records.

/// Administrative settings endpoint.
pub mod admin;
/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Error type shared by every module.
pub mod error;
/// Decision pipeline, merge context and decision types.
pub mod eval;
/// Logger initialisation and decision records.
pub mod logging;
/// Debug-indicator pattern set.
pub mod patterns;
/// Candidate discovery, content collaborators and line scanning.
pub mod scan;
/// Scope settings resolution and storage.
pub mod settings;

pub use error::{Error, Result};

use std::sync::Arc;

use eval::{Decision, DecisionEngine, MergeContext};
use scan::ContentProvider;
use settings::SettingsStore;

/// Evaluate one merge with the default configuration in fixed-list mode.
///
/// This is the main entry point for tests and simple embedding. For
/// changed-files mode or a user config, build a [`DecisionEngine`] directly.
pub fn evaluate(
    ctx: &MergeContext,
    store: Arc<dyn SettingsStore>,
    content: Arc<dyn ContentProvider>,
) -> Decision {
    let config = config::Config::default_config();
    DecisionEngine::from_config(&config, store, content, None).evaluate(ctx)
}
