use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::patterns::PatternSpec;
use crate::scan::ScanMode;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

// ── Final (merged) config types ──

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

/// What the hook returns when the check itself cannot complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    /// Accept the merge.
    #[default]
    Open,
    /// Reject the merge.
    Closed,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Effective value when no scope in the chain resolves.
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default)]
    pub fault_policy: FaultPolicy,
    /// Directory backing the scope settings store. `~` is expanded.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_enabled: false,
            fault_policy: FaultPolicy::Open,
            store_dir: default_store_dir(),
        }
    }
}

impl Settings {
    /// The store directory with `~` and `$VARS` expanded.
    ///
    /// Expansion failures (an unset variable) fall back to the literal path.
    pub fn store_path(&self) -> PathBuf {
        match shellexpand::full(&self.store_dir) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                log::warn!("store_dir expansion failed ({e}), using it verbatim");
                PathBuf::from(&self.store_dir)
            }
        }
    }
}

fn default_store_dir() -> String {
    "~/.local/share/debug-gate/settings".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub mode: ScanMode,
    /// Lines read per file before retrieval stops.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Bytes kept per line; the rest of a longer line is discarded unread.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Bytes read per file before retrieval stops.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Wall-clock budget for one merge evaluation.
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    /// Paths checked in fixed-list mode.
    #[serde(default)]
    pub candidate_files: Vec<String>,
    /// File names (not paths) of interest in changed-files mode.
    #[serde(default)]
    pub changed_file_names: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            max_lines: default_max_lines(),
            max_line_bytes: default_max_line_bytes(),
            max_file_bytes: default_max_file_bytes(),
            time_budget_ms: default_time_budget_ms(),
            candidate_files: Vec::new(),
            changed_file_names: Vec::new(),
        }
    }
}

fn default_max_lines() -> usize {
    5000
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_max_file_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_time_budget_ms() -> u64 {
    10_000
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    /// Replace the default pattern list instead of merging by id.
    #[serde(default)]
    replace_patterns: bool,
    #[serde(default)]
    remove_patterns: Vec<String>,
    #[serde(default)]
    patterns: Vec<PatternSpec>,
    #[serde(default)]
    settings: SettingsOverlay,
    #[serde(default)]
    scan: ScanOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsOverlay {
    default_enabled: Option<bool>,
    fault_policy: Option<FaultPolicy>,
    store_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanOverlay {
    #[serde(default)]
    replace: bool,
    mode: Option<ScanMode>,
    max_lines: Option<usize>,
    max_line_bytes: Option<usize>,
    max_file_bytes: Option<u64>,
    time_budget_ms: Option<u64>,
    #[serde(default)]
    candidate_files: Vec<String>,
    #[serde(default)]
    changed_file_names: Vec<String>,
    #[serde(default)]
    remove_candidate_files: Vec<String>,
    #[serde(default)]
    remove_changed_file_names: Vec<String>,
}

// ── Merge logic ──

/// Merge a user list into a default list.
/// In replace mode: user list replaces default entirely.
/// In merge mode: remove items first, then extend with additions (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

/// Merge user patterns by id: a known id is redefined in place, a new id is appended.
fn merge_patterns(
    base: &mut Vec<PatternSpec>,
    add: Vec<PatternSpec>,
    remove: &[String],
    replace: bool,
) {
    if replace {
        *base = add;
        return;
    }
    base.retain(|p| !remove.contains(&p.id));
    for pattern in add {
        match base.iter_mut().find(|p| p.id == pattern.id) {
            Some(existing) => *existing = pattern,
            None => base.push(pattern),
        }
    }
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load configuration with resolution order:
    /// 1. Start with embedded defaults
    /// 2. Merge user overlay from ~/.config/debug-gate/config.toml (if exists)
    ///
    /// A malformed overlay is logged and ignored; the defaults still apply.
    pub fn load() -> Self {
        let mut config = Self::default_config();
        if let Some(overlay) = Self::load_overlay() {
            config.apply_overlay(overlay);
        }
        config
    }

    fn load_overlay() -> Option<ConfigOverlay> {
        let home = std::env::var_os("HOME")?;
        let path = std::path::Path::new(&home).join(".config/debug-gate/config.toml");
        let content = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&content) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                log::warn!("config parse error in {}: {e}", path.display());
                None
            }
        }
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        let s = overlay.settings;
        if let Some(v) = s.default_enabled {
            self.settings.default_enabled = v;
        }
        if let Some(v) = s.fault_policy {
            self.settings.fault_policy = v;
        }
        if let Some(v) = s.store_dir {
            self.settings.store_dir = v;
        }

        let sc = overlay.scan;
        if let Some(v) = sc.mode {
            self.scan.mode = v;
        }
        if let Some(v) = sc.max_lines {
            self.scan.max_lines = v;
        }
        if let Some(v) = sc.max_line_bytes {
            self.scan.max_line_bytes = v;
        }
        if let Some(v) = sc.max_file_bytes {
            self.scan.max_file_bytes = v;
        }
        if let Some(v) = sc.time_budget_ms {
            self.scan.time_budget_ms = v;
        }
        merge_list(
            &mut self.scan.candidate_files,
            sc.candidate_files,
            &sc.remove_candidate_files,
            sc.replace,
        );
        merge_list(
            &mut self.scan.changed_file_names,
            sc.changed_file_names,
            &sc.remove_changed_file_names,
            sc.replace,
        );

        merge_patterns(
            &mut self.patterns,
            overlay.patterns,
            &overlay.remove_patterns,
            overlay.replace_patterns,
        );
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }
}
