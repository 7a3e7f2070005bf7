//! Candidate discovery and line scanning.
//!
//! The scanner never reads files itself: content and changed-path listings come
//! from the [`ContentProvider`] and [`ChangesetProvider`] collaborators. A file
//! that cannot be retrieved is skipped, never reported.

/// Git-backed collaborators for running against a local clone.
pub mod git;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::eval::MergeContext;
use crate::patterns::PatternSet;
use crate::settings::RepositoryRef;

/// Where candidate paths come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// A configured list of well-known paths, whatever the changeset touched.
    #[default]
    FixedList,
    /// Paths in the changeset's diff whose file name is of interest.
    ChangedFiles,
}

/// Why a file's content could not be produced. Always absorbed by the scanner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("not found")]
    NotFound,
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("content truncated")]
    Truncated,
}

/// Retrieves file content as of a changeset.
pub trait ContentProvider: Send + Sync {
    /// At most `max_lines` lines of `path` at `changeset_ref`, line endings stripped.
    fn file_lines(
        &self,
        repository: &RepositoryRef,
        changeset_ref: &str,
        path: &str,
        max_lines: usize,
    ) -> std::result::Result<Vec<String>, ContentError>;
}

/// Lists the paths a merge would change, in diff order.
pub trait ChangesetProvider: Send + Sync {
    fn changed_paths(&self, ctx: &MergeContext) -> Result<Vec<String>>;
}

/// One offending line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub file_path: String,
    /// 1-based.
    pub line_number: usize,
    /// Trimmed line content.
    pub line_text: String,
    pub pattern_id: String,
}

/// Violations in candidate order, then line order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub violations: Vec<Violation>,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Wall-clock limit shared by one merge evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.started.elapsed() >= self.budget {
            Err(Error::BudgetExceeded(self.budget))
        } else {
            Ok(())
        }
    }
}

/// Finds debug indicators in candidate files.
#[derive(Debug, Clone)]
pub struct FileScanner {
    patterns: PatternSet,
    mode: ScanMode,
    max_lines: usize,
    candidate_files: Vec<String>,
    /// Lowercased.
    changed_file_names: Vec<String>,
}

impl FileScanner {
    /// Fixed-list scanner over `candidate_files`.
    pub fn new(patterns: PatternSet, candidate_files: Vec<String>, max_lines: usize) -> Self {
        Self {
            patterns,
            mode: ScanMode::FixedList,
            max_lines,
            candidate_files,
            changed_file_names: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PatternSet::compile(&config.patterns),
            config.scan.candidate_files.clone(),
            config.scan.max_lines,
        )
        .with_changed_files(config.scan.mode, config.scan.changed_file_names.clone())
    }

    /// Select the mode and the file names of interest for changed-files mode.
    pub fn with_changed_files(mut self, mode: ScanMode, names: Vec<String>) -> Self {
        self.mode = mode;
        self.changed_file_names = names.into_iter().map(|n| n.to_lowercase()).collect();
        self
    }

    /// Deduplicated candidate paths for this merge, in scan order.
    pub fn candidates(
        &self,
        ctx: &MergeContext,
        changes: Option<&dyn ChangesetProvider>,
    ) -> Result<Vec<String>> {
        match self.mode {
            ScanMode::FixedList => Ok(dedup_paths(self.candidate_files.iter().cloned())),
            ScanMode::ChangedFiles => {
                let changes = changes.ok_or_else(|| {
                    Error::Changeset("changed-files mode needs a changeset provider".into())
                })?;
                let changed = changes.changed_paths(ctx)?;
                Ok(dedup_paths(
                    changed.into_iter().filter(|p| self.is_interesting(p)),
                ))
            }
        }
    }

    fn is_interesting(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        self.changed_file_names.contains(&name)
    }

    /// Scan `paths` (deduplicated again here) and collect violations.
    ///
    /// The deadline is checked around every retrieval, so a slow provider
    /// call surfaces as [`Error::BudgetExceeded`] as soon as it returns.
    pub fn scan(
        &self,
        content: &dyn ContentProvider,
        repository: &RepositoryRef,
        changeset_ref: &str,
        paths: &[String],
        deadline: Option<Deadline>,
    ) -> Result<ScanResult> {
        let mut result = ScanResult::default();
        for path in dedup_paths(paths.iter().cloned()) {
            if let Some(d) = deadline {
                d.check()?;
            }
            let fetched = content.file_lines(repository, changeset_ref, &path, self.max_lines);
            if let Some(d) = deadline {
                d.check()?;
            }
            match fetched {
                Ok(lines) => {
                    log::debug!("scanning {path} ({} lines)", lines.len());
                    result.files_scanned += 1;
                    self.scan_lines(&path, &lines, &mut result.violations);
                }
                Err(e) => {
                    log::debug!("skipping {path}: {e}");
                    result.files_skipped += 1;
                }
            }
        }
        Ok(result)
    }

    /// Record at most one violation per line; the first matching pattern names it.
    pub fn scan_lines<S: AsRef<str>>(&self, path: &str, lines: &[S], out: &mut Vec<Violation>) {
        for (idx, line) in lines.iter().take(self.max_lines).enumerate() {
            let line = line.as_ref();
            if let Some(id) = self.patterns.match_line(line) {
                out.push(Violation {
                    file_path: path.to_string(),
                    line_number: idx + 1,
                    line_text: line.trim().to_string(),
                    pattern_id: id.to_string(),
                });
            }
        }
    }
}

fn dedup_paths(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternSpec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Files {
        files: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl Files {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl ContentProvider for Files {
        fn file_lines(
            &self,
            _repository: &RepositoryRef,
            _changeset_ref: &str,
            path: &str,
            max_lines: usize,
        ) -> std::result::Result<Vec<String>, ContentError> {
            self.requested.lock().unwrap().push(path.to_string());
            match path {
                "broken.cfg" => Err(ContentError::Unreadable("permission denied".into())),
                "cut.cfg" => Err(ContentError::Truncated),
                _ => self
                    .files
                    .get(path)
                    .map(|c| c.lines().take(max_lines).map(String::from).collect())
                    .ok_or(ContentError::NotFound),
            }
        }
    }

    struct Changed(Vec<&'static str>);

    impl ChangesetProvider for Changed {
        fn changed_paths(&self, _ctx: &MergeContext) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    fn scanner(paths: &[&str]) -> FileScanner {
        let patterns = PatternSet::compile(&[
            PatternSpec::new("xml", r#"debug\s*=\s*"true""#),
            PatternSpec::new("py", r"debug\s*=\s*true"),
        ]);
        FileScanner::new(patterns, paths.iter().map(|s| s.to_string()).collect(), 5000)
    }

    fn repo() -> RepositoryRef {
        RepositoryRef::new("1", "P")
    }

    fn ctx() -> MergeContext {
        MergeContext::new(repo(), "abc123")
    }

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reports_path_and_one_based_line() {
        let files = Files::new(&[("web.config", "<configuration>\n  <compilation debug=\"true\" />\n</configuration>")]);
        let s = scanner(&[]);
        let r = s
            .scan(&files, &repo(), "abc", &paths(&["web.config"]), None)
            .unwrap();
        assert_eq!(r.violations.len(), 1);
        let v = &r.violations[0];
        assert_eq!(v.file_path, "web.config");
        assert_eq!(v.line_number, 2);
        assert_eq!(v.line_text, "<compilation debug=\"true\" />");
        assert_eq!(v.pattern_id, "xml");
    }

    #[test]
    fn one_violation_per_line_and_scan_continues() {
        let files = Files::new(&[("settings.py", "DEBUG = True  # debug=\"true\"\nX = 1\nDEBUG=true")]);
        let r = scanner(&[])
            .scan(&files, &repo(), "abc", &paths(&["settings.py"]), None)
            .unwrap();
        let lines: Vec<usize> = r.violations.iter().map(|v| v.line_number).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(r.violations[0].pattern_id, "xml");
    }

    #[test]
    fn missing_and_unreadable_files_are_skipped() {
        let files = Files::new(&[("b.py", "DEBUG = True")]);
        let r = scanner(&[])
            .scan(
                &files,
                &repo(),
                "abc",
                &paths(&["missing.py", "broken.cfg", "cut.cfg", "b.py"]),
                None,
            )
            .unwrap();
        assert_eq!(r.violations.len(), 1);
        assert_eq!(r.violations[0].file_path, "b.py");
        assert_eq!(r.files_scanned, 1);
        assert_eq!(r.files_skipped, 3);
    }

    #[test]
    fn order_is_candidate_then_line() {
        let files = Files::new(&[
            ("a.py", "x\nDEBUG = True\nDEBUG = True"),
            ("b.config", "debug=\"true\""),
        ]);
        let r = scanner(&[])
            .scan(&files, &repo(), "abc", &paths(&["b.config", "a.py"]), None)
            .unwrap();
        let got: Vec<(&str, usize)> = r
            .violations
            .iter()
            .map(|v| (v.file_path.as_str(), v.line_number))
            .collect();
        assert_eq!(got, vec![("b.config", 1), ("a.py", 2), ("a.py", 3)]);
    }

    #[test]
    fn duplicate_paths_scanned_once() {
        let files = Files::new(&[("a.py", "DEBUG = True")]);
        let r = scanner(&[])
            .scan(&files, &repo(), "abc", &paths(&["a.py", "b.py", "a.py"]), None)
            .unwrap();
        assert_eq!(r.violations.len(), 1);
        assert_eq!(*files.requested.lock().unwrap(), vec!["a.py", "b.py"]);
    }

    #[test]
    fn line_cap_bounds_scan() {
        let mut content = "ok\n".repeat(10);
        content.push_str("DEBUG = True\n");
        let files = Files::new(&[("a.py", content.as_str())]);
        let s = FileScanner::new(
            PatternSet::compile(&[PatternSpec::new("py", r"debug\s*=\s*true")]),
            Vec::new(),
            10,
        );
        let r = s
            .scan(&files, &repo(), "abc", &paths(&["a.py"]), None)
            .unwrap();
        assert!(r.is_clean());
    }

    #[test]
    fn expired_deadline_aborts() {
        let files = Files::new(&[("a.py", "DEBUG = True")]);
        let deadline = Deadline::starting_now(Duration::ZERO);
        let err = scanner(&[])
            .scan(&files, &repo(), "abc", &paths(&["a.py"]), Some(deadline))
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded(_)));
    }

    struct Slow(Duration);

    impl ContentProvider for Slow {
        fn file_lines(
            &self,
            _repository: &RepositoryRef,
            _changeset_ref: &str,
            _path: &str,
            _max_lines: usize,
        ) -> std::result::Result<Vec<String>, ContentError> {
            std::thread::sleep(self.0);
            Ok(vec!["DEBUG = True".into()])
        }
    }

    #[test]
    fn slow_retrieval_overruns_deadline() {
        let deadline = Deadline::starting_now(Duration::from_millis(20));
        let err = scanner(&[])
            .scan(
                &Slow(Duration::from_millis(100)),
                &repo(),
                "abc",
                &paths(&["a.py"]),
                Some(deadline),
            )
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded(_)));
    }

    #[test]
    fn fixed_list_candidates_are_deduplicated() {
        let s = scanner(&["web.config", ".env", "web.config"]);
        assert_eq!(s.candidates(&ctx(), None).unwrap(), vec!["web.config", ".env"]);
    }

    #[test]
    fn changed_files_filtered_by_name() {
        let s = scanner(&["ignored.cfg"]).with_changed_files(
            ScanMode::ChangedFiles,
            vec!["web.config".into(), "settings.py".into()],
        );
        let changed = Changed(vec![
            "src/Web.Config",
            "README.md",
            "app/settings.py",
            "app/settings.py.bak",
            "src/Web.Config",
        ]);
        assert_eq!(
            s.candidates(&ctx(), Some(&changed as &dyn ChangesetProvider))
                .unwrap(),
            vec!["src/Web.Config", "app/settings.py"]
        );
    }

    #[test]
    fn changed_files_without_provider_is_an_error() {
        let s = scanner(&[]).with_changed_files(ScanMode::ChangedFiles, vec![]);
        assert!(matches!(
            s.candidates(&ctx(), None),
            Err(Error::Changeset(_))
        ));
    }
}
