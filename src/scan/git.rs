use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::eval::MergeContext;
use crate::scan::{ChangesetProvider, ContentError, ContentProvider};
use crate::settings::RepositoryRef;

/// A local clone, read through the `git` binary.
///
/// The clone is assumed to be the repository named in the merge context; the
/// repository id itself is not used to locate it.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
    max_line_bytes: usize,
    max_file_bytes: u64,
    timeout: Option<Duration>,
}

impl GitRepository {
    /// Reads at most 64 KiB per line and 4 MiB per file, with no timeout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_line_bytes: 64 * 1024,
            max_file_bytes: 4 * 1024 * 1024,
            timeout: None,
        }
    }

    pub fn with_read_limits(mut self, max_line_bytes: usize, max_file_bytes: u64) -> Self {
        self.max_line_bytes = max_line_bytes;
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Kill a `git show` that is still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.root);
        cmd
    }
}

/// Refs are passed positionally; one starting with `-` would read as a flag.
fn check_ref(r: &str) -> bool {
    !r.is_empty() && !r.starts_with('-')
}

/// Split `git ... -z` output into paths.
fn parse_name_list(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn strip_eol(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

/// Read one line, keeping at most `cap` bytes of it. The rest of the line is
/// consumed and dropped. Returns the bytes consumed, 0 at end of input.
fn read_capped_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, cap: usize) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(consumed);
        }
        let (chunk, eol) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };
        let room = cap.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        let n = chunk.len();
        reader.consume(n);
        consumed += n;
        if eol {
            return Ok(consumed);
        }
    }
}

/// Up to `max_lines` lines from `src`, never reading past `max_file_bytes`.
/// The flag is set when reading stopped at a limit rather than end of input.
fn read_lines<R: Read>(
    src: R,
    max_lines: usize,
    max_line_bytes: usize,
    max_file_bytes: u64,
) -> io::Result<(Vec<String>, bool)> {
    let mut reader = BufReader::new(src).take(max_file_bytes);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while lines.len() < max_lines {
        buf.clear();
        if read_capped_line(&mut reader, &mut buf, max_line_bytes)? == 0 {
            break;
        }
        strip_eol(&mut buf);
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
    let stopped = lines.len() >= max_lines || reader.limit() == 0;
    Ok((lines, stopped))
}

/// Kills a child process unless disarmed before its timeout.
struct Watchdog {
    cancel: mpsc::Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watchdog {
    fn arm(child: Arc<Mutex<Child>>, timeout: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel();
        let handle = thread::spawn(move || match cancelled.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                let _ = lock(&child).kill();
                true
            }
            _ => false,
        });
        Self { cancel, handle }
    }

    /// Stop the timer. True if it already fired.
    fn disarm(self) -> bool {
        let _ = self.cancel.send(());
        self.handle.join().unwrap_or(false)
    }
}

fn lock(child: &Mutex<Child>) -> std::sync::MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContentProvider for GitRepository {
    fn file_lines(
        &self,
        _repository: &RepositoryRef,
        changeset_ref: &str,
        path: &str,
        max_lines: usize,
    ) -> std::result::Result<Vec<String>, ContentError> {
        if !check_ref(changeset_ref) {
            return Err(ContentError::Unreadable(format!(
                "refusing ref '{changeset_ref}'"
            )));
        }
        let mut spawned = self
            .git()
            .arg("show")
            .arg(format!("{changeset_ref}:{path}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ContentError::Unreadable(e.to_string()))?;
        let Some(stdout) = spawned.stdout.take() else {
            let _ = spawned.kill();
            let _ = spawned.wait();
            return Err(ContentError::Unreadable("no stdout from git".into()));
        };

        let child = Arc::new(Mutex::new(spawned));
        let watchdog = self
            .timeout
            .map(|t| Watchdog::arm(Arc::clone(&child), t));
        let read = read_lines(stdout, max_lines, self.max_line_bytes, self.max_file_bytes);
        let timed_out = watchdog.map(Watchdog::disarm).unwrap_or(false);
        let mut child = lock(&child);

        if timed_out {
            let _ = child.wait();
            return Err(ContentError::Unreadable(format!(
                "git show timed out after {:?}",
                self.timeout.unwrap_or_default()
            )));
        }
        let (lines, stopped) = match read {
            Ok(r) => r,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ContentError::Unreadable(e.to_string()));
            }
        };
        if stopped {
            log::debug!("{path}: stopped reading at {} lines", lines.len());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(lines);
        }

        let status = child
            .wait()
            .map_err(|e| ContentError::Unreadable(e.to_string()))?;
        if status.success() {
            Ok(lines)
        } else {
            // `git show` exits 128 for a path missing at that ref.
            Err(ContentError::NotFound)
        }
    }
}

impl ChangesetProvider for GitRepository {
    /// `base...ref` when the context names a base, otherwise the tip commit's own changes.
    fn changed_paths(&self, ctx: &MergeContext) -> Result<Vec<String>> {
        if !check_ref(&ctx.changeset_ref) {
            return Err(Error::Changeset(format!(
                "refusing ref '{}'",
                ctx.changeset_ref
            )));
        }
        let mut cmd = self.git();
        match ctx.base_ref.as_deref() {
            Some(base) if check_ref(base) => {
                cmd.args(["diff", "--name-only", "-z"])
                    .arg(format!("{base}...{}", ctx.changeset_ref));
            }
            Some(base) => return Err(Error::Changeset(format!("refusing ref '{base}'"))),
            None => {
                cmd.args(["diff-tree", "--no-commit-id", "--name-only", "-r", "-z"])
                    .arg(&ctx.changeset_ref);
            }
        }
        let output = cmd.stdin(Stdio::null()).output()?;
        if !output.status.success() {
            return Err(Error::Changeset(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_name_list(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_list_splits_on_nul() {
        let raw = b"web.config\0src/app settings.py\0\0";
        assert_eq!(
            parse_name_list(raw),
            vec!["web.config".to_string(), "src/app settings.py".to_string()]
        );
    }

    #[test]
    fn name_list_empty() {
        assert!(parse_name_list(b"").is_empty());
    }

    #[test]
    fn eol_stripping() {
        let mut crlf = b"debug=true\r\n".to_vec();
        strip_eol(&mut crlf);
        assert_eq!(crlf, b"debug=true");
        let mut bare = b"last".to_vec();
        strip_eol(&mut bare);
        assert_eq!(bare, b"last");
    }

    #[test]
    fn option_like_refs_are_refused() {
        assert!(!check_ref("--output=/tmp/x"));
        assert!(!check_ref(""));
        assert!(check_ref("refs/heads/main"));
    }

    #[test]
    fn long_line_keeps_only_a_prefix() {
        let mut input = "x".repeat(10_000);
        input.push_str("\nDEBUG = True\n");
        let (lines, stopped) = read_lines(input.as_bytes(), 10, 16, 1 << 20).unwrap();
        assert_eq!(lines, vec!["x".repeat(16), "DEBUG = True".to_string()]);
        assert!(!stopped);
    }

    #[test]
    fn file_byte_cap_stops_reading() {
        let input = "line\n".repeat(1000);
        let (lines, stopped) = read_lines(input.as_bytes(), 5000, 1024, 50).unwrap();
        assert_eq!(lines.len(), 10);
        assert!(stopped);
    }

    #[test]
    fn line_cap_stops_reading() {
        let (lines, stopped) = read_lines(&b"a\nb\nc\n"[..], 2, 1024, 1 << 20).unwrap();
        assert_eq!(lines, vec!["a", "b"]);
        assert!(stopped);
    }

    #[test]
    fn capped_line_consumes_whole_line() {
        let mut reader = BufReader::with_capacity(4, &b"abcdefghij\nk"[..]);
        let mut buf = Vec::new();
        assert_eq!(read_capped_line(&mut reader, &mut buf, 3).unwrap(), 11);
        assert_eq!(buf, b"abc");
        buf.clear();
        assert_eq!(read_capped_line(&mut reader, &mut buf, 3).unwrap(), 1);
        assert_eq!(buf, b"k");
    }

    #[test]
    fn watchdog_kills_slow_child() {
        let child = Command::new("sleep").arg("5").spawn().unwrap();
        let child = Arc::new(Mutex::new(child));
        let watchdog = Watchdog::arm(Arc::clone(&child), Duration::from_millis(50));
        thread::sleep(Duration::from_millis(300));
        assert!(watchdog.disarm());
        assert!(!lock(&child).wait().unwrap().success());
    }

    #[test]
    fn disarmed_watchdog_leaves_child_alone() {
        let child = Command::new("true").spawn().unwrap();
        let child = Arc::new(Mutex::new(child));
        let watchdog = Watchdog::arm(Arc::clone(&child), Duration::from_secs(30));
        assert!(!watchdog.disarm());
        assert!(lock(&child).wait().unwrap().success());
    }

    fn run_git(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=gate", "-c", "user.email=gate@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .stdout(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?}");
    }

    #[test]
    fn single_line_blob_is_read_within_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = String::from("<compilation debug=\"true\" ");
        blob.push_str(&"a".repeat(4 * 1024 * 1024));
        std::fs::write(dir.path().join("web.config"), &blob).unwrap();
        run_git(dir.path(), &["init", "-q"]);
        run_git(dir.path(), &["add", "web.config"]);
        run_git(dir.path(), &["commit", "-q", "-m", "blob"]);

        let repo = GitRepository::new(dir.path()).with_read_limits(1024, 1 << 20);
        let lines = repo
            .file_lines(&RepositoryRef::new("1", "P"), "HEAD", "web.config", 1)
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 1024);
        assert!(lines[0].starts_with("<compilation debug=\"true\""));

        let missing = repo.file_lines(&RepositoryRef::new("1", "P"), "HEAD", "settings.py", 10);
        assert_eq!(missing, Err(ContentError::NotFound));
    }

    #[test]
    fn dash_ref_never_spawns() {
        let repo = GitRepository::new("/nonexistent");
        let r = repo.file_lines(&RepositoryRef::new("1", "P"), "-x", "web.config", 10);
        assert!(matches!(r, Err(ContentError::Unreadable(_))));
    }
}
