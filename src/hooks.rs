//! The hook dispatcher: runs in-process handlers then an installed
//! external script for each hook point, in order, with abort-capable
//! phases treated as fatal on non-zero exit or timeout.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::config::HookConfig;
use crate::errors::GitError;

/// A phase an operation passes through at which hooks may run (spec
/// §4.13). `pre-*` phases and `commit-msg` can abort the operation;
/// `post-*` phases are informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreCommit,
    CommitMsg,
    PostCommit,
    PrePush,
    PreRebase,
    PostCheckout,
    PostMerge,
}

impl HookPoint {
    /// Script file name under `<repo>/hooks/`.
    pub fn script_name(&self) -> &'static str {
        match self {
            HookPoint::PreCommit => "pre-commit",
            HookPoint::CommitMsg => "commit-msg",
            HookPoint::PostCommit => "post-commit",
            HookPoint::PrePush => "pre-push",
            HookPoint::PreRebase => "pre-rebase",
            HookPoint::PostCheckout => "post-checkout",
            HookPoint::PostMerge => "post-merge",
        }
    }

    /// Whether a non-zero exit or timeout at this phase aborts the calling
    /// operation (spec §4.13, §7: "fatal for `pre-*`/`commit-msg` phases
    /// and advisory for `post-*`").
    pub fn is_abort_capable(&self) -> bool {
        !self.script_name().starts_with("post-")
    }
}

/// Arguments passed to a hook invocation, both in-process and external.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub repo_root: PathBuf,
    pub args: Vec<String>,
    pub message: Option<String>,
}

/// Outcome of a single handler or script invocation.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub success: bool,
    pub stderr: Option<String>,
}

impl HookOutcome {
    pub fn ok() -> HookOutcome {
        HookOutcome { success: true, stderr: None }
    }

    pub fn fail(stderr: impl Into<String>) -> HookOutcome {
        HookOutcome { success: false, stderr: Some(stderr.into()) }
    }
}

/// An in-process hook handler.
pub type HandlerFn = Box<dyn Fn(&HookContext) -> HookOutcome + Send + Sync>;

/// Dispatches hooks for one repository: in-process handlers registered by
/// the embedding process, then an external script in `hooks/<name>` if
/// one is installed and executable.
pub struct HookDispatcher {
    hooks_dir: PathBuf,
    config: HookConfig,
    handlers: Vec<(HookPoint, HandlerFn)>,
}

impl HookDispatcher {
    pub fn new(repo_root: &Path, config: HookConfig) -> HookDispatcher {
        HookDispatcher {
            hooks_dir: repo_root.join("hooks"),
            config,
            handlers: Vec::new(),
        }
    }

    /// Registers an in-process handler for `point`, run before any
    /// external script at that point.
    pub fn register(&mut self, point: HookPoint, handler: HandlerFn) {
        self.handlers.push((point, handler));
    }

    fn script_path(&self, point: HookPoint) -> PathBuf {
        self.hooks_dir.join(point.script_name())
    }

    fn run_external_script(&self, point: HookPoint, ctx: &HookContext) -> Option<HookOutcome> {
        let path = self.script_path(point);
        if !path.is_file() || !is_executable(&path) {
            return None;
        }

        let mut command = Command::new(&path);
        command
            .args(&ctx.args)
            .current_dir(&ctx.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return Some(HookOutcome::fail(format!("failed to spawn hook: {e}"))),
        };

        let (tx, rx) = mpsc::channel();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        thread::spawn(move || {
            let output = child.wait_with_output();
            let _ = tx.send(output);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => {
                if output.status.success() {
                    Some(HookOutcome::ok())
                } else {
                    Some(HookOutcome::fail(String::from_utf8_lossy(&output.stderr).to_string()))
                }
            }
            Ok(Err(e)) => Some(HookOutcome::fail(format!("hook exited abnormally: {e}"))),
            Err(_) => Some(HookOutcome::fail(format!(
                "hook `{}` timed out after {}s",
                point.script_name(),
                self.config.timeout_secs
            ))),
        }
    }

    /// Runs every registered in-process handler for `point`, then the
    /// installed external script, in that order. `bypass` skips both
    /// entirely (a per-invocation override, e.g. `--no-verify`), and the
    /// dispatcher's own `enabled` flag does the same repository-wide.
    #[instrument(skip(self, ctx))]
    pub fn run(&self, point: HookPoint, ctx: &HookContext, bypass: bool) -> Result<(), GitError> {
        if bypass || !self.config.enabled {
            return Ok(());
        }

        for (handler_point, handler) in &self.handlers {
            if *handler_point != point {
                continue;
            }
            let outcome = handler(ctx);
            if !outcome.success {
                if point.is_abort_capable() {
                    return Err(GitError::HookFailed {
                        hook: point.script_name().to_string(),
                        stderr: outcome.stderr.unwrap_or_default(),
                    });
                }
                warn!(hook = point.script_name(), "post-hook handler failed, continuing");
            }
        }

        if let Some(outcome) = self.run_external_script(point, ctx) {
            if !outcome.success {
                if point.is_abort_capable() {
                    return Err(GitError::HookFailed {
                        hook: point.script_name().to_string(),
                        stderr: outcome.stderr.unwrap_or_default(),
                    });
                }
                warn!(hook = point.script_name(), "post-hook script failed, continuing");
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
