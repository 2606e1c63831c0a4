//! # Probe
//!
//! Supervises an AFL-style fuzzing harness against a native artifact for a
//! bounded number of polling ticks, looking for crash inputs.
//!
//! The harness runs in its own process group. The group and the working
//! directories are owned by the stage future: they are torn down when the
//! stage finishes and, via [`Harness`]'s and `TempDir`'s destructors, when the
//! future is dropped on cancellation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use super::{StageExecutor, StageInput};
use crate::config::ProbeConfig;

/// Crash directories written by the harness, relative to its output dir
const CRASH_DIRS: &[&str] = &["crashes", "default/crashes"];

pub struct FuzzProbe {
    config: ProbeConfig,
}

impl FuzzProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn render_args(&self, input_dir: &Path, output_dir: &Path, target: &Path) -> Vec<String> {
        let input_dir = input_dir.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        let target = target.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input_dir}", &input_dir)
                    .replace("{output_dir}", &output_dir)
                    .replace("{target}", &target)
            })
            .collect()
    }

    /// Poll for crash inputs until one appears, the harness exits or the budget runs out
    async fn supervise(&self, child: &mut Child, output_dir: &Path) -> Result<Option<String>> {
        let tick = Duration::from_millis(self.config.tick_ms);
        for _ in 0..self.config.ticks {
            tokio::time::sleep(tick).await;

            let exited = child.try_wait().context("Failed to poll probe process")?;
            let crashes = count_crashes(output_dir).await;
            if crashes > 0 {
                return Ok(Some(format!("crash-detected: {} crash input(s)", crashes)));
            }
            if let Some(status) = exited {
                if !status.success() {
                    tracing::warn!(%status, "Probe harness exited early");
                }
                return Ok(None);
            }
        }
        tracing::debug!(ticks = self.config.ticks, "Probe budget exhausted");
        Ok(None)
    }
}

/// Crash inputs found so far; the harness's README is not one
async fn count_crashes(output_dir: &Path) -> usize {
    let mut total = 0;
    for dir in CRASH_DIRS {
        let Ok(mut entries) = tokio::fs::read_dir(output_dir.join(dir)).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name() != "README.txt" {
                total += 1;
            }
        }
    }
    total
}

/// A spawned harness. Everything it forked shares its process group, and the
/// whole group is killed on [`Harness::stop`] or drop.
struct Harness {
    child: Child,
    group: Option<i32>,
}

impl Harness {
    fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))?;
        // leader of a fresh group: pgid == pid
        let group = child.id().and_then(|pid| i32::try_from(pid).ok());
        Ok(Self { child, group })
    }

    fn kill_group(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
            // addresses the group this harness leads.
            if unsafe { libc::kill(-group, libc::SIGKILL) } != 0 {
                let e = std::io::Error::last_os_error();
                if e.raw_os_error() != Some(libc::ESRCH) {
                    tracing::warn!(group, error = %e, "Failed to signal probe process group");
                }
            }
        }
        #[cfg(not(unix))]
        let _ = group;
    }

    /// Kill the harness and its descendants, then reap the harness
    async fn stop(&mut self) {
        self.kill_group();
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(error = %e, "Failed to stop probe harness");
                }
            }
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.kill_group();
    }
}

#[async_trait]
impl StageExecutor for FuzzProbe {
    async fn execute(&self, input: StageInput) -> Result<Option<String>> {
        let target = input.artifact_path.context("Probe requires an artifact")?;

        let work = tempfile::Builder::new()
            .prefix("probe-")
            .tempdir()
            .context("Failed to create probe working directory")?;
        let input_dir = work.path().join("in");
        let output_dir = work.path().join("out");
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;
        tokio::fs::write(input_dir.join("seed"), self.config.seed.as_bytes()).await?;

        let args = self.render_args(&input_dir, &output_dir, &target);
        tracing::info!(program = %self.config.program, target = %target.display(), "Starting probe harness");

        let mut harness = Harness::spawn(&self.config.program, &args)?;
        let outcome = self.supervise(&mut harness.child, &output_dir).await;
        harness.stop().await;
        if let Err(e) = work.close() {
            tracing::warn!(error = %e, "Failed to remove probe working directory");
        }

        outcome
    }

    fn host_capable(&self) -> bool {
        self.config
            .host_capable
            .unwrap_or(cfg!(target_os = "linux"))
    }
}
