//! Local stand-ins for the services that perform pipeline actions.
//!
//! The orchestrator hands each action to an [`ActionRunner`]. [`LocalRunner`]
//! snapshots a working tree for `Source` actions and runs a shell command in
//! a throwaway directory for build actions.

use crate::error::{Result, StackError};
use crate::pipeline::{Action, ActionProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Environment variable carrying the source revision into the build.
pub const ENV_SOURCE_VERSION: &str = "CODEBUILD_RESOLVED_SOURCE_VERSION";

const MAX_SNAPSHOT_FILE_BYTES: u64 = 1024 * 1024;
const SKIPPED_DIRS: &[&str] = &[".git", ".crossdeploy", "target", "node_modules"];

// ---------------------------------------------------------------------------
// Runner seam
// ---------------------------------------------------------------------------

pub struct ActionContext<'a> {
    pub stage: &'a str,
    pub action: &'a Action,
    /// Input artifacts by name.
    pub inputs: BTreeMap<String, Vec<u8>>,
    pub environment: &'a BTreeMap<String, String>,
    pub repository: &'a str,
    pub branch: &'a str,
    pub commit_id: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Output artifacts by name.
    pub outputs: BTreeMap<String, Vec<u8>>,
    pub log: String,
}

pub trait ActionRunner {
    /// Run one action. Any error fails the action's stage.
    fn run(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutcome>;
}

// ---------------------------------------------------------------------------
// Source snapshot
// ---------------------------------------------------------------------------

/// Contents of a source artifact: the files of a working tree at a revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub repository: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub files: BTreeMap<String, String>,
}

impl SourceSnapshot {
    /// Capture UTF-8 files under `dir`, skipping VCS and build directories.
    pub fn capture(dir: &Path, repository: &str, branch: &str, commit_id: Option<&str>) -> Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(dir, dir, &mut files)?;
        Ok(Self {
            repository: repository.to_string(),
            branch: branch.to_string(),
            commit_id: commit_id.map(str::to_string),
            files,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Write every file under `dir`. Paths that would land outside `dir` are
    /// rejected before anything is written.
    pub fn unpack(&self, dir: &Path) -> Result<()> {
        for rel in self.files.keys() {
            contained_path(rel)?;
        }
        for (rel, content) in &self.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        Ok(())
    }
}

/// Accepts only plain relative paths: no root, prefix, `.` or `..`.
fn contained_path(rel: &str) -> Result<&Path> {
    let path = Path::new(rel);
    let plain = !rel.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(StackError::InvalidName {
            kind: "artifact path",
            value: rel.to_string(),
            reason: "must be a relative path inside the build directory".into(),
        })
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|s| name == *s) {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if entry.metadata()?.len() > MAX_SNAPSHOT_FILE_BYTES {
                tracing::debug!(path = %path.display(), "skipping large file in snapshot");
                continue;
            }
            // Binary files are left out of the snapshot.
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel, content);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Runs `sh -c <command>` in a fresh temporary directory holding the
/// unpacked source. The directory is removed afterwards.
#[derive(Debug, Clone)]
pub struct LocalBuildRunner {
    pub command: String,
}

/// What a finished build leaves behind as its output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl LocalBuildRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn build(&self, ctx: &ActionContext<'_>) -> Result<BuildReport> {
        let workdir = TempDir::new()?;
        for (name, data) in &ctx.inputs {
            match SourceSnapshot::from_bytes(data) {
                Ok(snapshot) => snapshot.unpack(workdir.path())?,
                Err(_) => std::fs::write(workdir.path().join(contained_path(name)?), data)?,
            }
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd.current_dir(workdir.path());
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(ctx.environment);
        if let Some(commit) = ctx.commit_id {
            cmd.env(ENV_SOURCE_VERSION, commit);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd
            .output()
            .map_err(|e| StackError::BuildFailed(format!("failed to spawn build: {e}")))?;
        let report = BuildReport {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.status.success() {
            let hint: String = report.stderr.chars().take(500).collect();
            return Err(StackError::BuildFailed(format!(
                "'{}' exited with {}: {}",
                self.command,
                report.exit_code,
                hint.trim()
            )));
        }
        Ok(report)
    }
}

impl ActionRunner for LocalBuildRunner {
    fn run(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutcome> {
        let report = self.build(ctx)?;
        let bytes = serde_json::to_vec(&report)?;
        let outputs = ctx
            .action
            .output_artifacts
            .iter()
            .map(|name| (name.clone(), bytes.clone()))
            .collect();
        Ok(ActionOutcome {
            outputs,
            log: report.stdout,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatch by provider
// ---------------------------------------------------------------------------

/// Snapshots `source_dir` for source actions and hands build actions to a
/// [`LocalBuildRunner`].
#[derive(Debug, Clone)]
pub struct LocalRunner {
    pub source_dir: PathBuf,
    pub build: LocalBuildRunner,
}

impl LocalRunner {
    pub fn new(source_dir: impl Into<PathBuf>, build_command: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            build: LocalBuildRunner::new(build_command),
        }
    }
}

impl ActionRunner for LocalRunner {
    fn run(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutcome> {
        match ctx.action.provider {
            ActionProvider::CodeCommit => {
                let snapshot =
                    SourceSnapshot::capture(&self.source_dir, ctx.repository, ctx.branch, ctx.commit_id)?;
                let bytes = snapshot.to_bytes()?;
                Ok(ActionOutcome {
                    outputs: ctx
                        .action
                        .output_artifacts
                        .iter()
                        .map(|name| (name.clone(), bytes.clone()))
                        .collect(),
                    log: format!("captured {} files", snapshot.files.len()),
                })
            }
            ActionProvider::CodeBuild => self.build.run(ctx),
        }
    }
}
