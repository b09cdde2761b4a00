//! On-disk bookkeeping for applied manifests
//!
//! Every apply attempt on a file leaves a trace next to it:
//!
//! | Event | Manifest | Log sidecar |
//! |-------|----------|-------------|
//! | success, `rename` | `<file>.applied` | `<file>.applied.log` |
//! | success, `backup` | `<file>.previous` (copy) | `<file>.previous.log` |
//! | failure | `<file>.<ts>.failed` | `<file>.<ts>.log` |
//! | retry N | unchanged | `<file>.<ts>.retry<N>.log` |
//!
//! The success artifact is also the baseline for the next apply: a file
//! byte-identical to it is not applied again.

use crate::pipeline::PipelineResult;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to a manifest after a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactMode {
    /// Move the manifest to `<file>.applied`
    Rename,
    /// Copy the manifest to `<file>.previous`, leaving it in place
    #[default]
    Backup,
}

impl ArtifactMode {
    fn success_suffix(self) -> &'static str {
        match self {
            Self::Rename => ".applied",
            Self::Backup => ".previous",
        }
    }
}

impl fmt::Display for ArtifactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rename => f.write_str("rename"),
            Self::Backup => f.write_str("backup"),
        }
    }
}

/// Contents of a log sidecar
#[derive(Debug, Clone)]
pub struct CommandLog<'a> {
    /// Rendered command line
    pub command: &'a str,
    /// Exit code
    pub rc: i32,
    /// Timeout the command ran under
    pub timeout: Duration,
    /// Captured standard output
    pub stdout: &'a str,
    /// Captured standard error
    pub stderr: &'a str,
}

impl CommandLog<'_> {
    /// Renders the sidecar text
    #[must_use]
    pub fn render(&self) -> String {
        fn or_empty(text: &str) -> &str {
            if text.is_empty() { "(empty)" } else { text }
        }

        format!(
            "Timestamp: {}\nCommand: {}\nReturn Code: {}\nTimeout: {}\n\n=== STDOUT ===\n{}\n=== STDERR ===\n{}\n",
            Local::now().to_rfc3339(),
            self.command,
            self.rc,
            self.timeout.as_secs(),
            or_empty(self.stdout),
            or_empty(self.stderr),
        )
    }

    fn write_to(&self, path: &Path) -> PipelineResult<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

/// Timestamp used in failure and retry artifact names
#[must_use]
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Paths written for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    /// Manifest artifact, if one was produced
    pub manifest: Option<PathBuf>,
    /// Log sidecar
    pub log: PathBuf,
}

/// Writes artifacts according to an [`ArtifactMode`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactStore {
    mode: ArtifactMode,
}

impl ArtifactStore {
    /// Creates a store for `mode`
    #[must_use]
    pub fn new(mode: ArtifactMode) -> Self {
        Self { mode }
    }

    /// Configured mode
    #[must_use]
    pub fn mode(&self) -> ArtifactMode {
        self.mode
    }

    /// Path of the last successfully applied copy of `file`
    #[must_use]
    pub fn baseline(&self, file: &Path) -> PathBuf {
        with_suffix(file, self.mode.success_suffix())
    }

    /// Returns true if `file` is byte-identical to its baseline
    ///
    /// # Errors
    ///
    /// Returns an IO error if either file exists but cannot be read.
    pub fn is_unchanged(&self, file: &Path) -> PipelineResult<bool> {
        let baseline = self.baseline(file);
        if !baseline.is_file() || !file.is_file() {
            return Ok(false);
        }
        Ok(std::fs::read(file)? == std::fs::read(&baseline)?)
    }

    /// Persists the applied manifest and its log
    ///
    /// # Errors
    ///
    /// Returns an IO error if the artifact or log cannot be written.
    pub fn record_success(&self, file: &Path, log: &CommandLog<'_>) -> PipelineResult<Artifacts> {
        let artifact = self.baseline(file);
        match self.mode {
            ArtifactMode::Rename => std::fs::rename(file, &artifact)?,
            ArtifactMode::Backup => {
                std::fs::copy(file, &artifact)?;
            }
        }

        let log_path = with_suffix(&artifact, ".log");
        log.write_to(&log_path)?;

        tracing::debug!(
            artifact = %artifact.display(),
            log = %log_path.display(),
            "Saved applied manifest"
        );
        Ok(Artifacts {
            manifest: Some(artifact),
            log: log_path,
        })
    }

    /// Moves a failed manifest aside and writes its log, sharing `stamp`
    ///
    /// # Errors
    ///
    /// Returns an IO error if the manifest cannot be moved or the log written.
    pub fn record_failure(
        &self,
        file: &Path,
        stamp: &str,
        log: &CommandLog<'_>,
    ) -> PipelineResult<Artifacts> {
        let failed = with_suffix(file, &format!(".{stamp}.failed"));
        let log_path = with_suffix(file, &format!(".{stamp}.log"));

        let manifest = if file.exists() {
            std::fs::rename(file, &failed)?;
            Some(failed)
        } else {
            None
        };
        log.write_to(&log_path)?;

        Ok(Artifacts {
            manifest,
            log: log_path,
        })
    }

    /// Writes the log of a failed attempt that is about to be retried
    ///
    /// # Errors
    ///
    /// Returns an IO error if the log cannot be written.
    pub fn record_retry(
        &self,
        file: &Path,
        stamp: &str,
        attempt: u32,
        log: &CommandLog<'_>,
    ) -> PipelineResult<PathBuf> {
        let log_path = with_suffix(file, &format!(".{stamp}.retry{attempt}.log"));
        log.write_to(&log_path)?;
        Ok(log_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log<'a>(stdout: &'a str, stderr: &'a str) -> CommandLog<'a> {
        CommandLog {
            command: "oc apply -f m.yaml",
            rc: 1,
            timeout: Duration::from_secs(60),
            stdout,
            stderr,
        }
    }

    fn manifest(dir: &TempDir) -> PathBuf {
        let file = dir.path().join("m.yaml");
        std::fs::write(&file, "kind: ConfigMap\n").unwrap();
        file
    }

    #[test]
    fn test_log_format() {
        let text = log("", "boom").render();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("Timestamp: "));
        assert_eq!(lines[1], "Command: oc apply -f m.yaml");
        assert_eq!(lines[2], "Return Code: 1");
        assert_eq!(lines[3], "Timeout: 60");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "=== STDOUT ===");
        assert_eq!(lines[6], "(empty)");
        assert_eq!(lines[7], "=== STDERR ===");
        assert_eq!(lines[8], "boom");
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
    }

    #[test]
    fn test_rename_mode_success() {
        let dir = TempDir::new().unwrap();
        let file = manifest(&dir);
        let store = ArtifactStore::new(ArtifactMode::Rename);

        let saved = store.record_success(&file, &log("ok", "")).unwrap();

        assert!(!file.exists());
        assert_eq!(saved.manifest, Some(dir.path().join("m.yaml.applied")));
        assert_eq!(saved.log, dir.path().join("m.yaml.applied.log"));
        assert!(saved.log.exists());
    }

    #[test]
    fn test_backup_mode_success_keeps_file() {
        let dir = TempDir::new().unwrap();
        let file = manifest(&dir);
        let store = ArtifactStore::new(ArtifactMode::Backup);

        let saved = store.record_success(&file, &log("ok", "")).unwrap();

        assert!(file.exists());
        assert_eq!(saved.manifest, Some(dir.path().join("m.yaml.previous")));
        assert_eq!(saved.log, dir.path().join("m.yaml.previous.log"));
        assert!(store.is_unchanged(&file).unwrap());
    }

    #[test]
    fn test_is_unchanged_detects_edits() {
        let dir = TempDir::new().unwrap();
        let file = manifest(&dir);
        let store = ArtifactStore::new(ArtifactMode::Backup);

        assert!(!store.is_unchanged(&file).unwrap());
        store.record_success(&file, &log("", "")).unwrap();
        std::fs::write(&file, "kind: Secret\n").unwrap();
        assert!(!store.is_unchanged(&file).unwrap());
    }

    #[test]
    fn test_failure_shares_timestamp() {
        let dir = TempDir::new().unwrap();
        let file = manifest(&dir);
        let store = ArtifactStore::default();

        let saved = store
            .record_failure(&file, "20240101_120000", &log("", "denied"))
            .unwrap();

        assert!(!file.exists());
        assert_eq!(
            saved.manifest,
            Some(dir.path().join("m.yaml.20240101_120000.failed"))
        );
        assert_eq!(saved.log, dir.path().join("m.yaml.20240101_120000.log"));
        assert!(std::fs::read_to_string(&saved.log).unwrap().contains("denied"));
    }

    #[test]
    fn test_retry_log_name() {
        let dir = TempDir::new().unwrap();
        let file = manifest(&dir);
        let path = ArtifactStore::default()
            .record_retry(&file, "20240101_120000", 2, &log("", "refused"))
            .unwrap();
        assert_eq!(path, dir.path().join("m.yaml.20240101_120000.retry2.log"));
        assert!(file.exists());
    }
}
