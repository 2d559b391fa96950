//! Versioned archival of release stores.
//!
//! The store is driven through the `datalad` CLI. Failures are surfaced with
//! the tool's own stderr line and are never retried.
use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Annex backend and large-file rules written into every new dataset.
pub const GITATTRIBUTES: &str = "\
* annex.backend=MD5E
* annex.largefiles=(((mimeencoding=binary)and(largerthan=0))or((include=*gii)or(include=*svg)or(include=*html)))
";

pub const SAVE_MESSAGE: &str = "Prepare for Release";

/// Sibling name used for pushes into the RIA store.
pub const RIA_SIBLING: &str = "ria";
const RIA_STORAGE: &str = "ria-store";

pub trait ArchiveStore {
    /// Initialise `path` as a dataset, keeping existing content.
    fn create(&self, path: &Path) -> Result<()>;
    fn save(&self, path: &Path, message: Option<&str>, jobs: usize) -> Result<()>;
    fn push(&self, path: &Path, remote: &str, jobs: usize) -> Result<()>;
    fn export_archive(&self, path: &Path, target: &Path) -> Result<()>;
    fn create_remote(&self, path: &Path, url: &str, alias: &str) -> Result<()>;
}

pub struct Datalad {
    program: PathBuf,
}

impl Datalad {
    pub fn locate() -> Result<Self> {
        let program = which::which("datalad").context("datalad not found on PATH")?;
        Ok(Self { program })
    }

    fn run(&self, args: Vec<OsString>) -> Result<()> {
        let subcommand = args
            .first()
            .map(|arg| arg.to_string_lossy().to_string())
            .unwrap_or_default();
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("run {} {subcommand}", self.program.display()))?;
        tracing::info!(
            command = %subcommand,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "datalad finished"
        );
        if !output.status.success() {
            return Err(anyhow!(
                "datalad {subcommand} failed: {}",
                first_stderr_line(&output.stderr)
            ));
        }
        Ok(())
    }
}

fn first_stderr_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn argv<I, S>(parts: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    parts.into_iter().map(Into::into).collect()
}

impl ArchiveStore for Datalad {
    fn create(&self, path: &Path) -> Result<()> {
        self.run(argv([
            OsString::from("create"),
            "--force".into(),
            path.into(),
        ]))
    }

    fn save(&self, path: &Path, message: Option<&str>, jobs: usize) -> Result<()> {
        let mut args = argv([
            OsString::from("save"),
            "-d".into(),
            path.into(),
            "-J".into(),
            jobs.to_string().into(),
        ]);
        if let Some(message) = message {
            args.extend(argv(["-m", message]));
        }
        self.run(args)
    }

    fn push(&self, path: &Path, remote: &str, jobs: usize) -> Result<()> {
        self.run(argv([
            OsString::from("push"),
            "-d".into(),
            path.into(),
            "--to".into(),
            remote.into(),
            "-J".into(),
            jobs.to_string().into(),
        ]))
    }

    fn export_archive(&self, path: &Path, target: &Path) -> Result<()> {
        self.run(argv([
            OsString::from("export-archive-ora"),
            "-d".into(),
            path.into(),
            target.into(),
        ]))
    }

    fn create_remote(&self, path: &Path, url: &str, alias: &str) -> Result<()> {
        self.run(argv([
            OsString::from("create-sibling-ria"),
            "-d".into(),
            path.into(),
            "-s".into(),
            RIA_SIBLING.into(),
            "--alias".into(),
            alias.into(),
            "--storage-name".into(),
            RIA_STORAGE.into(),
            "--new-store-ok".into(),
            url.into(),
        ]))
    }
}
