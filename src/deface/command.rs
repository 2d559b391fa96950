//! External-command defacer.
use super::Defacer;
use crate::config::DefacerConfig;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Runs a configured masking tool, e.g. `mri_mask {volume} {mask} {output}`.
#[derive(Debug, Clone)]
pub struct CommandDefacer {
    program: PathBuf,
    args: Vec<String>,
    binarize_args: Vec<String>,
}

impl CommandDefacer {
    /// Parse the command line and resolve its program on `PATH`.
    pub fn from_config(config: &DefacerConfig) -> Result<Self> {
        let mut words = shell_words::split(&config.command).context("parse defacer command")?;
        if words.is_empty() {
            return Err(anyhow!("defacer command is empty"));
        }
        let program_name = words.remove(0);
        let program = which::which(&program_name)
            .with_context(|| format!("defacer program {program_name:?} not found on PATH"))?;
        let binarize_args =
            shell_words::split(&config.binarize_args).context("parse defacer binarize_args")?;
        Ok(Self {
            program,
            args: words,
            binarize_args,
        })
    }

    fn argv(&self, volume: &Path, mask: &Path, make_mask: bool, output: &Path) -> Vec<String> {
        let mut argv = Vec::new();
        if make_mask {
            argv.extend(self.binarize_args.iter().cloned());
        }
        argv.extend(self.args.iter().map(|arg| {
            arg.replace("{volume}", &volume.to_string_lossy())
                .replace("{mask}", &mask.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        }));
        argv
    }
}

impl Defacer for CommandDefacer {
    fn transform(&self, volume: &Path, mask: &Path, make_mask: bool, output: &Path) -> Result<()> {
        let argv = self.argv(volume, mask, make_mask, output);
        let start = Instant::now();
        let result = Command::new(&self.program)
            .args(&argv)
            .output()
            .with_context(|| format!("run {}", self.program.display()))?;
        tracing::debug!(
            program = %self.program.display(),
            volume = %volume.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "defacer finished"
        );
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let line = stderr.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                line.trim()
            ));
        }
        Ok(())
    }
}
