// src/docs/builder.rs

//! Documentation builders

use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const YARDOC: &str = "yardoc";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Turns unpacked gem sources into a static documentation site
pub trait DocBuilder: Send + Sync {
    /// Build docs for the sources in `source`, writing the site to `output`
    fn build(&self, source: &Path, output: &Path) -> Result<()>;
}

/// Runs `yardoc` from the `PATH`
#[derive(Debug, Clone)]
pub struct YardBuilder {
    timeout: Duration,
}

impl YardBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DocBuilder for YardBuilder {
    fn build(&self, source: &Path, output: &Path) -> Result<()> {
        let yardoc = which::which(YARDOC)
            .map_err(|e| Error::DocGenerationError(format!("{} not found in PATH: {}", YARDOC, e)))?;
        debug!("Running {} in {}", yardoc.display(), source.display());

        let mut child = Command::new(&yardoc)
            .arg("-o")
            .arg(output)
            .current_dir(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::DocGenerationError(format!("Failed to start {}: {}", YARDOC, e)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return if status.success() {
                    Ok(())
                } else {
                    Err(Error::DocGenerationError(format!("{} exited with {}", YARDOC, status)))
                };
            }
            if Instant::now() >= deadline {
                warn!("{} exceeded {:?}, killing it", YARDOC, self.timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::DocGenerationError(format!(
                    "{} did not finish within {:?}",
                    YARDOC, self.timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
