//! Prebuilt dependency template
//!
//! Compiling the heavy dependency from scratch dominates build time, so it is
//! built once into a shared template that every workspace links against.
//!
//! # States
//!
//! | State | On disk | Meaning |
//! |-------|---------|---------|
//! | Missing | no ready marker, no live holder | Nothing usable yet |
//! | Locked | lock file names a live process | Some process is building |
//! | Ready | ready marker present | Artifacts can be reused |
//!
//! Builders serialize on an OS advisory lock on `<template>.lock`. The file
//! itself is never removed, so every builder locks the same inode; the holder
//! writes its pid into it and truncates it on release. A waiter that gives up
//! after `lock_wait` builds anyway; rebuilding is idempotent so the race is
//! benign.

use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::process::{CommandRunner, CommandSpec};
use crate::render::{render, Vars};
use chrono::Utc;
use fs4::tokio::AsyncFileExt;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Marker written once the template build succeeded
const READY_MARKER: &str = ".kiln-ready";

/// Lifecycle state of the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateState {
    Missing,
    Locked,
    Ready,
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Locked => write!(f, "locked"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Exclusive hold on the template build, released on drop
pub struct TemplateLock {
    path: PathBuf,
    file: std::fs::File,
}

impl Drop for TemplateLock {
    fn drop(&mut self) {
        // Clear the holder while still locked; closing the file unlocks
        if let Err(e) = self.file.set_len(0) {
            warn!("Failed to clear template lock {}: {}", self.path.display(), e);
        }
    }
}

/// Shared, lazily built dependency template
#[derive(Debug, Clone)]
pub struct TemplateCache {
    root: PathBuf,
    lock_path: PathBuf,
    build_command: String,
    build_args: Vec<String>,
    env: Vec<(String, String)>,
    manifest_file: String,
    manifest: String,
    source_file: String,
    source: String,
    build_timeout: Duration,
    lock_wait: Duration,
}

impl TemplateCache {
    /// Create the template described by a config
    pub fn from_config(config: &Config) -> Self {
        let root = ConfigManager::template_dir(config);
        let root_str = root.display().to_string();
        let dependency = &config.toolchain.dependency;
        let vars = Vars::new()
            .with("template", &root_str)
            .with("dependency_name", &dependency.name)
            .with("dependency_remote", &dependency.remote);

        Self {
            lock_path: lock_path_for(&root),
            build_command: render(&config.toolchain.build_command, &vars),
            build_args: config
                .template
                .build_args
                .iter()
                .map(|arg| render(arg, &vars))
                .collect(),
            env: config
                .toolchain
                .env
                .iter()
                .map(|(k, v)| (k.clone(), render(v, &vars)))
                .collect(),
            manifest_file: config.toolchain.manifest_file.clone(),
            manifest: render(&config.template.manifest, &vars),
            source_file: config.template.source_file.clone(),
            source: render(&config.template.source, &vars),
            build_timeout: Duration::from_secs(config.template.build_timeout_secs),
            lock_wait: Duration::from_secs(config.template.lock_wait_secs),
            root,
        }
    }

    /// Template root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a finished build is on disk
    pub fn is_ready(&self) -> bool {
        self.root.join(READY_MARKER).is_file()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TemplateState {
        if self.is_ready() {
            TemplateState::Ready
        } else if self.lock_holder().is_some_and(process_alive) {
            TemplateState::Locked
        } else {
            TemplateState::Missing
        }
    }

    /// Make sure the template is built, building it if necessary
    ///
    /// Returns whether this call performed the build.
    pub async fn ensure(
        &self,
        runner: &dyn CommandRunner,
        cancel: &CancellationToken,
    ) -> KilnResult<bool> {
        if self.is_ready() {
            return Ok(false);
        }

        let _lock = self.acquire_lock().await?;

        // Another process may have finished while we waited
        if self.is_ready() {
            debug!("Template became ready while waiting for the lock");
            return Ok(false);
        }

        let started = Instant::now();
        info!(root = %self.root.display(), "Building dependency template");

        match self.build(runner, cancel).await {
            Ok(()) => {
                info!(
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Dependency template ready"
                );
                Ok(true)
            }
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    /// Wait for the build lock, or give up after `lock_wait` and go ahead
    async fn acquire_lock(&self) -> KilnResult<Option<TemplateLock>> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .await
            .map_err(|e| KilnError::io(format!("opening {}", self.lock_path.display()), e))?;

        let locking = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file));

        match tokio::time::timeout(self.lock_wait, locking).await {
            Ok(Ok(Ok(file))) => {
                debug!(lock = %self.lock_path.display(), "Acquired template lock");
                let mut file = file.into_std().await;
                file.set_len(0)
                    .and_then(|()| writeln!(file, "{}", std::process::id()))
                    .map_err(|e| {
                        KilnError::io(format!("writing {}", self.lock_path.display()), e)
                    })?;
                Ok(Some(TemplateLock {
                    path: self.lock_path.clone(),
                    file,
                }))
            }
            Ok(Ok(Err(e))) => Err(KilnError::io(
                format!("locking {}", self.lock_path.display()),
                e,
            )),
            Ok(Err(e)) => Err(KilnError::Internal(format!("lock task failed: {}", e))),
            Err(_) => {
                warn!(
                    wait_secs = self.lock_wait.as_secs(),
                    "Template lock still held, building without it"
                );
                Ok(None)
            }
        }
    }

    /// Pid recorded by the current lock holder, if any
    fn lock_holder(&self) -> Option<u32> {
        std::fs::read_to_string(&self.lock_path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    async fn build(&self, runner: &dyn CommandRunner, cancel: &CancellationToken) -> KilnResult<()> {
        // Start from a clean slate; a previous attempt may have crashed halfway
        self.discard().await;

        let source_path = self.root.join(&self.source_file);
        if let Some(parent) = source_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
        }

        let manifest_path = self.root.join(&self.manifest_file);
        fs::write(&manifest_path, &self.manifest)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", manifest_path.display()), e))?;
        fs::write(&source_path, &self.source)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", source_path.display()), e))?;

        let spec = CommandSpec::new("template build", &self.build_command, &self.root)
            .args(self.build_args.iter().cloned())
            .envs(self.env.iter().cloned());

        let result = match runner.run(&spec, self.build_timeout, cancel).await {
            Ok(result) => result,
            Err(KilnError::Timeout { seconds, .. }) => {
                return Err(KilnError::TemplateBuild(format!(
                    "timed out after {:.0}s",
                    seconds
                )))
            }
            Err(e) => return Err(e),
        };

        if !result.success() {
            return Err(KilnError::TemplateBuild(result.combined_output()));
        }

        let marker = self.root.join(READY_MARKER);
        fs::write(&marker, Utc::now().to_rfc3339())
            .await
            .map_err(|e| KilnError::io(format!("writing {}", marker.display()), e))?;
        Ok(())
    }

    /// Remove the template directory, logging rather than failing
    async fn discard(&self) {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(root = %self.root.display(), "Removed template directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove template {}: {}", self.root.display(), e),
        }
    }

    /// Delete the template so the next request rebuilds it
    pub async fn clear(&self) -> KilnResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KilnError::io(
                format!("removing template {}", self.root.display()),
                e,
            )),
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the pid exists and may be signalled
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn lock_path_for(root: &Path) -> PathBuf {
    let mut name = root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "template".into());
    name.push(".lock");
    root.with_file_name(name)
}
