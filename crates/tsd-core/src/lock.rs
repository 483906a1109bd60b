//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "File-based exclusive run locks keyed by deployment target."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};
use tsd_config::slugify_name;

use crate::error::{DeployError, Result};

/// Operation classes that must not overlap against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClass {
    Deploy,
    /// Shared by backup, restore and artifact deletion.
    Backup,
}

impl LockClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockClass::Deploy => "deploy",
            LockClass::Backup => "backup",
        }
    }

    fn file_suffix(&self) -> &'static str {
        match self {
            LockClass::Deploy => "deploy",
            LockClass::Backup => "backup",
        }
    }
}

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `target`, failing fast if another run holds it.
    pub fn acquire(directory: &Path, target: &str, class: LockClass) -> Result<Self> {
        fs::create_dir_all(directory).map_err(|err| {
            DeployError::Config(format!(
                "unable to create lock directory {}: {}",
                directory.display(),
                err
            ))
        })?;
        let path = directory.join(format!("{}.{}.lock", slugify_name(target), class.file_suffix()));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(DeployError::ConflictingOperation {
                    operation: class.as_str(),
                    target: target.to_owned(),
                    path,
                });
            }
            Err(err) => {
                return Err(DeployError::Config(format!(
                    "unable to create lock {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        let _ = writeln!(file, "pid={} acquired_at={}", std::process::id(), Utc::now().to_rfc3339());
        debug!(lock = %path.display(), operation = class.as_str(), "run lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}
