//! ---
//! tsd_section: "04-configuration-orchestration"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Configuration resource bootstrapper and deployment config assembly."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Resource bootstrapper.
//!
//! Materializes the `.env` key-value resource from its template on first use,
//! generating the application secret, and merges it with the orchestrator
//! settings into an immutable [`DeploymentConfig`]. An existing resource is
//! never rewritten.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use tsd_common::config::{env_keys, DeploymentConfig, Settings};

/// Token in the template that receives the generated secret.
pub const SECRET_PLACEHOLDER: &str = "__SECRET_KEY__";
/// Length of generated secrets.
pub const SECRET_LENGTH: usize = 64;
const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";
const FINGERPRINT_PREFIX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} not found", path.display())]
    Missing { path: PathBuf },
    #[error("unable to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to serialise settings: {0}")]
    Serialise(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Outcome of materializing the key-value resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// The resource already existed and was left untouched.
    Existing,
    /// The resource was created from the template.
    Created,
}

/// Result of [`ensure_config`].
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub config: Arc<DeploymentConfig>,
    pub state: ResourceState,
    pub resource_path: PathBuf,
    /// Truncated SHA-256 fingerprint of the application secret.
    pub secret_fingerprint: String,
}

/// Generate an application secret from the OS random source.
pub fn generate_secret() -> String {
    let mut rng = OsRng;
    (0..SECRET_LENGTH)
        .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Short SHA-256 fingerprint suitable for logs.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_PREFIX_LEN);
    encoded
}

/// Insert `secret` into the template body.
///
/// The placeholder token wins; otherwise an existing `SECRET_KEY=` line is
/// replaced, and as a last resort the key is appended.
pub fn render_template(template: &str, secret: &str) -> String {
    if template.contains(SECRET_PLACEHOLDER) {
        return template.replace(SECRET_PLACEHOLDER, secret);
    }
    let assignment = format!("{}=", env_keys::SECRET_KEY);
    let mut replaced = false;
    let mut lines: Vec<String> = template
        .lines()
        .map(|line| {
            if !replaced && line.trim_start().starts_with(&assignment) {
                replaced = true;
                format!("{}{}", assignment, secret)
            } else {
                line.to_owned()
            }
        })
        .collect();
    if !replaced {
        lines.push(format!("{}{}", assignment, secret));
    }
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Create `target` from `template` unless it already exists.
pub fn ensure_resource(template: &Path, target: &Path) -> Result<ResourceState> {
    if target.exists() {
        debug!(path = %target.display(), "configuration resource present; leaving untouched");
        return Ok(ResourceState::Existing);
    }
    if !template.exists() {
        return Err(ConfigError::Missing {
            path: template.to_path_buf(),
        });
    }
    let body = fs::read_to_string(template).map_err(io_error(template))?;
    let secret = generate_secret();
    let rendered = render_template(&body, &secret);

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = match options.open(target) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %target.display(), "configuration resource appeared concurrently");
            return Ok(ResourceState::Existing);
        }
        Err(err) => return Err(io_error(target)(err)),
    };
    file.write_all(rendered.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(io_error(target))?;

    info!(
        path = %target.display(),
        secret_fingerprint = %fingerprint(&secret),
        "configuration resource created"
    );
    Ok(ResourceState::Created)
}

/// Parse the key-value resource without touching the process environment.
pub fn load_resource(path: &Path) -> Result<IndexMap<String, String>> {
    let iter = dotenvy::from_path_iter(path).map_err(|err| match err {
        dotenvy::Error::Io(source) if source.kind() == io::ErrorKind::NotFound => {
            ConfigError::Missing {
                path: path.to_path_buf(),
            }
        }
        dotenvy::Error::Io(source) => ConfigError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let mut values = IndexMap::new();
    for item in iter {
        let (key, value) = item.map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Materialize the resource if needed and build the deployment configuration.
pub fn ensure_config(template: &Path, target: &Path, settings: &Settings) -> Result<Bootstrapped> {
    let state = ensure_resource(template, target)?;
    let values = load_resource(target)?;
    let config = DeploymentConfig::from_parts(settings, &values)
        .map_err(|err| ConfigError::Invalid(format!("{:#}", err)))?;
    let secret_fingerprint = fingerprint(config.application.secret_key.expose());
    debug!(
        path = %target.display(),
        secret_fingerprint = %secret_fingerprint,
        database = %config.database.name,
        "deployment configuration assembled"
    );
    Ok(Bootstrapped {
        config: Arc::new(config),
        state,
        resource_path: target.to_path_buf(),
        secret_fingerprint,
    })
}

/// Load the deployment configuration from an existing resource only.
pub fn load_config(target: &Path, settings: &Settings) -> Result<Arc<DeploymentConfig>> {
    let values = load_resource(target)?;
    let config = DeploymentConfig::from_parts(settings, &values)
        .map_err(|err| ConfigError::Invalid(format!("{:#}", err)))?;
    Ok(Arc::new(config))
}

/// Deterministic SHA-256 hash of the effective settings.
pub fn hash_settings(settings: &Settings) -> Result<String> {
    let serialised = toml::to_string(settings)?;
    let mut hasher = Sha256::new();
    hasher.update(serialised.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Produce a filesystem-safe slug, used for lock and artifact names.
pub fn slugify_name(input: &str) -> String {
    let mut slug = String::new();
    let mut previous_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if matches!(ch, ' ' | '-' | '_' | '.' | '/') && !previous_dash && !slug.is_empty() {
            slug.push('-');
            previous_dash = true;
        }
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}
