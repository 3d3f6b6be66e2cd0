use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use glob_match::glob_match;
use path_jail::Jail;
use tokio::fs;

use crate::protocol::{LibraryError, ResolvedRom};

use super::config::LibraryConfig;
use super::platform;

/// Turns untrusted download names into paths inside the ROM directory
pub struct PathValidator {
    config: Arc<LibraryConfig>,
    jail: Option<Jail>,
}

impl PathValidator {
    pub fn new(config: Arc<LibraryConfig>) -> Self {
        let jail = Jail::new(&config.root).ok();
        if jail.is_none() {
            tracing::warn!(
                "Could not jail {}; every download will be refused",
                config.root.display()
            );
        }
        Self { config, jail }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Resolve a percent-encoded file name to a regular file directly inside
    /// the root.
    ///
    /// Containment is checked on the normalized path before existence, so a
    /// name that escapes the root is refused whether or not its target exists.
    pub async fn resolve(&self, raw_name: &str) -> Result<ResolvedRom, LibraryError> {
        let name = decode_name(raw_name)?;
        let joined = self.config.root.join(&name);
        let lexical = normalize_lexically(&joined);

        let canonical = match fs::canonicalize(&joined).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!("canonicalize {:?} failed: {}", joined, e);
                None
            }
        };

        let candidate = canonical.as_deref().unwrap_or(&lexical);
        if self.escapes_root(candidate) {
            return Err(self.deny(raw_name, "resolves outside the ROM directory"));
        }

        let Some(canonical) = canonical else {
            return Err(not_found(&name));
        };

        if !self.config.follow_symlinks && canonical != lexical {
            return Err(self.deny(raw_name, "traverses a symlink"));
        }

        if canonical.parent() != Some(self.config.root.as_path()) {
            return Err(not_found(&name));
        }

        if !self.is_jailed(&canonical) {
            return Err(self.deny(raw_name, "rejected by root jail"));
        }

        let metadata = fs::metadata(&canonical)
            .await
            .map_err(|_| not_found(&name))?;
        if !metadata.is_file() {
            return Err(not_found(&name));
        }

        let file_name = lexical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if !self.exposes(&lexical, &canonical, &file_name) {
            return Err(not_found(&name));
        }

        Ok(ResolvedRom {
            path: canonical,
            name: file_name,
            size: metadata.len(),
        })
    }

    /// Whether a file may be listed or served under the hidden/exclude rules
    pub fn is_visible(&self, path: &Path, name: &str) -> bool {
        if !self.config.include_hidden && platform::is_hidden(path) {
            return false;
        }
        !self.is_excluded(name)
    }

    /// Whether the entry `name` at `path`, resolving to `target`, may be
    /// listed and downloaded.
    ///
    /// The target must sit directly in the root, and both the entry and
    /// the target must pass the hidden/exclude rules. The catalog and
    /// `resolve` share this check so every listed name downloads.
    pub fn exposes(&self, path: &Path, target: &Path, name: &str) -> bool {
        if target.parent() != Some(self.config.root.as_path()) {
            return false;
        }
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.is_visible(path, name) && self.is_visible(target, &target_name)
    }

    /// Check a file name against the configured exclusion globs
    pub fn is_excluded(&self, name: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, name))
    }

    /// True when `path` is not strictly below the root.
    ///
    /// The root itself counts as contained; callers reject it as not-a-file.
    pub fn escapes_root(&self, path: &Path) -> bool {
        let root = self.config.root.to_string_lossy();
        let candidate = path.to_string_lossy();
        if candidate == root {
            return false;
        }
        let mut prefix = root.trim_end_matches(MAIN_SEPARATOR).to_string();
        prefix.push(MAIN_SEPARATOR);
        !(candidate.starts_with(&prefix) && candidate.len() > prefix.len())
    }

    fn is_jailed(&self, path: &Path) -> bool {
        self.jail
            .as_ref()
            .map(|jail| jail.contains(path).is_ok())
            .unwrap_or(false)
    }

    fn deny(&self, raw_name: &str, reason: &'static str) -> LibraryError {
        tracing::warn!(
            target: "security",
            attempted = %raw_name,
            root = %self.config.root.display(),
            "Download refused: {}",
            reason
        );
        LibraryError::AccessDenied {
            attempted: raw_name.to_string(),
        }
    }
}

fn decode_name(raw_name: &str) -> Result<String, LibraryError> {
    let decoded = urlencoding::decode(raw_name).map_err(|_| LibraryError::InvalidName {
        reason: "not valid UTF-8 once decoded",
    })?;
    if decoded.is_empty() {
        return Err(LibraryError::InvalidName { reason: "empty" });
    }
    if decoded.contains('\0') {
        return Err(LibraryError::InvalidName {
            reason: "contains a NUL byte",
        });
    }
    Ok(decoded.into_owned())
}

fn not_found(name: &str) -> LibraryError {
    LibraryError::NotFound {
        name: name.to_string(),
    }
}

/// Resolve `.` and `..` without touching the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}
