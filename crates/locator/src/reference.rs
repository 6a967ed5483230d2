//! Repository reference classification and cache keys.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{LocateError, Result};
use crate::policy::ResolutionPolicy;

/// Canonical identity of a physical repository, used for memoization.
///
/// Local references are keyed by the canonical root of the repository that
/// encloses them (or the path itself when none does), so every directory of
/// one checkout shares a key. Remotes are keyed by a URL with lowercase
/// scheme and host, no credentials, and no trailing `.git` or `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub(crate) String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of thing a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// An existing path on disk (canonicalized).
    LocalPath(PathBuf),
    /// `owner/repo`, expanded against the policy's shorthand host.
    Shorthand {
        owner: String,
        name: String,
        url: String,
    },
    /// Anything else, used as a clone URL verbatim.
    RemoteUrl(String),
}

impl ReferenceKind {
    /// The URL a clone locator should fetch, if this is a remote reference.
    pub fn clone_url(&self) -> Option<&str> {
        match self {
            ReferenceKind::LocalPath(_) => None,
            ReferenceKind::Shorthand { url, .. } => Some(url),
            ReferenceKind::RemoteUrl(url) => Some(url),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            ReferenceKind::LocalPath(path) => Some(path),
            _ => None,
        }
    }
}

/// A normalized reference, ready to hand to a [`Locator`](crate::Locator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub raw: String,
    pub key: CacheKey,
    pub kind: ReferenceKind,
}

fn shorthand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9-]*)/([A-Za-z0-9._-]+)$").expect("valid shorthand regex")
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://(?:[^@/]*@)?([^/]*)(.*)$").expect("valid url regex")
    })
}

fn scp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[^@/:]+@)?([^@/:]+):(.+)$").expect("valid scp regex"))
}

/// Classifies `raw` and derives its cache key.
///
/// Never touches the network. The only I/O is checking whether `raw` names an
/// existing path and finding the repository around it. An existing path
/// always wins: `acme/widgets` is a
/// local directory if one exists relative to the working directory, and a
/// shorthand otherwise.
pub fn normalize(raw: &str, policy: &ResolutionPolicy) -> Result<Target> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LocateError::InvalidReference(raw.to_string()));
    }

    if let Some(path) = existing_path(trimmed, policy) {
        let root = repository_root(&path).unwrap_or_else(|| path.clone());
        return Ok(Target {
            raw: raw.to_string(),
            key: CacheKey(root.display().to_string()),
            kind: ReferenceKind::LocalPath(path),
        });
    }

    if let Some(caps) = shorthand_re().captures(trimmed) {
        let owner = caps[1].to_string();
        let name = caps[2].trim_end_matches(".git").to_string();
        if !name.is_empty() && name != "." && name != ".." {
            let url = format!("{}/{}/{}.git", policy.shorthand_host(), owner, name);
            return Ok(Target {
                raw: raw.to_string(),
                key: CacheKey(canonical_url(&url).unwrap_or_else(|| url.clone())),
                kind: ReferenceKind::Shorthand { owner, name, url },
            });
        }
    }

    Ok(Target {
        raw: raw.to_string(),
        key: CacheKey(canonical_url(trimmed).unwrap_or_else(|| trimmed.to_string())),
        kind: ReferenceKind::RemoteUrl(trimmed.to_string()),
    })
}

fn existing_path(raw: &str, policy: &ResolutionPolicy) -> Option<PathBuf> {
    if raw.contains("://") {
        return None;
    }
    let expanded = shellexpand::tilde(raw);
    let path = Path::new(expanded.as_ref());
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match policy.working_dir() {
            Some(dir) => dir.join(path),
            None => std::env::current_dir().ok()?.join(path),
        }
    };
    if !candidate.exists() {
        return None;
    }
    Some(candidate.canonicalize().unwrap_or(candidate))
}

/// The working tree root (or git dir, when bare) of the repository that
/// `path` lies in.
fn repository_root(path: &Path) -> Option<PathBuf> {
    let git_dir = git2::Repository::discover_path(path, std::iter::empty::<&OsStr>()).ok()?;
    let root = match git_dir.file_name() {
        Some(name) if name == ".git" => git_dir.parent()?.to_path_buf(),
        _ => git_dir,
    };
    root.canonicalize().ok()
}

/// Whether `reference` names something a clone can fetch: a URL with a
/// scheme, or scp-style `host:path`.
pub(crate) fn is_remote_url(reference: &str) -> bool {
    url_re().is_match(reference) || scp_re().is_match(reference)
}

/// Lowercases scheme and host, drops credentials, and strips a trailing
/// `.git` and `/`. scp-style `user@host:path` becomes `ssh://host/path`.
fn canonical_url(url: &str) -> Option<String> {
    let (scheme, host, path) = if let Some(caps) = url_re().captures(url) {
        (
            caps[1].to_ascii_lowercase(),
            caps[2].to_ascii_lowercase(),
            caps[3].to_string(),
        )
    } else if let Some(caps) = scp_re().captures(url) {
        (
            "ssh".to_string(),
            caps[1].to_ascii_lowercase(),
            format!("/{}", caps[2].trim_start_matches('/')),
        )
    } else {
        return None;
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path).trim_end_matches('/');
    Some(format!("{scheme}://{host}{path}"))
}
