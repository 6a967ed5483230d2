//! Clone remote repositories into a local cache directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::build::RepoBuilder;
use git2::{
    CertificateCheckStatus, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions,
    RemoteCallbacks, Repository,
};
use tokio_util::sync::CancellationToken;

use crate::error::{LocateError, Result};
use crate::handle::RepositoryHandle;
use crate::policy::ResolutionPolicy;
use crate::reference::{is_remote_url, CacheKey, Target};
use crate::Locator;

/// Clones remote references (URLs and shorthands) into
/// `<clone dir>/<name>-<hash>` and opens the result.
///
/// An existing clone for the same key is reused as-is; there is no fetch.
/// Clones are bare since tables only read the object store.
///
/// A clone is written to a hidden staging directory next to its destination
/// and renamed into place once complete, so the destination only ever holds
/// a finished clone. A directory already at the destination is never
/// modified or removed.
pub struct CloneLocator {
    policy: Arc<ResolutionPolicy>,
}

impl CloneLocator {
    pub fn new(policy: Arc<ResolutionPolicy>) -> Self {
        Self { policy }
    }

    /// Where the clone for `key` lives. Deterministic, and distinct keys
    /// never share a directory.
    pub fn destination(&self, key: &CacheKey) -> PathBuf {
        self.policy.clone_dir().join(clone_dir_name(key))
    }

    fn clone_into(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<Repository, git2::Error> {
        let mut callbacks = RemoteCallbacks::new();

        if let Some(creds) = self.policy.credentials() {
            // libgit2 keeps asking while the server rejects; answer once.
            let mut offered = false;
            callbacks.credentials(move |_url, _username, allowed| {
                if offered || !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                    return Err(git2::Error::new(
                        ErrorCode::Auth,
                        ErrorClass::Http,
                        "credentials rejected",
                    ));
                }
                offered = true;
                Cred::userpass_plaintext(creds.username(), creds.password())
            });
        }

        if self.policy.insecure_skip_tls() {
            callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
        }

        // Returning false from a progress callback aborts the transfer.
        callbacks.transfer_progress(|_| !cancel.is_cancelled());
        callbacks.sideband_progress(|_| !cancel.is_cancelled());

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);

        RepoBuilder::new()
            .bare(true)
            .fetch_options(fetch)
            .clone(url, dest)
    }
}

impl Locator for CloneLocator {
    fn name(&self) -> &'static str {
        "clone"
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        let Some(url) = target.kind.clone_url() else {
            return Err(LocateError::NotFound(format!(
                "{} is a local path, not a remote",
                target.raw
            )));
        };
        if !is_remote_url(url) {
            return Err(LocateError::NotFound(format!(
                "{url} is neither an existing path nor a remote URL"
            )));
        }
        if cancel.is_cancelled() {
            return Err(LocateError::Cancelled(target.key.to_string()));
        }

        let dest = self.destination(&target.key);
        if dest.exists() {
            tracing::debug!(key = %target.key, dest = %dest.display(), "reusing existing clone");
            return open_clone(&target.key, &dest);
        }
        let clone_dir = self.policy.clone_dir();
        fs::create_dir_all(clone_dir).map_err(|e| LocateError::clone_dir(clone_dir, e))?;

        // Removed on drop, which covers failure, cancellation and a lost race.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", clone_dir_name(&target.key)))
            .tempdir_in(clone_dir)
            .map_err(|e| LocateError::clone_dir(clone_dir, e))?;

        tracing::info!(key = %target.key, dest = %dest.display(), "cloning repository");
        let repo = self
            .clone_into(cancel, url, staging.path())
            .map_err(|e| classify(url, &target.key, cancel, &e))?;
        drop(repo);

        match fs::rename(staging.path(), &dest) {
            Ok(()) => {}
            Err(e) if dest.exists() => {
                tracing::debug!(dest = %dest.display(), error = %e, "another clone finished first");
            }
            Err(e) => return Err(LocateError::clone_dir(&dest, e)),
        }
        open_clone(&target.key, &dest)
    }
}

fn open_clone(key: &CacheKey, dest: &Path) -> Result<Arc<RepositoryHandle>> {
    let repo = Repository::open(dest).map_err(|e| {
        LocateError::CloneDir(format!(
            "{} exists but is not a repository ({}); remove it to clone again",
            dest.display(),
            e.message()
        ))
    })?;
    Ok(Arc::new(RepositoryHandle::new(key.clone(), repo)))
}

fn clone_dir_name(key: &CacheKey) -> String {
    let hash = blake3::hash(key.as_str().as_bytes()).to_hex();
    let tail: String = key
        .as_str()
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("repo")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", tail, &hash.as_str()[..16])
}

fn classify(url: &str, key: &CacheKey, cancel: &CancellationToken, err: &git2::Error) -> LocateError {
    if cancel.is_cancelled() || err.code() == ErrorCode::User {
        return LocateError::Cancelled(key.to_string());
    }
    let reason = err.message().to_string();
    match err.code() {
        ErrorCode::Auth => LocateError::AuthenticationRejected {
            url: url.to_string(),
            reason,
        },
        ErrorCode::NotFound => LocateError::NotFound(format!("{url}: {reason}")),
        // No transport for this scheme; retrying cannot help.
        _ if err.class() == ErrorClass::Net && reason.contains("unsupported URL protocol") => {
            LocateError::NotFound(format!("{url}: {reason}"))
        }
        _ => LocateError::RemoteUnavailable {
            url: url.to_string(),
            reason,
        },
    }
}
