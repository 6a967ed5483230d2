//! Cross-cutting locator configuration.

use std::fmt;
use std::path::{Path, PathBuf};

/// Host used to expand `owner/repo` shorthands.
pub const DEFAULT_SHORTHAND_HOST: &str = "https://github.com";

/// Settings shared read-only by every backend locator.
///
/// Build one at startup, wrap it in an `Arc`, and hand it to the locators
/// that need it. Nothing mutates a policy after construction.
#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    clone_dir: PathBuf,
    credentials: Option<Credentials>,
    insecure_skip_tls: bool,
    shorthand_host: String,
    working_dir: Option<PathBuf>,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            clone_dir: Self::default_clone_dir(),
            credentials: None,
            insecure_skip_tls: false,
            shorthand_host: DEFAULT_SHORTHAND_HOST.to_string(),
            working_dir: None,
        }
    }
}

impl ResolutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<user cache dir>/repoql/clones`, or a relative `.repoql/clones` when
    /// the platform has no cache directory.
    pub fn default_clone_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|p| p.join("repoql").join("clones"))
            .unwrap_or_else(|| PathBuf::from(".repoql").join("clones"))
    }

    pub fn with_clone_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_dir = dir.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_insecure_skip_tls(mut self, skip: bool) -> Self {
        self.insecure_skip_tls = skip;
        self
    }

    pub fn with_shorthand_host(mut self, host: impl Into<String>) -> Self {
        self.shorthand_host = host.into().trim_end_matches('/').to_string();
        self
    }

    /// Directory that relative path references are resolved against.
    /// Defaults to the process working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn insecure_skip_tls(&self) -> bool {
        self.insecure_skip_tls
    }

    pub fn shorthand_host(&self) -> &str {
        &self.shorthand_host
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// HTTP basic-auth credentials for cloning.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Token authentication: hosts such as GitHub accept the token as the
    /// username with an empty password.
    pub fn token(token: impl Into<String>) -> Self {
        Self::basic(token, "")
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}
