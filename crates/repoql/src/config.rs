//! Engine configuration.
//!
//! Everything a table needs at open time travels in an [`Options`] value
//! handed to [`Engine::new`](crate::Engine::new). There is no global state;
//! two engines in one process can point at different default repositories.

use std::sync::Arc;

use repoql_locator::{default_chain, Locator, ResolutionPolicy};

/// Query defaults read by tables when they open.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Repository used when a query does not name one. `None` means the
    /// process working directory.
    pub default_repository: Option<String>,
    /// Report raw commit identities instead of rewriting them through
    /// `.mailmap`.
    pub skip_mailmap: bool,
}

impl Settings {
    /// The reference to resolve when a query passes `repository` (or not).
    pub fn effective_repository<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .or(self.default_repository.as_deref())
            .unwrap_or(".")
    }
}

/// Settings, resolution policy, and the locator chain shared by all tables.
#[derive(Clone)]
pub struct Options {
    pub settings: Settings,
    pub policy: Arc<ResolutionPolicy>,
    pub locator: Arc<dyn Locator>,
}

impl Options {
    /// Uses [`default_chain`]: filesystem then clone, logged and cached.
    pub fn new(policy: ResolutionPolicy) -> Self {
        let policy = Arc::new(policy);
        Self {
            settings: Settings::default(),
            locator: Arc::new(default_chain(policy.clone())),
            policy,
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_default_repository(mut self, repository: impl Into<String>) -> Self {
        self.settings.default_repository = Some(repository.into());
        self
    }

    pub fn with_skip_mailmap(mut self, skip: bool) -> Self {
        self.settings.skip_mailmap = skip;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(ResolutionPolicy::default())
    }
}
