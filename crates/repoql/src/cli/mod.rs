//! Command-line interface.

pub mod output;
pub mod summarize;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use repoql_locator::{Credentials, ResolutionPolicy};

use crate::config::Options;

pub use output::OutputFormat;

const AFTER_HELP: &str = r#"TABLES
  files     path, executable, contents          hidden: repository, revision
  commits   hash, message, author_*, committer_*, parents
                                                hidden: repository, revision
  stats     commit_hash, file_path, additions, deletions
                                                hidden: repository, revision, max_count

  Hidden columns double as table-function arguments:
    files('owner/name', 'v1.0')  ==  files WHERE repository = 'owner/name' AND revision = 'v1.0'

FUNCTIONS
  detect_language(path, contents)   (also enry_detect_language)

EXAMPLES
  repoql "SELECT path FROM files WHERE executable = 1"
  repoql "SELECT author_name, count(*) FROM commits GROUP BY 1 ORDER BY 2 DESC"
  repoql "SELECT detect_language(path, contents) AS lang, count(*) FROM files('rust-lang/log') GROUP BY 1"
  repoql summarize commits 'src/%' --start '-30 days'"#;

/// SQL query engine for Git repositories, local or remote
#[derive(Parser, Debug)]
#[command(name = "repoql")]
#[command(version)]
#[command(after_help = AFTER_HELP)]
pub struct Args {
    /// SQL query to execute
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,

    /// Default repository: a path, a URL, or owner/name shorthand
    #[arg(short = 'r', long = "repo", env = "REPOQL_REPO", default_value = ".", global = true)]
    pub repo: String,

    /// Where remote repositories are cloned (defaults to the user cache directory)
    #[arg(long, env = "REPOQL_CLONE_DIR", global = true)]
    pub clone_dir: Option<PathBuf>,

    /// Token sent as the username for HTTPS clones
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    pub github_token: Option<String>,

    /// Skip TLS certificate verification when cloning (any non-empty value)
    #[arg(long, env = "GIT_SSL_NO_VERIFY", global = true)]
    pub git_ssl_no_verify: Option<String>,

    /// Report raw commit identities instead of applying .mailmap
    #[arg(long, global = true)]
    pub skip_mailmap: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Omit header row
    #[arg(short = 'H', long = "no-header")]
    pub no_header: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print summaries of repository activity
    Summarize {
        #[command(subcommand)]
        target: SummarizeTarget,
    },
}

#[derive(Subcommand, Debug)]
pub enum SummarizeTarget {
    /// Print a summary of commit activity in the default repository.
    ///
    /// PATTERN keeps only commits that changed a matching file. It is used
    /// in a SQL LIKE clause, so use '%' as a wildcard.
    Commits {
        /// LIKE pattern on changed file paths
        #[arg(value_name = "PATTERN")]
        pattern: Option<String>,

        /// Start date: YYYY-MM-DD or a SQLite date modifier relative to now ('-7 days')
        #[arg(short, long, allow_hyphen_values = true)]
        start: Option<String>,

        /// End date: YYYY-MM-DD or a SQLite date modifier relative to now
        #[arg(short, long, allow_hyphen_values = true)]
        end: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    /// Resolution policy built from the clone and credential flags.
    pub fn policy(&self) -> ResolutionPolicy {
        let mut policy = ResolutionPolicy::default()
            .with_insecure_skip_tls(self.git_ssl_no_verify.as_deref().is_some_and(|v| !v.is_empty()));
        if let Some(dir) = &self.clone_dir {
            policy = policy.with_clone_dir(dir.clone());
        }
        if let Some(token) = self.github_token.as_deref().filter(|t| !t.is_empty()) {
            policy = policy.with_credentials(Credentials::token(token));
        }
        policy
    }

    pub fn options(&self) -> Options {
        Options::new(self.policy())
            .with_default_repository(self.repo.clone())
            .with_skip_mailmap(self.skip_mailmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_with_flags() {
        let args = Args::try_parse_from([
            "repoql",
            "-r",
            "acme/widgets",
            "-f",
            "csv",
            "-H",
            "SELECT 1",
        ])
        .unwrap();
        assert_eq!(args.query.as_deref(), Some("SELECT 1"));
        assert_eq!(args.repo, "acme/widgets");
        assert_eq!(args.format, OutputFormat::Csv);
        assert!(args.no_header);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_summarize_commits() {
        let args = Args::try_parse_from([
            "repoql",
            "summarize",
            "commits",
            "src/%",
            "--start",
            "-7 days",
            "-e",
            "2024-01-31",
            "--json",
        ])
        .unwrap();
        match args.command {
            Some(Command::Summarize {
                target:
                    SummarizeTarget::Commits {
                        pattern,
                        start,
                        end,
                        json,
                    },
            }) => {
                assert_eq!(pattern.as_deref(), Some("src/%"));
                assert_eq!(start.as_deref(), Some("-7 days"));
                assert_eq!(end.as_deref(), Some("2024-01-31"));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_policy_from_flags() {
        let args = Args::try_parse_from([
            "repoql",
            "--clone-dir",
            "/tmp/clones",
            "--git-ssl-no-verify",
            "1",
            "SELECT 1",
        ])
        .unwrap();
        let policy = args.policy();
        assert_eq!(policy.clone_dir(), std::path::Path::new("/tmp/clones"));
        assert!(policy.insecure_skip_tls());
    }

    #[test]
    fn test_empty_ssl_no_verify_keeps_verification() {
        let args =
            Args::try_parse_from(["repoql", "--git-ssl-no-verify", "", "SELECT 1"]).unwrap();
        assert!(!args.policy().insecure_skip_tls());
    }
}
