//! # repoql
//!
//! Query git repositories, local or remote, using SQL.
//!
//! repoql registers git data as SQLite virtual tables. Rows are produced
//! lazily while a statement steps, straight from the object database, and
//! the repository a table reads is chosen per query: a path, a clone URL,
//! or an `owner/name` shorthand, resolved (and cloned if necessary) by
//! [`repoql_locator`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use repoql::{Engine, Options, Result};
//!
//! fn main() -> Result<()> {
//!     let engine = Engine::new(Options::default())?;
//!
//!     let result = engine.execute(
//!         "SELECT path, executable FROM files('.', 'HEAD') ORDER BY path",
//!     )?;
//!
//!     println!("Found {} files", result.row_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Available Tables
//!
//! - `files`: blobs in the tree of a revision
//! - `commits`: commits reachable from a revision, newest first
//! - `stats`: lines added and removed per file and commit
//!
//! Each takes hidden `repository` and `revision` columns that can be passed
//! as table-function arguments; `stats` also takes `max_count`. The scalar `detect_language(path, contents)`
//! is available in every query.

pub mod cli;
pub mod config;
pub mod error;
pub mod sql;
pub mod tables;

pub use config::{Options, Settings};
pub use error::{RepoqlError, Result};
pub use sql::{CancelHandle, Engine, QueryResult};
