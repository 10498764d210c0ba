//! `pkgpilot` — one interface over npm, yarn, pnpm and bun, plus analysis of
//! remote npm packages and GitHub/GitLab repositories.
//!
//! # Layout
//! - [`managers`] — the [`managers::PackageManager`] adapter contract, its four
//!   backends and the [`managers::AdapterRegistry`] that selects one per request.
//! - [`process`] / [`progress`] — streamed subprocess execution feeding a
//!   single-writer [`models::OperationProgress`].
//! - [`audit`] — normalization of the backends' audit reports.
//! - [`remote`] — input classification, content-API fetching and the
//!   vulnerability and update checks, composed by [`remote::RemoteAnalyzer`].
//! - [`lockfile`] — `package-lock.json`, `yarn.lock` and `pnpm-lock.yaml` parsers.
//! - [`registry`] — npm registry and OSV HTTP clients.
//! - [`config`] / [`security`] / [`error`] — configuration, input validation, errors.
//! - [`report`] — terminal and JSON rendering used by the binary.

pub mod audit;
pub mod config;
pub mod error;
pub mod lockfile;
pub mod managers;
pub mod models;
pub mod process;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod report;
pub mod security;
