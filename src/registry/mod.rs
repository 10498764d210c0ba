//! Async HTTP clients for the upstream registries used by remote analysis.
//!
//! - [`npm`] reads packuments from an npm-compatible registry. `Ok(None)` means
//!   the package does not exist; `Err` is a transport or server failure.
//! - [`osv`] queries the OSV vulnerability database.

pub mod npm;
pub mod osv;
