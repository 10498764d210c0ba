use futures::future::join_all;
use reqwest::Client;
use tracing::debug;

use crate::models::{PackageRef, RemoteUpdateInfo};
use crate::registry::npm;

/// Look up the latest version of every package on `registry`, one request
/// each, in parallel.
///
/// A failed lookup reports `has_update: false` with `latest_version` equal to
/// the current version; it never affects the other packages.
pub async fn check_updates(
    client: &Client,
    registry: &str,
    packages: &[PackageRef],
) -> Vec<RemoteUpdateInfo> {
    let lookups = packages
        .iter()
        .map(|package| check_one(client, registry, package));
    join_all(lookups).await
}

async fn check_one(client: &Client, registry: &str, package: &PackageRef) -> RemoteUpdateInfo {
    let latest = match npm::fetch_latest_version(client, registry, &package.name).await {
        Ok(Some(latest)) => latest,
        Ok(None) => {
            debug!(package = %package.name, "no latest version published");
            return unchanged(package);
        }
        Err(e) => {
            debug!(package = %package.name, error = %e, "latest version lookup failed");
            return unchanged(package);
        }
    };
    RemoteUpdateInfo {
        name: package.name.clone(),
        current_version: package.version.clone(),
        has_update: has_update(&package.version, &latest),
        latest_version: latest,
    }
}

fn unchanged(package: &PackageRef) -> RemoteUpdateInfo {
    RemoteUpdateInfo {
        name: package.name.clone(),
        current_version: package.version.clone(),
        latest_version: package.version.clone(),
        has_update: false,
    }
}

/// Whether `latest` should be reported as newer than the declared `current`.
///
/// This is a textual check, not semver range satisfaction: `^1.0.0` against
/// `1.5.0` reports an update even though the range already admits it, and
/// `1.0.0 || 1.5.0` against `1.5.0` does not.
pub fn has_update(current: &str, latest: &str) -> bool {
    latest != current && !current.contains(latest)
}
