use std::collections::BTreeMap;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::Result;
use crate::models::NpmPackageMeta;

/// `GET {registry}/{name}`: the full packument. `Ok(None)` on 404.
///
/// Scoped names are sent encoded: `@scope/pkg` → `%40scope%2Fpkg`.
pub async fn fetch_packument(client: &Client, registry: &str, name: &str) -> Result<Option<Value>> {
    let url = format!(
        "{}/{}",
        registry.trim_end_matches('/'),
        urlencoding::encode(name)
    );

    let response = client
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let data: Value = response.error_for_status()?.json().await?;
    Ok(Some(data))
}

/// Metadata of the `latest` dist-tag, including its declared dependencies.
pub async fn fetch_package_meta(
    client: &Client,
    registry: &str,
    name: &str,
) -> Result<Option<NpmPackageMeta>> {
    let Some(data) = fetch_packument(client, registry, name).await? else {
        return Ok(None);
    };
    Ok(meta_from_packument(name, &data))
}

/// The `latest` dist-tag of a package, if published.
pub async fn fetch_latest_version(
    client: &Client,
    registry: &str,
    name: &str,
) -> Result<Option<String>> {
    let data = fetch_packument(client, registry, name).await?;
    Ok(data.as_ref().and_then(latest_tag).map(str::to_string))
}

fn latest_tag(data: &Value) -> Option<&str> {
    data.get("dist-tags")
        .and_then(|d| d.get("latest"))
        .and_then(Value::as_str)
}

pub(crate) fn meta_from_packument(name: &str, data: &Value) -> Option<NpmPackageMeta> {
    let latest = latest_tag(data)?;
    let manifest = data.get("versions").and_then(|vs| vs.get(latest));
    let field = |key: &str| {
        manifest
            .and_then(|m| m.get(key))
            .or_else(|| data.get(key))
    };

    Some(NpmPackageMeta {
        name: data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string(),
        version: latest.to_string(),
        description: field("description").and_then(Value::as_str).map(str::to_string),
        // Old packages use `{ "type": "MIT" }`.
        license: field("license").and_then(|l| {
            l.as_str()
                .or_else(|| l.get("type").and_then(Value::as_str))
                .map(str::to_string)
        }),
        homepage: field("homepage").and_then(Value::as_str).map(str::to_string),
        repository: field("repository").and_then(|r| {
            r.as_str()
                .or_else(|| r.get("url").and_then(Value::as_str))
                .map(str::to_string)
        }),
        dependencies: string_map(manifest.and_then(|m| m.get("dependencies"))),
        dev_dependencies: string_map(manifest.and_then(|m| m.get("devDependencies"))),
    })
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
