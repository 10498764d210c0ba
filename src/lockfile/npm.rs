use serde_json::Value;
use tracing::debug;

const NODE_MODULES: &str = "node_modules/";

/// Parse `package-lock.json`.
///
/// Lockfile v2/v3 carry a flat `packages` map keyed by install path; only paths
/// with exactly one `node_modules/` segment are direct dependencies. Lockfile
/// v1 only has the nested `dependencies` map, whose top-level keys are used.
pub fn parse(content: &str) -> Vec<(String, String)> {
    let json: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "package-lock.json is not valid JSON");
            return Vec::new();
        }
    };

    if let Some(packages) = json.get("packages").and_then(Value::as_object) {
        return packages
            .iter()
            .filter(|(path, _)| path.matches(NODE_MODULES).count() == 1)
            .filter_map(|(path, info)| {
                // "node_modules/@scope/foo" → "@scope/foo"; workspace paths like
                // "packages/a/node_modules/foo" → "foo"
                let start = path.find(NODE_MODULES)? + NODE_MODULES.len();
                let name = &path[start..];
                Some((name.to_string(), version_of(info)))
            })
            .collect();
    }

    json.get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(name, info)| (name.clone(), version_of(info)))
                .collect()
        })
        .unwrap_or_default()
}

fn version_of(info: &Value) -> String {
    info.get("version")
        .and_then(Value::as_str)
        .unwrap_or("*")
        .to_string()
}
