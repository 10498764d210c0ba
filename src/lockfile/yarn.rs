use regex::Regex;
use tracing::debug;

/// Parse `yarn.lock` in the line-based yarn classic format, plus the
/// `version: x` spelling used by yarn berry.
pub fn parse(content: &str) -> Vec<(String, String)> {
    match collect_entries(content) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "yarn.lock parser setup failed");
            Vec::new()
        }
    }
}

fn collect_entries(content: &str) -> Result<Vec<(String, String)>, regex::Error> {
    let version_re = Regex::new(r#"^\s+version:?\s+"?([^"\s]+)"?\s*$"#)?;
    let mut entries = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        // Skip comments, blanks and anything indented outside an entry
        if line.trim().is_empty()
            || line.starts_with('#')
            || line.starts_with(' ')
            || line.starts_with('\t')
        {
            continue;
        }

        // Header: `foo@^1.0.0, foo@^1.1.0:` or `"@scope/foo@npm:^1.0.0":`
        let Some(header) = line.trim_end().strip_suffix(':') else {
            continue;
        };
        let first_alias = header.split(',').next().unwrap_or(header).trim().trim_matches('"');
        let Some(name) = package_name(first_alias) else {
            continue;
        };
        if first_alias.contains("@workspace:") {
            continue;
        }

        // Look ahead inside the indented block for `version "x.y.z"`
        let mut version = None;
        while let Some(next) = lines.peek() {
            if !next.starts_with(' ') && !next.starts_with('\t') {
                break;
            }
            if version.is_none() {
                if let Some(caps) = version_re.captures(next) {
                    version = Some(caps[1].to_string());
                }
            }
            lines.next();
        }

        if let Some(version) = version {
            entries.push((name.to_string(), version));
        }
    }

    Ok(entries)
}

/// Text before the first `@` that is not the scope marker.
fn package_name(alias: &str) -> Option<&str> {
    let at = alias.char_indices().skip(1).find(|&(_, c)| c == '@')?.0;
    let name = &alias[..at];
    (!name.is_empty() && name != "__metadata").then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yarn_classic() {
        let content = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1


"@babel/code-frame@^7.0.0", "@babel/code-frame@^7.10.4":
  version "7.12.13"
  resolved "https://registry.yarnpkg.com/@babel/code-frame/-/code-frame-7.12.13.tgz"
  dependencies:
    "@babel/highlight" "^7.12.13"

lodash@^4.17.20, lodash@^4.17.21:
  version "4.17.21"
  resolved "https://registry.yarnpkg.com/lodash/-/lodash-4.17.21.tgz"
"#;
        let entries = parse(content);
        assert_eq!(
            entries,
            vec![
                ("@babel/code-frame".to_string(), "7.12.13".to_string()),
                ("lodash".to_string(), "4.17.21".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_yarn_berry() {
        let content = r#"__metadata:
  version: 6
  cacheKey: 8

"lodash@npm:^4.17.21":
  version: 4.17.21
  resolution: "lodash@npm:4.17.21"

"my-app@workspace:.":
  version: 0.0.0-use.local
"#;
        let entries = parse(content);
        assert_eq!(entries, vec![("lodash".to_string(), "4.17.21".to_string())]);
    }

    #[test]
    fn test_truncated_entry_is_skipped() {
        let content = "left-pad@^1.3.0:\n  version \"1.3.0\"\n\nbroken@^1.0.0:\n  resolved \"x\"";
        let entries = parse(content);
        assert_eq!(entries, vec![("left-pad".to_string(), "1.3.0".to_string())]);
    }
}
