use regex::Regex;
use tracing::debug;

/// Parse `pnpm-lock.yaml` by scanning the top-level `packages:` block.
///
/// Entry keys differ across lockfile versions: `/name@1.0.0:` (v6),
/// `name@1.0.0:` and `'@scope/name@1.0.0':` (v9) and `/name/1.0.0:` (v5).
/// Peer-dependency suffixes such as `(react@18.2.0)` or `_react@18.2.0` are dropped.
pub fn parse(content: &str) -> Vec<(String, String)> {
    match collect_entries(content) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "pnpm-lock.yaml parser setup failed");
            Vec::new()
        }
    }
}

fn collect_entries(content: &str) -> Result<Vec<(String, String)>, regex::Error> {
    let at_re = Regex::new(
        r"^(\s+)'?/?((?:@[^@/\s']+/)?[^@/\s'(]+)@([^:'\s(_]+)(?:[(_][^']*)?'?:\s*$",
    )?;
    let slash_re = Regex::new(
        r"^(\s+)'?/((?:@[^@/\s']+/)?[^@/\s'(]+)/(\d[^/:'\s(_]*)(?:[(_][^']*)?'?:\s*$",
    )?;

    let mut entries = Vec::new();
    let mut in_packages = false;
    let mut entry_indent: Option<usize> = None;

    for line in content.lines() {
        if !in_packages {
            if line.trim_end() == "packages:" {
                in_packages = true;
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }
        // Back at column 0: the block is over
        if !line.starts_with(' ') && !line.starts_with('\t') {
            break;
        }

        let caps = at_re.captures(line).or_else(|| slash_re.captures(line));
        let Some(caps) = caps else {
            continue;
        };
        let indent = caps[1].len();
        match entry_indent {
            None => entry_indent = Some(indent),
            Some(expected) if expected != indent => continue,
            Some(_) => {}
        }
        entries.push((caps[2].to_string(), caps[3].to_string()));
    }

    Ok(entries)
}
