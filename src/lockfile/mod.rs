//! Lock-file parsers producing a shallow [`DependencyNode`] tree.
//!
//! Every parser returns a root named `root@0.0.0` whose children are the
//! entries found in the lock file, deduplicated by name with the first
//! occurrence winning. Malformed input yields whatever was read before the
//! problem, never an error.

use std::collections::{BTreeMap, HashSet};

use crate::models::{DependencyNode, LockFileType, PackageRef};

pub mod npm;
pub mod pnpm;
pub mod yarn;

/// Parse lock-file text of the given grammar.
pub fn parse_lock_file(content: &str, kind: LockFileType) -> DependencyNode {
    let entries = match kind {
        LockFileType::Npm => npm::parse(content),
        LockFileType::Yarn => yarn::parse(content),
        LockFileType::Pnpm => pnpm::parse(content),
    };
    shallow_tree(entries)
}

/// Build the root node from `(name, version)` pairs, keeping the first of each name.
pub fn shallow_tree(entries: impl IntoIterator<Item = (String, String)>) -> DependencyNode {
    let mut root = DependencyNode::empty_root();
    let mut seen: HashSet<String> = HashSet::new();
    for (name, version) in entries {
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        root.children.push(DependencyNode::new(name, version));
    }
    root
}

/// Strip the leading run of range operators (`^`, `~`, `>=`, `<`, `=`, ...)
/// from a declared version, leaving the bare version.
pub fn strip_range_operator(version: &str) -> &str {
    version
        .trim()
        .trim_start_matches(|c: char| matches!(c, '^' | '~' | '>' | '<' | '='))
        .trim_start()
}

/// Turn a manifest dependency map into bare `name@version` pairs.
pub fn flatten_dependencies(deps: &BTreeMap<String, String>) -> Vec<PackageRef> {
    deps.iter()
        .map(|(name, range)| PackageRef::new(name.clone(), strip_range_operator(range)))
        .collect()
}

/// Split `name@version`, keeping a leading `@` as part of a scoped name.
pub(crate) fn split_name_version(spec: &str) -> Option<(&str, &str)> {
    let at = spec.char_indices().skip(1).find(|&(_, c)| c == '@')?.0;
    let (name, version) = (&spec[..at], &spec[at + 1..]);
    (!name.is_empty()).then_some((name, version))
}
