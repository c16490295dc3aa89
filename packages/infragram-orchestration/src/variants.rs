//! Variant discovery
//!
//! A Helm chart with several `values-<env>.yaml` files next to its
//! `Chart.yaml` becomes one independent run per values file.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker file that anchors discovery (matched case-insensitively)
pub const CHART_MARKER: &str = "Chart.yaml";

static VALUES_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^values-(.*)\.ya?ml$").unwrap_or_else(|e| panic!("invalid regex: {e}"))
});

/// One run derived from an override file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub run_id: String,
    /// Override file, relative to the project source root
    pub values_file: String,
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.split('/').count()
    }
}

/// Directory of the shallowest `Chart.yaml`, ties broken lexicographically
pub fn find_chart_dir(files: &[String]) -> Option<&str> {
    files
        .iter()
        .map(|f| split_path(f))
        .filter(|(_, name)| name.eq_ignore_ascii_case(CHART_MARKER))
        .map(|(dir, _)| dir)
        .min_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)))
}

/// Run id for a values-file suffix; `None` when the suffix is blank
///
/// A suffix made only of dots (`.`, `..`) cannot name a directory, so its
/// dots become `-` as well.
pub fn derive_run_id(suffix: &str) -> Option<String> {
    let trimmed = suffix.trim();
    if trimmed.is_empty() {
        return None;
    }
    let id: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if id.chars().all(|c| c == '.') {
        return Some("-".repeat(id.len()));
    }
    Some(id)
}

/// Discover variants in a project's source listing
///
/// Empty when there is no chart or no override file beside it. The result
/// is sorted by run id, then by file path, so the same listing always yields
/// the same order. Ids are not de-duplicated here.
pub fn discover_variants(files: &[String]) -> Vec<Variant> {
    let Some(anchor) = find_chart_dir(files) else {
        return Vec::new();
    };

    let mut variants: Vec<Variant> = files
        .iter()
        .filter_map(|path| {
            let (dir, name) = split_path(path);
            if dir != anchor {
                return None;
            }
            let suffix = VALUES_FILE.captures(name)?.get(1)?.as_str();
            Some(Variant {
                run_id: derive_run_id(suffix)?,
                values_file: path.clone(),
            })
        })
        .collect();

    variants.sort_by(|a, b| {
        a.run_id
            .cmp(&b.run_id)
            .then_with(|| a.values_file.cmp(&b.values_file))
    });
    variants
}

/// Make run ids unique: later duplicates become `<id>-2`, `<id>-3`, ...
///
/// Order is preserved; a generated id never shadows another variant's id.
pub fn assign_unique_run_ids(variants: Vec<Variant>) -> Vec<Variant> {
    let mut taken: HashMap<String, usize> = HashMap::new();
    for v in &variants {
        taken.entry(v.run_id.clone()).or_insert(0);
    }

    let mut result = Vec::with_capacity(variants.len());
    for mut variant in variants {
        let seen = taken.get(&variant.run_id).copied().unwrap_or(0);
        if seen > 0 {
            let mut n = seen + 1;
            let mut candidate = format!("{}-{}", variant.run_id, n);
            while taken.contains_key(&candidate) {
                n += 1;
                candidate = format!("{}-{}", variant.run_id, n);
            }
            taken.insert(variant.run_id.clone(), n);
            taken.insert(candidate.clone(), 1);
            variant.run_id = candidate;
        } else {
            taken.insert(variant.run_id.clone(), 1);
        }
        result.push(variant);
    }
    result
}
