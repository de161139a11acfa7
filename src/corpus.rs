//! Corpus discovery: finding export records on disk and choosing which to convert.

use crate::models::ArticleRecord;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// All `.json` files under `root`, recursively, in sorted path order.
pub fn list_json_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();
    files
}

/// Whether `name` can be joined onto a directory without leaving it: exactly one
/// normal path component and no separators.
pub fn is_plain_component(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub fn load_record(path: &Path) -> Result<ArticleRecord> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

/// Selection pattern from the CLI: an explicit regex wins, otherwise the plain
/// filter is matched literally.
pub fn file_pattern(filter: Option<&str>, regex: Option<&str>) -> Option<String> {
    regex
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .or_else(|| filter.filter(|f| !f.is_empty()).map(regex::escape))
}

/// Narrows `files` to the single file matching `pattern` (searched in the file
/// name and in the full path). No pattern keeps every file.
///
/// Several matches convert only the first in sorted order, with a warning; no
/// match yields an empty list and a warning.
pub fn select_json_files(files: Vec<PathBuf>, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let Some(pattern) = pattern else {
        return Ok(files);
    };
    let matcher =
        Regex::new(pattern).with_context(|| format!("Invalid file selection pattern: {pattern}"))?;

    let mut matched: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            matcher.is_match(name) || matcher.is_match(&path.to_string_lossy())
        })
        .collect();

    match matched.len() {
        0 => {
            warn!(pattern, "No JSON files matched the selection");
            Ok(Vec::new())
        }
        1 => Ok(matched),
        count => {
            matched.sort();
            matched.truncate(1);
            warn!(
                "Regex matched {} files; converting first match only: {}",
                count,
                matched[0].display()
            );
            Ok(matched)
        }
    }
}
