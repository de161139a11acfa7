use crate::config::PROGRESS_INTERVAL;
use crate::corpus::load_record;
use crate::fields::note_link_title;
use crate::models::id_string;
use indicatif::ProgressBar;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

/// Corpus-wide `id -> display title` map used to turn references into wiki links.
#[derive(Debug, Default)]
pub struct TitleIndex {
    id_to_title: FxHashMap<String, String>,
}

impl TitleIndex {
    /// Indexes every readable record in `files`. Files are parsed in parallel but
    /// inserted in the given order, so a duplicate id keeps the last file's title.
    pub fn build(files: &[PathBuf]) -> Self {
        let pb = ProgressBar::new_spinner();
        info!(files = files.len(), "Building cross-reference index");

        let entries: Vec<Option<(String, String)>> = files
            .par_iter()
            .map(|path| match load_record(path) {
                Ok(record) => index_entry(&record),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Unable to index file");
                    None
                }
            })
            .collect();

        let mut id_to_title = FxHashMap::default();
        id_to_title.reserve(entries.len());
        for (i, (id, title)) in entries.into_iter().flatten().enumerate() {
            id_to_title.insert(id, title);
            if i % PROGRESS_INTERVAL == 0 {
                pb.tick();
            }
        }
        pb.finish_and_clear();

        info!(titles = id_to_title.len(), "Cross-reference index built");
        Self { id_to_title }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id_to_title: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.id_to_title.get(id).map(String::as_str)
    }

    /// Display title for a reference field. Objects use their own title when they
    /// carry one and fall back to their `id`; bare strings are ids.
    pub fn resolve(&self, reference: &Value) -> Option<String> {
        match reference {
            Value::Object(map) => note_link_title(reference).or_else(|| {
                let id = map.get("id").and_then(id_string)?;
                self.get(&id).map(str::to_string)
            }),
            Value::String(id) => self.get(id).map(str::to_string),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_title.is_empty()
    }
}

fn index_entry(record: &Value) -> Option<(String, String)> {
    if !record.is_object() {
        return None;
    }
    let id = record.get("id").and_then(id_string)?;
    let title = note_link_title(record).or_else(|| {
        record
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })?;
    Some((id, title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn build_indexes_titles_with_map_suffix() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "a.json", r#"{"id": "a1", "title": "Skyhold"}"#),
            write(&dir, "b.json", r#"{"id": "m1", "title": "Coast", "entityClass": "Map"}"#),
            write(&dir, "c.json", r#"{"id": 77, "title": "Numbered"}"#),
        ];
        let index = TitleIndex::build(&files);
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("a1"), Some("Skyhold"));
        assert_eq!(index.get("m1"), Some("Coast Map"));
        assert_eq!(index.get("77"), Some("Numbered"));
    }

    #[test]
    fn build_skips_broken_and_incomplete_records() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "broken.json", "{ nope"),
            write(&dir, "no_id.json", r#"{"title": "Orphan"}"#),
            write(&dir, "no_title.json", r#"{"id": "x"}"#),
            write(&dir, "list.json", r#"[1, 2]"#),
            dir.path().join("missing.json"),
        ];
        assert!(TitleIndex::build(&files).is_empty());
    }

    #[test]
    fn duplicate_id_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "1.json", r#"{"id": "dup", "title": "First"}"#),
            write(&dir, "2.json", r#"{"id": "dup", "title": "Second"}"#),
        ];
        assert_eq!(TitleIndex::build(&files).get("dup"), Some("Second"));
    }

    #[test]
    fn resolve_reference_shapes() {
        let index = TitleIndex::from_pairs([("a1", "Skyhold")]);
        assert_eq!(index.resolve(&json!("a1")), Some("Skyhold".to_string()));
        assert_eq!(index.resolve(&json!({"id": "a1"})), Some("Skyhold".to_string()));
        assert_eq!(
            index.resolve(&json!({"id": "a1", "title": "Embedded"})),
            Some("Embedded".to_string())
        );
        assert_eq!(index.resolve(&json!("zz")), None);
        assert_eq!(index.resolve(&json!(5)), None);
        assert_eq!(index.resolve(&json!(null)), None);
    }
}
