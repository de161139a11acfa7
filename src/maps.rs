//! Map index and article-to-map matching for Leaflet blocks.

use crate::config::LeafletOptions;
use crate::corpus::load_record;
use crate::images::ImageIndex;
use crate::models::{id_string, str_field, ImageRef, MapRecord};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static LOOKUP_STRIP_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const EXACT_MATCH_SCORE: i64 = 1000;
const CONTAINMENT_SCORE: i64 = 500;
const TOKEN_OVERLAP_SCORE: i64 = 10;
const MAP_WORD_BONUS: i64 = 25;
const BASE_WORD_BONUS: i64 = 10;

/// Lowercased, punctuation replaced by spaces, whitespace collapsed.
pub fn normalize_lookup_text(value: &str) -> String {
    let lowered = value.to_lowercase();
    let stripped = LOOKUP_STRIP_REGEX.replace_all(&lowered, " ");
    WHITESPACE_REGEX.replace_all(&stripped, " ").trim().to_string()
}

/// Similarity between two normalized strings; negative means no match.
pub fn score(article: &str, map: &str) -> i64 {
    if article.is_empty() || map.is_empty() {
        return -1;
    }
    if article == map {
        return EXACT_MATCH_SCORE;
    }
    if article.contains(map) || map.contains(article) {
        let diff = article.chars().count() as i64 - map.chars().count() as i64;
        return CONTAINMENT_SCORE - diff.abs();
    }

    let article_tokens: FxHashSet<&str> = article.split_whitespace().collect();
    let map_tokens: FxHashSet<&str> = map.split_whitespace().collect();
    let overlap = article_tokens.intersection(&map_tokens).count() as i64;
    if overlap == 0 {
        -1
    } else {
        overlap * TOKEN_OVERLAP_SCORE
    }
}

/// Best image for a map title. Images whose title mentions "map" or "base" get a
/// bonus; the first image wins ties and the winner must score above zero.
pub fn choose_map_image(map_title: &str, images: &ImageIndex) -> Option<ImageRef> {
    let title = normalize_lookup_text(map_title);
    let mut best: Option<&ImageRef> = None;
    let mut best_score = -1;

    for image in images.iter() {
        let image_title = normalize_lookup_text(&image.title);
        if image_title.is_empty() {
            continue;
        }
        let mut candidate = score(&title, &image_title);
        if image_title.contains("map") {
            candidate += MAP_WORD_BONUS;
        }
        if image_title.contains("base") {
            candidate += BASE_WORD_BONUS;
        }
        if candidate > best_score {
            best_score = candidate;
            best = Some(image);
        }
    }

    best.filter(|_| best_score > 0).cloned()
}

/// Leaflet code block and the map image to download for one article.
#[derive(Debug, Default, Clone)]
pub struct LeafletContext {
    pub block: String,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Default)]
pub struct MapIndex {
    maps: Vec<MapRecord>,
}

impl MapIndex {
    /// One record per subdirectory of `maps_root` holding a `Map` entity. A missing
    /// root yields an empty index.
    pub fn build(maps_root: &Path, images: &ImageIndex) -> Result<Self> {
        if !maps_root.is_dir() {
            debug!(dir = %maps_root.display(), "No maps directory");
            return Ok(Self::default());
        }

        let mut folders: Vec<PathBuf> = fs::read_dir(maps_root)
            .with_context(|| format!("Failed to list maps directory: {}", maps_root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        let mut maps = Vec::new();
        for folder in folders {
            if let Some(record) = parse_map_folder(&folder, images)? {
                maps.push(record);
            }
        }

        info!(maps = maps.len(), "Map index built");
        Ok(Self { maps })
    }

    pub fn from_records(maps: Vec<MapRecord>) -> Self {
        Self { maps }
    }

    /// The map whose title best matches `article_title`, if any scores above zero.
    pub fn best_for_article(&self, article_title: &str) -> Option<&MapRecord> {
        let article = normalize_lookup_text(article_title);
        if article.is_empty() {
            return None;
        }

        let mut best = None;
        let mut best_score = -1;
        for map in &self.maps {
            let candidate = score(&article, &map.normalized_title);
            if candidate > best_score {
                best_score = candidate;
                best = Some(map);
            }
        }
        best.filter(|_| best_score > 0)
    }

    pub fn leaflet_context(&self, article_title: &str, options: &LeafletOptions) -> LeafletContext {
        if !options.enabled {
            return LeafletContext::default();
        }
        match self.best_for_article(article_title) {
            Some(map) => LeafletContext {
                block: leaflet_block(map, &options.height),
                image: map.image.clone(),
            },
            None => LeafletContext::default(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapRecord> {
        self.maps.iter()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

fn parse_map_folder(folder: &Path, images: &ImageIndex) -> Result<Option<MapRecord>> {
    let mut files: Vec<PathBuf> = fs::read_dir(folder)
        .with_context(|| format!("Failed to list map folder: {}", folder.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut entity: Option<Value> = None;
    for file in &files {
        match load_record(file) {
            Ok(record) if record.get("entityClass").and_then(Value::as_str) == Some("Map") => {
                entity = Some(record);
            }
            Ok(_) => {}
            Err(e) => debug!(path = %file.display(), error = %e, "Skipping unreadable map file"),
        }
    }

    let Some(entity) = entity else {
        return Ok(None);
    };

    let title = entity
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Some(MapRecord {
        id: entity.get("id").and_then(id_string),
        image: choose_map_image(&title, images),
        normalized_title: normalize_lookup_text(&title),
        source_url: str_field(&entity, "url").map(str::to_string),
        folder: folder.to_path_buf(),
        title,
    }))
}

/// Leaflet plugin block for `map`; empty when the map has no image.
pub fn leaflet_block(map: &MapRecord, height: &str) -> String {
    let Some(image) = &map.image else {
        return String::new();
    };
    let id = map.id.as_deref().unwrap_or("wa-map");
    let prefix = id.split('-').next().unwrap_or(id);
    [
        "```leaflet".to_string(),
        format!("id: wa-map-{prefix}"),
        format!("height: {height}"),
        format!("image: [[{}]]", image.filename),
        "```".to_string(),
    ]
    .join("\n")
}
