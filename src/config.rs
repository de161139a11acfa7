use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of image downloads in flight at once
pub const DOWNLOAD_CONCURRENCY: usize = 10;

/// Per-request timeout for image downloads
pub const DOWNLOAD_TIMEOUT_SECS: f64 = 30.0;

/// Redirect hops followed by the download client
pub const DOWNLOAD_MAX_REDIRECTS: usize = 10;

/// Per-request timeout for the image metadata API
pub const IMAGE_API_TIMEOUT_SECS: f64 = 15.0;

/// Attempts per image id against the metadata API (at least one is always made)
pub const IMAGE_API_RETRIES: u32 = 2;

pub const IMAGE_API_AUTH_HEADER: &str = "x-auth-token";

pub const LEAFLET_DEFAULT_HEIGHT: &str = "500px";

/// Sections with content at or below this many characters are not exported
pub const MIN_SECTION_LENGTH: usize = 10;

/// Infobox fact values longer than this are left to the generic field list
pub const INFOBOX_FACT_MAX_LEN: usize = 240;

/// Progress update interval (tick every N files while indexing)
pub const PROGRESS_INTERVAL: usize = 500;

/// Entity classes that never produce a note
pub const SKIPPED_ENTITY_CLASSES: &[&str] = &["Image", "Manuscript"];

/// Entity classes whose note filename carries the class name as a suffix
pub const SUFFIXED_ENTITY_CLASSES: &[&str] = &["Map", "Category"];

/// Export bookkeeping fields that never reach the notes.
pub const IGNORED_FIELDS: &[&str] = &[
    "id", "slug", "state", "isWip", "isDraft", "entityClass", "icon", "url",
    "subscribergroups", "folderId", "updateDate", "position", "wordcount",
    "notificationDate", "likes", "views", "userMetadata", "articleMetadata",
    "cssClasses", "displayCss", "customArticleTemplate", "editor", "author",
    "world", "category", "portrait", "cover", "coverSource", "snippet", "seeded",
    "displaySidebar", "timeline", "prompt", "gallery", "block", "orgchart",
    "showSeeded", "webhookUpdate", "communityUpdate", "commentPlaceholder",
    "passcodecta", "metaTitle", "metaDescription", "coverIsMap",
    "isFeaturedArticle", "isAdultContent", "isLocked", "allowComments",
    "allowContentCopy", "showInToc", "isEmphasized", "displayAuthor",
    "displayChildrenUnder", "displayTitle", "displaySheet", "badge", "editURL",
    "isEditable", "success", "genres", "theme", "fans", "isBook", "displayBookTitle",
    "isCollapsed", "systemMeta", "pagecover", "bookcover", "parsedDescription",
    "redirectedCategories",
];

/// Fields rendered by dedicated logic instead of the generic field list.
pub const HANDLED_FIELDS: &[&str] = &[
    "title", "content", "templateType", "template", "tags",
    "articleParent", "parent", "articleNext", "articlePrevious",
    "creationDate", "publicationDate",
    "sidepanelcontenttop", "sidepanelcontent", "sidebarcontent",
    "sidebarcontentbottom", "sidepanelcontentbottom",
    "sections", "relations",
];

/// Run settings. Every field has a default so a partial TOML file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the JSON export
    pub source_dir: PathBuf,
    /// Where the Markdown notes are written
    pub output_dir: PathBuf,
    /// Where downloaded images are written
    pub image_dir: PathBuf,
    /// Directory holding `<template>.j2` files for themed rendering
    pub templates_dir: PathBuf,
    pub markup: MarkupOptions,
    pub leaflet: LeafletOptions,
    pub image_api: ImageApiConfig,
    pub download: DownloadConfig,
    /// Image ids that always resolve as missing (exercises the placeholder path)
    pub force_missing_image_ids: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("World-Anvil-Export"),
            output_dir: PathBuf::from("content"),
            image_dir: PathBuf::from("images"),
            templates_dir: PathBuf::from("templates"),
            markup: MarkupOptions::default(),
            leaflet: LeafletOptions::default(),
            image_api: ImageApiConfig::default(),
            download: DownloadConfig::default(),
            force_missing_image_ids: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn images_metadata_dir(&self) -> PathBuf {
        self.source_dir.join("images")
    }

    pub fn maps_dir(&self) -> PathBuf {
        self.source_dir.join("maps")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupOptions {
    /// Convert bracket tags ([b], [h1], [list], ...) into Markdown
    pub dialect_conversion: bool,
    /// Themed output: template files, width classes and portrait embeds
    pub themed: bool,
    /// Replace unresolved inline images with a warning callout
    pub missing_image_placeholder: bool,
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self {
            dialect_conversion: true,
            themed: true,
            missing_image_placeholder: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafletOptions {
    pub enabled: bool,
    pub height: String,
    /// Map entities render through `leaflet-minimal.j2` in themed mode
    pub minimal_template: bool,
}

impl Default for LeafletOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            height: LEAFLET_DEFAULT_HEIGHT.to_string(),
            minimal_template: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageApiConfig {
    pub enabled: bool,
    /// Request URL with an `{image_id}` placeholder
    pub url_template: String,
    pub api_key: String,
    pub auth_header: String,
    /// Sent as the `world` query parameter when set
    pub world_id: String,
    pub timeout_secs: f64,
    pub retries: u32,
}

impl Default for ImageApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url_template: String::new(),
            api_key: String::new(),
            auth_header: IMAGE_API_AUTH_HEADER.to_string(),
            world_id: String::new(),
            timeout_secs: IMAGE_API_TIMEOUT_SECS,
            retries: IMAGE_API_RETRIES,
        }
    }
}

impl ImageApiConfig {
    /// The remote fallback needs the flag, an endpoint and a key.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.url_template.is_empty() && !self.api_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub concurrency: usize,
    pub timeout_secs: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DOWNLOAD_CONCURRENCY,
            timeout_secs: DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}
