use crate::corpus;
use crate::image_api::{ImageSource, LookupError};
use crate::models::{id_string, ImageJob, ImageRef};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::cell::RefCell;
use std::path::Path;
use tracing::{debug, info};

const NOTE_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpeg", ".jpg"];
const KNOWN_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// Appends `.png` unless the name already ends in png/jpg/jpeg. Path separators
/// become `_` so the result is a single file name. Empty stays empty.
pub fn normalize_image_filename(filename: &str) -> String {
    if filename.is_empty() {
        return String::new();
    }
    let filename = filename.replace(['/', '\\'], "_");
    if has_extension(&filename, NOTE_IMAGE_EXTENSIONS) {
        filename
    } else {
        format!("{filename}.png")
    }
}

fn non_empty_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

impl ImageRef {
    /// Builds an image reference from an export or API record. Needs both an id
    /// and a url.
    pub fn from_record(record: &Value) -> Option<Self> {
        if !record.is_object() {
            return None;
        }
        let id = record.get("id").and_then(id_string)?;
        let url = non_empty_str(record, "url")?;

        let title = non_empty_str(record, "title");
        let mut preferred = title
            .or_else(|| non_empty_str(record, "filename"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("image-{id}"));

        if let Some(extension) = non_empty_str(record, "extension") {
            if !has_extension(&preferred, KNOWN_IMAGE_EXTENSIONS) {
                preferred = format!("{preferred}.{extension}");
            }
        }

        Some(Self {
            filename: normalize_image_filename(&preferred),
            title: title.unwrap_or_default().to_string(),
            url: url.to_string(),
            id,
        })
    }
}

/// Image metadata from the export's images subtree, keyed by image id.
/// Iteration follows first insertion; a later record with the same id replaces
/// the earlier one in place.
#[derive(Debug, Default)]
pub struct ImageIndex {
    images: Vec<ImageRef>,
    by_id: FxHashMap<String, usize>,
}

impl ImageIndex {
    pub fn build(images_dir: &Path) -> Self {
        let mut index = Self::default();
        if !images_dir.is_dir() {
            debug!(dir = %images_dir.display(), "No image metadata directory");
            return index;
        }

        let files = corpus::list_json_files(images_dir);
        let parsed: Vec<Option<ImageRef>> = files
            .par_iter()
            .map(|path| match corpus::load_record(path) {
                Ok(record) => ImageRef::from_record(&record),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Unable to read image metadata");
                    None
                }
            })
            .collect();

        for image in parsed.into_iter().flatten() {
            index.insert(image);
        }

        info!(images = index.len(), "Image index built");
        index
    }

    pub fn from_images(images: impl IntoIterator<Item = ImageRef>) -> Self {
        let mut index = Self::default();
        for image in images {
            index.insert(image);
        }
        index
    }

    pub fn insert(&mut self, image: ImageRef) {
        match self.by_id.get(&image.id) {
            Some(&slot) => self.images[slot] = image,
            None => {
                self.by_id.insert(image.id.clone(), self.images.len());
                self.images.push(image);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ImageRef> {
        self.by_id.get(id).map(|&slot| &self.images[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRef> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Image jobs registered while rendering a single article.
#[derive(Debug, Default)]
pub struct ImageJobs {
    jobs: Vec<ImageJob>,
}

impl ImageJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a download; empty urls or filenames are ignored.
    pub fn register(&mut self, url: &str, filename: &str) {
        if url.is_empty() || filename.is_empty() {
            return;
        }
        let filename = normalize_image_filename(filename);
        self.jobs.push(ImageJob {
            url: url.to_string(),
            filename,
        });
    }

    pub fn register_image(&mut self, image: &ImageRef) {
        self.register(&image.url, &image.filename);
    }

    pub fn append(&mut self, other: ImageJobs) {
        self.jobs.extend(other.jobs);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_vec(self) -> Vec<ImageJob> {
        self.jobs
    }
}

/// Resolves inline image ids: forced-missing ids first, then the local index,
/// then the optional remote source. Remote answers (hits and misses) are
/// memoized for the lifetime of the resolver.
pub struct ImageResolver<'a> {
    local: &'a ImageIndex,
    remote: Option<Box<dyn ImageSource + 'a>>,
    attempts: u32,
    force_missing: FxHashSet<String>,
    remote_cache: RefCell<FxHashMap<String, Option<ImageRef>>>,
}

impl<'a> ImageResolver<'a> {
    pub fn new(local: &'a ImageIndex) -> Self {
        Self {
            local,
            remote: None,
            attempts: 1,
            force_missing: FxHashSet::default(),
            remote_cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn with_remote(mut self, source: Box<dyn ImageSource + 'a>, retries: u32) -> Self {
        self.remote = Some(source);
        self.attempts = retries.max(1);
        self
    }

    pub fn with_forced_missing(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.force_missing.extend(ids);
        self
    }

    pub fn resolve(&self, image_id: &str) -> Option<ImageRef> {
        if self.force_missing.contains(image_id) {
            return None;
        }
        if let Some(image) = self.local.get(image_id) {
            return Some(image.clone());
        }
        self.resolve_remote(image_id)
    }

    fn resolve_remote(&self, image_id: &str) -> Option<ImageRef> {
        let source = self.remote.as_ref()?;
        if let Some(cached) = self.remote_cache.borrow().get(image_id) {
            return cached.clone();
        }

        let mut found = None;
        for attempt in 1..=self.attempts {
            match source.fetch(image_id) {
                Ok(Some(image)) => {
                    found = Some(image);
                    break;
                }
                Ok(None) => {
                    debug!(image_id, attempt, "Image API payload had no matching record");
                }
                Err(LookupError::NotFound(_)) => {
                    debug!(image_id, "Image API reports image as missing");
                    break;
                }
                Err(e) => {
                    debug!(image_id, attempt, error = %e, "Image API lookup failed");
                }
            }
        }

        self.remote_cache
            .borrow_mut()
            .insert(image_id.to_string(), found.clone());
        found
    }
}
