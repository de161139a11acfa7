//! Article conversion: one export record in, one Markdown note out.

use crate::config::{Settings, SKIPPED_ENTITY_CLASSES, SUFFIXED_ENTITY_CLASSES};
use crate::corpus::{is_plain_component, list_json_files, load_record, select_json_files};
use crate::download::{dedupe_jobs, download_images};
use crate::fields::{
    card_link_sections, is_empty, navigation_lines, relations, render_navigation, type_folder_name,
    type_title, Formatter,
};
use crate::image_api::HttpImageApi;
use crate::images::{normalize_image_filename, ImageIndex, ImageJobs, ImageResolver};
use crate::index::TitleIndex;
use crate::maps::{LeafletContext, MapIndex};
use crate::markup::Rewriter;
use crate::models::{entity_class, plain_string, str_field, ArticleRecord, ImageJob};
use crate::stats::ConversionStats;
use crate::template::{
    infobox_facts, themed_skip_keys, FrontMatter, RenderContext, TemplateError, TemplateRenderer,
    TeraRenderer, LEAFLET_MINIMAL_TEMPLATE,
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

static UNSAFE_FILENAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]+"#).unwrap());
static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static STEM_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]+-").unwrap());
static STEM_UID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-[A-Za-z0-9]{3,}$").unwrap());

const CLEAR_FLOAT: &str = "<div style=\"clear: both;\"></div>\n";

/// Folder used when a record's template name cannot be a directory name.
const FALLBACK_TEMPLATE_FOLDER: &str = "other";

/// Where notes land under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// `<out>/<template>/<type>/<name>.md`
    #[default]
    TemplateFolders,
    /// `<out>/<type>/<name>.md`
    Flat,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Conversion {
    Written { path: PathBuf, jobs: Vec<ImageJob> },
    Skipped,
}

/// Replaces characters that are unsafe in file names and trims dots at the ends.
pub fn sanitize_note_filename(name: &str) -> String {
    let replaced = UNSAFE_FILENAME_REGEX.replace_all(name, " ");
    let collapsed = WHITESPACE_REGEX.replace_all(&replaced, " ");
    collapsed.trim().trim_matches('.').to_string()
}

/// Note name from the title, or from the export file name with its
/// `Template-` prefix and `-uid` suffix removed. Map and Category entities carry
/// their class as a suffix.
pub fn note_filename(record: &ArticleRecord, source: &Path) -> String {
    let title = record
        .get("title")
        .filter(|t| t.is_string() || t.is_number())
        .map(|t| sanitize_note_filename(&plain_string(t)))
        .unwrap_or_default();

    let base = if title.is_empty() {
        fallback_filename(source)
    } else {
        title
    };

    let class = entity_class(record);
    if SUFFIXED_ENTITY_CLASSES.contains(&class) {
        format!("{base} {class}")
    } else {
        base
    }
}

fn fallback_filename(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = STEM_PREFIX_REGEX.replace(&stem, "");
    let stem = STEM_UID_REGEX.replace(&stem, "");
    let name = sanitize_note_filename(&stem);
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// `templateType`, then `template`, then a class default, then `other`.
pub fn template_name(record: &ArticleRecord) -> String {
    str_field(record, "templateType")
        .or_else(|| str_field(record, "template"))
        .or_else(|| (entity_class(record) == "Category").then_some("category"))
        .unwrap_or("other")
        .to_string()
}

/// Note location under `output_dir`. Every component comes from export data, so a
/// template name that is not a plain directory name lands in `other` and such a
/// type folder is dropped.
pub fn note_path(
    output_dir: &Path,
    layout: OutputLayout,
    template: &str,
    type_folder: Option<&str>,
    name: &str,
) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    if layout == OutputLayout::TemplateFolders {
        if is_plain_component(template) {
            path.push(template);
        } else {
            warn!(template, "Template name is not a plain folder name; using {FALLBACK_TEMPLATE_FOLDER}");
            path.push(FALLBACK_TEMPLATE_FOLDER);
        }
    }
    if let Some(folder) = type_folder.filter(|f| is_plain_component(f)) {
        path.push(folder);
    }
    path.push(format!("{name}.md"));
    path
}

/// Cover image of an article, when it has both a url and a title.
struct Cover {
    url: String,
    filename: String,
}

impl Cover {
    fn from_record(record: &ArticleRecord) -> Option<Self> {
        let cover = record.get("cover")?;
        let url = cover.get("url").and_then(Value::as_str).filter(|u| !u.is_empty())?;
        let title = cover.get("title").and_then(Value::as_str).unwrap_or_default();
        let filename = normalize_image_filename(title);
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            filename,
        })
    }
}

/// Per-article state shared by both renderers.
struct Article<'r> {
    record: &'r ArticleRecord,
    class: String,
    template: String,
    cover: Option<Cover>,
    leaflet: LeafletContext,
}

/// Converts records using the shared, read-only run indices.
pub struct Converter<'a> {
    titles: &'a TitleIndex,
    maps: &'a MapIndex,
    rewriter: Rewriter<'a>,
    templates: Option<&'a dyn TemplateRenderer>,
    settings: &'a Settings,
}

impl<'a> Converter<'a> {
    pub fn new(
        titles: &'a TitleIndex,
        maps: &'a MapIndex,
        images: &'a ImageResolver<'a>,
        settings: &'a Settings,
    ) -> Self {
        Self {
            titles,
            maps,
            rewriter: Rewriter::new(images, &settings.markup),
            templates: None,
            settings,
        }
    }

    /// Enables themed rendering (when the markup options ask for it).
    pub fn with_templates(mut self, templates: &'a dyn TemplateRenderer) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Writes the note for the record at `path` and returns the images it needs.
    pub fn convert_file(
        &self,
        path: &Path,
        output_dir: &Path,
        layout: OutputLayout,
    ) -> Result<Conversion> {
        let record = load_record(path)?;
        if !record.is_object() {
            warn!(path = %path.display(), "No data found");
            return Ok(Conversion::Skipped);
        }

        let class = entity_class(&record).to_string();
        if SKIPPED_ENTITY_CLASSES.contains(&class.as_str()) {
            debug!(path = %path.display(), class = %class, "Skipping entity class");
            return Ok(Conversion::Skipped);
        }

        let template = template_name(&record);
        let front_matter = FrontMatter::from_record(&record, &template).to_block()?;
        let type_folder = type_title(&record).and_then(|t| type_folder_name(&t));
        let note = note_path(
            output_dir,
            layout,
            &template,
            type_folder.as_deref(),
            &note_filename(&record, path),
        );

        let leaflet = if class.trim().eq_ignore_ascii_case("map") {
            let title = record.get("title").and_then(Value::as_str).unwrap_or_default();
            self.maps.leaflet_context(title, &self.settings.leaflet)
        } else {
            LeafletContext::default()
        };

        let article = Article {
            record: &record,
            class,
            template,
            cover: Cover::from_record(&record),
            leaflet,
        };

        let mut jobs = ImageJobs::new();
        if let Some(cover) = &article.cover {
            jobs.register(&cover.url, &cover.filename);
        }
        if let Some(image) = &article.leaflet.image {
            jobs.register_image(image);
        }

        let body = self.render_body(&article, &mut jobs)?;

        if let Some(parent) = note.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&note, format!("{front_matter}{body}"))
            .with_context(|| format!("Failed to write note: {}", note.display()))?;

        debug!(note = %note.display(), images = jobs.len(), "Note written");
        Ok(Conversion::Written {
            path: note,
            jobs: jobs.into_vec(),
        })
    }

    fn render_body(&self, article: &Article, jobs: &mut ImageJobs) -> Result<String> {
        if let Some(templates) = self.templates.filter(|_| self.settings.markup.themed) {
            let mut themed_jobs = ImageJobs::new();
            match self.render_themed(templates, article, &mut themed_jobs) {
                Ok(mut body) => {
                    jobs.append(themed_jobs);
                    if !body.ends_with('\n') {
                        body.push('\n');
                    }
                    return Ok(body);
                }
                Err(TemplateError::NotFound(name)) => {
                    debug!(template = %name, "Template not found; using default renderer");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.render_default(article, jobs))
    }

    fn render_themed(
        &self,
        templates: &dyn TemplateRenderer,
        article: &Article,
        jobs: &mut ImageJobs,
    ) -> Result<String, TemplateError> {
        let leaflet = &self.settings.leaflet;
        if leaflet.enabled
            && leaflet.minimal_template
            && !article.leaflet.block.is_empty()
            && article.class.trim().eq_ignore_ascii_case("map")
        {
            let context = RenderContext {
                leaflet_block: article.leaflet.block.clone(),
                ..RenderContext::default()
            };
            return templates.render(LEAFLET_MINIMAL_TEMPLATE, &context);
        }

        let record = article.record;
        let formatter = Formatter::new(&self.rewriter);
        let resolved = templates.resolve_name(&article.template);
        let trimmed = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let main_content = match record.get("content") {
            Some(content) if !is_empty(content) => formatter.render(content, jobs),
            _ => String::new(),
        };
        let title_excerpt = match record.get("excerpt") {
            Some(excerpt) if !is_empty(excerpt) => formatter.render(excerpt, jobs).trim().to_string(),
            _ => String::new(),
        };
        let sidebar = formatter.sidebar_sections(record, Some(resolved.as_str()), jobs);
        let skip_keys = themed_skip_keys(&resolved);

        let context = RenderContext {
            title: record.get("title").map(plain_string).unwrap_or_default(),
            title_pronunciation: trimmed("pronunciation"),
            title_subheading: trimmed("subheading"),
            title_excerpt,
            has_image: article.cover.is_some(),
            cover_title: article
                .cover
                .as_ref()
                .map(|c| c.filename.clone())
                .unwrap_or_default(),
            main_content,
            spotify_blocks: sidebar.spotify,
            sidebar_top_blocks: sidebar.top,
            sidebar_panel_blocks: sidebar.panel,
            sidebar_bottom_blocks: sidebar.bottom,
            leaflet_block: article.leaflet.block.clone(),
            infobox_facts: infobox_facts(&formatter, record, &resolved, jobs),
            navigation_lines: navigation_lines(record, self.titles),
            card_link_sections: card_link_sections(record),
            generic_fields: formatter.generic_fields(record, &skip_keys, jobs),
            extra_sections: formatter.sections(record, jobs),
            extra_relations: relations(record),
        };

        templates.render(&format!("{resolved}.j2"), &context)
    }

    fn render_default(&self, article: &Article, jobs: &mut ImageJobs) -> String {
        let record = article.record;
        let formatter = Formatter::new(&self.rewriter);
        let mut out = String::new();

        if let Some(cover) = &article.cover {
            out.push_str(&format!("![[{}]]\n\n", cover.filename));
        }

        let title = record.get("title").map(plain_string).unwrap_or_default();
        if !title.is_empty() {
            out.push_str(&format!("# {title}\n\n"));
        }

        out.push_str(&formatter.sidebar_sections(record, None, jobs).render_aside());

        if !article.leaflet.block.is_empty() {
            out.push_str(&format!("\n{}\n\n", article.leaflet.block));
        }

        if let Some(content) = record.get("content").filter(|c| !is_empty(c)) {
            out.push_str(&formatter.render(content, jobs));
            out.push_str("\n\n");
        }

        out.push_str(&render_navigation(&navigation_lines(record, self.titles)));

        out.push_str("# Extras\n\n");
        for field in formatter.generic_fields(record, &[], jobs) {
            out.push_str(&format!("## {}\n\n{}\n\n", field.label, field.value));
        }
        for block in formatter.sections(record, jobs).into_iter().chain(relations(record)) {
            out.push_str(&format!("\n## {}\n\n{}\n", block.label, block.value));
        }
        out.push_str(CLEAR_FLOAT);
        out
    }
}

/// What to convert and where to put it.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Regex applied to file names and paths; see [`crate::corpus::file_pattern`]
    pub file_pattern: Option<String>,
    pub layout: OutputLayout,
}

/// Converts the selected part of the corpus, then downloads every referenced image.
///
/// Conversion runs synchronously on the calling thread. The first article that
/// fails aborts the run before any download starts.
pub fn run_conversion(settings: &Settings, options: &RunOptions) -> Result<ConversionStats> {
    let stats = ConversionStats::new();

    fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!("Failed to create output directory: {}", settings.output_dir.display())
    })?;

    let images = ImageIndex::build(&settings.images_metadata_dir());
    let maps = MapIndex::build(&settings.maps_dir(), &images)?;

    let all_files = list_json_files(&settings.source_dir);
    info!(files = all_files.len(), source = %settings.source_dir.display(), "Corpus listed");
    let selected = select_json_files(all_files.clone(), options.file_pattern.as_deref())?;
    if selected.is_empty() {
        return Ok(stats);
    }

    let titles = TitleIndex::build(&all_files);

    let jobs = {
        // The blocking API client must not outlive this scope: it cannot be
        // dropped inside the download runtime.
        let mut resolver = ImageResolver::new(&images)
            .with_forced_missing(settings.force_missing_image_ids.iter().cloned());
        if settings.image_api.is_usable() {
            let api = HttpImageApi::new(&settings.image_api)?;
            resolver = resolver.with_remote(Box::new(api), settings.image_api.retries);
        }

        let templates = if settings.markup.themed {
            Some(TeraRenderer::new(&settings.templates_dir)?)
        } else {
            None
        };
        let mut converter = Converter::new(&titles, &maps, &resolver, settings);
        if let Some(templates) = &templates {
            converter = converter.with_templates(templates);
        }

        convert_all(&converter, &selected, settings, options.layout, &stats)?
    };

    let jobs = dedupe_jobs(jobs);
    if jobs.is_empty() {
        return Ok(stats);
    }

    info!(images = jobs.len(), "Starting image downloads");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("anvilmark-download")
        .enable_all()
        .build()
        .context("Failed to build download runtime")?;
    rt.block_on(download_images(jobs, &settings.image_dir, &settings.download, &stats))?;

    Ok(stats)
}

fn convert_all(
    converter: &Converter,
    files: &[PathBuf],
    settings: &Settings,
    layout: OutputLayout,
    stats: &ConversionStats,
) -> Result<Vec<ImageJob>> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} articles [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );

    let mut jobs = Vec::new();
    for path in files {
        let outcome = converter
            .convert_file(path, &settings.output_dir, layout)
            .with_context(|| format!("Failed to convert {}", path.display()));
        match outcome {
            Ok(Conversion::Written { jobs: file_jobs, .. }) => {
                stats.inc_converted();
                stats.add_image_jobs(file_jobs.len() as u64);
                jobs.extend(file_jobs);
            }
            Ok(Conversion::Skipped) => stats.inc_skipped(),
            Err(e) => {
                pb.abandon();
                error!("Failed to convert. Error: {:#}", e);
                return Err(e);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(articles = stats.converted(), skipped = stats.skipped(), "Conversion complete");
    Ok(jobs)
}
