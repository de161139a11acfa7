//! Themed rendering: front-matter, infobox facts and the template collaborator.

use crate::config::INFOBOX_FACT_MAX_LEN;
use crate::fields::{
    is_empty, parse_tags, type_title, CardLinkSection, Formatter, LabeledValue,
};
use crate::images::ImageJobs;
use crate::models::{plain_string, ArticleRecord};
use anyhow::{Context as _, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info};

pub const GENERIC_TEMPLATE: &str = "generic";
pub const LEAFLET_MINIMAL_TEMPLATE: &str = "leaflet-minimal.j2";

static LINE_BREAK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n\s*").unwrap());

/// Keys rendered in the title block of themed templates.
pub const TITLE_FIELD_KEYS: &[&str] = &["pronunciation", "subheading", "excerpt"];

/// Keys rendered as card-link sections in themed templates.
pub const CARD_SECTION_KEYS: &[&str] = &["children", "childrenArticles", "articles"];

type FactSpec = (&'static str, &'static str);

const GENERIC_FACTS: &[FactSpec] = &[
    ("Template", "templateType"),
    ("World", "world"),
    ("Parent", "articleParent"),
];

/// Infobox label/key pairs per template. Unknown templates use the generic list.
pub fn fact_specs(template: &str) -> &'static [FactSpec] {
    match template {
        "article" => &[
            ("Template", "templateType"),
            ("Parent", "articleParent"),
            ("World", "world"),
        ],
        "item" => &[
            ("Template", "templateType"),
            ("Type", "type"),
            ("Rarity", "rarity"),
            ("Weight", "weight"),
            ("Value", "value"),
            ("World", "world"),
        ],
        "location" => &[
            ("Parent", "parent"),
            ("Parent", "articleParent"),
            ("Type", "type"),
            ("Climate", "climate"),
            ("World", "world"),
        ],
        "material" => &[
            ("Template", "templateType"),
            ("Type", "type"),
            ("Rarity", "rarity"),
            ("World", "world"),
        ],
        "organization" => &[
            ("Template", "templateType"),
            ("Type", "type"),
            ("Leader", "leader"),
            ("Headquarters", "headquarters"),
            ("World", "world"),
        ],
        "person" => &[
            ("Template", "templateType"),
            ("Species", "species"),
            ("Gender", "gender"),
            ("Birthplace", "birthplace"),
            ("Residence", "residence"),
            ("Affiliation", "affiliation"),
            ("World", "world"),
        ],
        "plot" => &[
            ("Template", "templateType"),
            ("Status", "status"),
            ("World", "world"),
        ],
        "settlement" => &[
            ("Parent", "articleParent"),
            ("Type", "type"),
            ("Population", "population"),
            ("Demonym", "demonym"),
            ("Alternative Name", "alternativename"),
            ("World", "world"),
        ],
        _ => GENERIC_FACTS,
    }
}

/// Short label/value facts for the infobox. Values are collapsed onto one line;
/// a label is used at most once and overlong values are left out.
pub fn infobox_facts(
    formatter: &Formatter,
    record: &ArticleRecord,
    template: &str,
    jobs: &mut ImageJobs,
) -> Vec<LabeledValue> {
    let mut facts: Vec<LabeledValue> = Vec::new();
    let seen = |facts: &[LabeledValue], label: &str| facts.iter().any(|f| f.label == label);

    for &(label, key) in fact_specs(template) {
        if seen(&facts, label) {
            continue;
        }
        let value = if key == "parent" {
            record
                .get("parent")
                .filter(|v| !is_empty(v))
                .or_else(|| record.get("articleParent"))
        } else {
            record.get(key)
        };
        let Some(value) = value.filter(|v| !is_empty(v)) else {
            continue;
        };

        let rendered = formatter.render(value, jobs);
        let rendered = rendered.trim();
        if rendered.is_empty() {
            continue;
        }
        let rendered = LINE_BREAK_REGEX.replace_all(rendered, " | ");
        if rendered.chars().count() > INFOBOX_FACT_MAX_LEN {
            continue;
        }
        facts.push(LabeledValue {
            label: label.to_string(),
            value: rendered.into_owned(),
        });
    }

    if !seen(&facts, "Type") {
        if let Some(title) = type_title(record) {
            facts.push(LabeledValue {
                label: "Type".to_string(),
                value: format!("[[{title}]]"),
            });
        }
    }
    facts
}

/// Every key that themed templates show outside the generic field list.
pub fn themed_skip_keys(template: &str) -> Vec<&'static str> {
    fact_specs(template)
        .iter()
        .map(|&(_, key)| key)
        .chain(CARD_SECTION_KEYS.iter().copied())
        .chain(TITLE_FIELD_KEYS.iter().copied())
        .collect()
}

/// YAML front-matter of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMatter {
    pub creation_date: String,
    pub publication_date: String,
    pub template: String,
    pub world: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn nested_string(record: &ArticleRecord, key: &str, inner: &str) -> String {
    match record.get(key) {
        Some(Value::Object(map)) => map.get(inner).map(plain_string).unwrap_or_default(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

impl FrontMatter {
    /// The article's tags plus its type title as a tag (when not already present).
    pub fn from_record(record: &ArticleRecord, template: &str) -> Self {
        let mut tags = parse_tags(record.get("tags"));
        if let Some(title) = type_title(record) {
            for tag in parse_tags(Some(&Value::Array(vec![Value::String(title)]))) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        Self {
            creation_date: nested_string(record, "creationDate", "date"),
            publication_date: nested_string(record, "publicationDate", "date"),
            template: template.to_string(),
            world: nested_string(record, "world", "title"),
            tags,
        }
    }

    /// `---` delimited YAML block, ready to prepend to the note body.
    pub fn to_block(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize front-matter")?;
        Ok(format!("---\n{yaml}---\n"))
    }
}

/// Everything a themed template can read.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RenderContext {
    pub title: String,
    pub title_pronunciation: String,
    pub title_subheading: String,
    pub title_excerpt: String,
    pub has_image: bool,
    pub cover_title: String,
    pub main_content: String,
    pub spotify_blocks: Vec<String>,
    pub sidebar_top_blocks: Vec<String>,
    pub sidebar_panel_blocks: Vec<String>,
    pub sidebar_bottom_blocks: Vec<String>,
    pub leaflet_block: String,
    pub infobox_facts: Vec<LabeledValue>,
    pub navigation_lines: Vec<String>,
    pub card_link_sections: Vec<CardLinkSection>,
    pub generic_fields: Vec<LabeledValue>,
    pub extra_sections: Vec<LabeledValue>,
    pub extra_relations: Vec<LabeledValue>,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template with this name is loaded. Callers fall back to the default
    /// renderer.
    #[error("template {0} not found")]
    NotFound(String),
    #[error("failed to render template {name}")]
    Render {
        name: String,
        #[source]
        source: tera::Error,
    },
}

/// Renders note bodies from named templates.
pub trait TemplateRenderer {
    fn has_template(&self, name: &str) -> bool;

    fn render(&self, name: &str, context: &RenderContext) -> Result<String, TemplateError>;

    /// `<name>` when `<name>.j2` exists (case-insensitive input), else `generic`.
    fn resolve_name(&self, template: &str) -> String {
        let normalized = template.trim().to_lowercase();
        if !normalized.is_empty() && self.has_template(&format!("{normalized}.j2")) {
            normalized
        } else {
            GENERIC_TEMPLATE.to_string()
        }
    }
}

/// Tera-backed renderer loading every `*.j2` under a directory.
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// A missing directory yields a renderer without templates, so every render
    /// reports [`TemplateError::NotFound`].
    pub fn new(templates_dir: &Path) -> Result<Self> {
        if !templates_dir.is_dir() {
            debug!(dir = %templates_dir.display(), "No templates directory");
            return Ok(Self {
                tera: Tera::default(),
            });
        }

        let glob = format!("{}/**/*.j2", templates_dir.display());
        let tera = Tera::new(&glob)
            .with_context(|| format!("Failed to load templates from {}", templates_dir.display()))?;
        info!(templates = tera.get_template_names().count(), "Templates loaded");
        Ok(Self { tera })
    }

    pub fn from_tera(tera: Tera) -> Self {
        Self { tera }
    }
}

impl TemplateRenderer for TeraRenderer {
    fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    fn render(&self, name: &str, context: &RenderContext) -> Result<String, TemplateError> {
        if !self.has_template(name) {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        let render_error = |source| TemplateError::Render {
            name: name.to_string(),
            source,
        };
        let context = Context::from_serialize(context).map_err(render_error)?;
        self.tera.render(name, &context).map_err(|e| match e.kind {
            tera::ErrorKind::TemplateNotFound(missing) => TemplateError::NotFound(missing),
            _ => render_error(e),
        })
    }
}
