//! Field value rendering and the per-article field collectors.
//!
//! Everything here reads an [`ArticleRecord`] and produces display strings; the
//! only side effect is registering image jobs (through the rewriter or for
//! sidebar portraits).

use crate::config::{HANDLED_FIELDS, IGNORED_FIELDS, MIN_SECTION_LENGTH};
use crate::images::ImageJobs;
use crate::index::TitleIndex;
use crate::markup::{extract_spotify_embeds, Rewriter};
use crate::models::{plain_string, ArticleRecord, ImageRef};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static CAMEL_BOUNDARY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NON_SLUG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());

const SIDEBAR_OPEN: &str = "<aside class=\"wa-sidebar\" style=\"float: right; width: min(360px, 42%); margin: 0 0 1rem 1rem;\">\n\n";
const SIDEBAR_CLOSE: &str = "\n\n</aside>\n\n";
const SIDEBAR_SEPARATOR: &str = "\n\n---\n\n";

const CARD_LINK_KEYS: &[(&str, &str)] = &[
    ("children", "Children"),
    ("childrenArticles", "Children Articles"),
    ("articles", "Articles"),
];

/// A rendered field, section or relation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: String,
}

impl LabeledValue {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardLinkSection {
    pub label: String,
    pub links: Vec<String>,
}

/// Rendered sidebar blocks, grouped by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SidebarSections {
    pub spotify: Vec<String>,
    pub top: Vec<String>,
    pub panel: Vec<String>,
    pub bottom: Vec<String>,
}

impl SidebarSections {
    /// All blocks in display order.
    pub fn blocks(&self) -> impl Iterator<Item = &String> {
        self.spotify
            .iter()
            .chain(&self.top)
            .chain(&self.panel)
            .chain(&self.bottom)
    }

    /// The floating aside used by the default renderer; empty when there is nothing
    /// to show.
    pub fn render_aside(&self) -> String {
        let blocks: Vec<&str> = self.blocks().map(String::as_str).collect();
        if blocks.is_empty() {
            return String::new();
        }
        format!("{SIDEBAR_OPEN}{}{SIDEBAR_CLOSE}", blocks.join(SIDEBAR_SEPARATOR))
    }
}

/// Whether a field value carries nothing worth showing.
///
/// Objects with a non-empty `title` or `date` always count as present; numbers
/// and booleans are never empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_empty),
        Value::Object(map) => {
            if map.get("title").is_some_and(|t| !is_empty(t)) {
                return false;
            }
            if map.get("date").is_some_and(|d| !is_empty(d)) {
                return false;
            }
            map.values().all(is_empty)
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Capitalizes the first letter of every alphabetic run and lowercases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Human label for a raw field key: `articleParent` → `Article Parent`,
/// `founding_date` → `Founding Date`.
pub fn field_label(name: &str) -> String {
    let spaced = CAMEL_BOUNDARY_REGEX.replace_all(name, "${1} ${2}");
    title_case(spaced.replace('_', " ").trim())
}

/// Label for a `sections` / `relations` key: underscores become spaces.
fn block_label(key: &str) -> String {
    title_case(&key.split('_').collect::<Vec<_>>().join(" "))
}

/// Display title used in wiki links. Map entities get a ` Map` suffix unless the
/// title already ends with one.
pub fn note_link_title(entity: &Value) -> Option<String> {
    let title = entity.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let class = entity
        .get("entityClass")
        .map(plain_string)
        .unwrap_or_default();
    if class.trim().eq_ignore_ascii_case("map") && !title.to_lowercase().ends_with(" map") {
        Some(format!("{title} Map"))
    } else {
        Some(title.to_string())
    }
}

fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(WHITESPACE_REGEX.replace_all(trimmed, "-").into_owned())
    }
}

/// Tags from a comma-separated string or a list; whitespace inside a tag becomes `-`.
pub fn parse_tags(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::String(s)) => s.split(',').filter_map(normalize_tag).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null() && !item.is_object() && !item.is_array())
            .filter_map(|item| normalize_tag(&plain_string(item)))
            .collect(),
        _ => Vec::new(),
    }
}

/// The article's type title, from a `type` object or a bare string.
pub fn type_title(record: &ArticleRecord) -> Option<String> {
    let title = match record.get("type")? {
        Value::Object(map) => map.get("title")?.as_str()?,
        Value::String(s) => s.as_str(),
        _ => return None,
    };
    Some(title.trim().to_string()).filter(|t| !t.is_empty())
}

/// Folder slug for a type title: punctuation dropped, lowercased, spaces → `-`.
pub fn type_folder_name(type_title: &str) -> Option<String> {
    let cleaned = NON_SLUG_REGEX.replace_all(type_title, "");
    let lowered = cleaned.trim().to_lowercase();
    let folder = WHITESPACE_REGEX.replace_all(&lowered, "-").into_owned();
    Some(folder).filter(|f| !f.is_empty())
}

/// `- Parent: [[..]]`, `- Previous: [[..]]`, `- Next: [[..]]` lines for references
/// the index can resolve. `parent` is consulted only when `articleParent` yields
/// nothing.
pub fn navigation_lines(record: &ArticleRecord, titles: &TitleIndex) -> Vec<String> {
    let resolve = |key: &str| record.get(key).and_then(|r| titles.resolve(r));

    let mut lines = Vec::new();
    if let Some(parent) = resolve("articleParent").or_else(|| resolve("parent")) {
        lines.push(format!("- Parent: [[{parent}]]"));
    }
    if let Some(previous) = resolve("articlePrevious") {
        lines.push(format!("- Previous: [[{previous}]]"));
    }
    if let Some(next) = resolve("articleNext") {
        lines.push(format!("- Next: [[{next}]]"));
    }
    lines
}

pub fn render_navigation(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    format!("## Navigation\n\n{}\n\n", lines.join("\n"))
}

/// Relation lists: article relations become wiki links, others plain titles.
pub fn relations(record: &ArticleRecord) -> Vec<LabeledValue> {
    let Some(Value::Object(relations)) = record.get("relations") else {
        return Vec::new();
    };

    relations
        .iter()
        .filter_map(|(key, data)| {
            let items = data.get("items")?.as_array()?;
            let mut content = String::new();
            for item in items {
                let Some(title) = item.get("title").and_then(Value::as_str) else {
                    continue;
                };
                if title.is_empty() {
                    continue;
                }
                if item.get("relationshipType").and_then(Value::as_str) == Some("article") {
                    content.push_str(&format!("[[{title}]]\n"));
                } else {
                    content.push_str(title);
                    content.push('\n');
                }
            }
            let content = content.trim();
            (!content.is_empty()).then(|| LabeledValue::new(block_label(key), content))
        })
        .collect()
}

/// Wiki-link lists for `children`, `childrenArticles` and `articles`.
pub fn card_link_sections(record: &ArticleRecord) -> Vec<CardLinkSection> {
    CARD_LINK_KEYS
        .iter()
        .filter_map(|(key, label)| {
            let items = record.get(*key)?.as_array()?;
            let links: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) => note_link_title(item)
                        .or_else(|| item.get("title").and_then(Value::as_str).map(str::to_string)),
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty())
                .map(|title| format!("[[{title}]]"))
                .collect();
            (!links.is_empty()).then(|| CardLinkSection {
                label: label.to_string(),
                links,
            })
        })
        .collect()
}

/// Renders field values to Markdown, rewriting any markup they contain.
pub struct Formatter<'a> {
    rewriter: &'a Rewriter<'a>,
}

impl<'a> Formatter<'a> {
    pub fn new(rewriter: &'a Rewriter<'a>) -> Self {
        Self { rewriter }
    }

    pub fn render(&self, value: &Value, jobs: &mut ImageJobs) -> String {
        match value {
            Value::String(s) => self.rewriter.rewrite(s, jobs),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            Value::Object(map) => {
                if let Some(title) = note_link_title(value) {
                    return format!("[[{title}]]");
                }
                if let Some(date) = map.get("date").filter(|d| !is_empty(d)) {
                    return plain_string(date);
                }
                map.iter()
                    .filter(|(_, item)| !is_empty(item))
                    .filter_map(|(key, item)| {
                        let text = self.render(item, jobs);
                        (!text.is_empty()).then(|| format!("- **{}**: {text}", field_label(key)))
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Value::Array(items) => items
                .iter()
                .filter(|item| !is_empty(item))
                .filter_map(|item| {
                    let text = self.render(item, jobs);
                    (!text.is_empty()).then(|| format!("- {text}"))
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Long-form `sections` entries with more than a few characters of content.
    pub fn sections(&self, record: &ArticleRecord, jobs: &mut ImageJobs) -> Vec<LabeledValue> {
        let Some(Value::Object(sections)) = record.get("sections") else {
            return Vec::new();
        };

        let mut collected = Vec::new();
        for (key, data) in sections {
            let Some(content) = data.get("content").and_then(Value::as_str) else {
                continue;
            };
            if content.chars().count() > MIN_SECTION_LENGTH {
                let rendered = self.rewriter.rewrite(content, jobs);
                collected.push(LabeledValue::new(block_label(key), rendered));
            }
        }
        collected
    }

    /// Every field not ignored, not handled elsewhere and not in `skip_keys`, in
    /// record order.
    pub fn generic_fields(
        &self,
        record: &ArticleRecord,
        skip_keys: &[&str],
        jobs: &mut ImageJobs,
    ) -> Vec<LabeledValue> {
        let Some(map) = record.as_object() else {
            return Vec::new();
        };

        let mut fields = Vec::new();
        for (key, value) in map {
            let key = key.as_str();
            if IGNORED_FIELDS.contains(&key)
                || HANDLED_FIELDS.contains(&key)
                || skip_keys.contains(&key)
                || is_empty(value)
            {
                continue;
            }
            let rendered = self.render(value, jobs);
            if !rendered.trim().is_empty() {
                fields.push(LabeledValue::new(field_label(key), rendered));
            }
        }
        fields
    }

    /// Sidebar blocks. Spotify tags are lifted out of `sidebarcontent`; the `person`
    /// template gets its portrait at the top of the sidebar.
    pub fn sidebar_sections(
        &self,
        record: &ArticleRecord,
        template_name: Option<&str>,
        jobs: &mut ImageJobs,
    ) -> SidebarSections {
        let field = |key: &str| record.get(key).filter(|v| !is_empty(v));
        let resolved_template = template_name
            .filter(|t| !t.is_empty())
            .or_else(|| record.get("templateType").and_then(Value::as_str).filter(|t| !t.is_empty()))
            .or_else(|| record.get("template").and_then(Value::as_str))
            .unwrap_or_default()
            .to_lowercase();

        let mut spotify = Vec::new();
        let mut remainder: Option<Value> = None;
        match record.get("sidebarcontent") {
            Some(Value::String(s)) => {
                let (embeds, remaining) = extract_spotify_embeds(s);
                spotify = embeds;
                if !remaining.trim().is_empty() {
                    remainder = Some(Value::String(remaining));
                }
            }
            Some(other) if !is_empty(other) => remainder = Some(other.clone()),
            _ => {}
        }

        let mut top = Vec::new();
        if resolved_template == "person" {
            if let Some(portrait) = record.get("portrait").and_then(ImageRef::from_record) {
                jobs.register_image(&portrait);
                top.push(Value::String(self.rewriter.portrait_embed(&portrait.filename)));
            }
        }
        top.extend(field("sidepanelcontenttop").cloned());

        let mut panel: Vec<Value> = field("sidepanelcontent").cloned().into_iter().collect();
        panel.extend(remainder);

        let bottom: Vec<Value> = field("sidebarcontentbottom")
            .or_else(|| field("sidepanelcontentbottom"))
            .cloned()
            .into_iter()
            .collect();

        SidebarSections {
            spotify,
            top: self.render_blocks(&top, jobs),
            panel: self.render_blocks(&panel, jobs),
            bottom: self.render_blocks(&bottom, jobs),
        }
    }

    fn render_blocks(&self, values: &[Value], jobs: &mut ImageJobs) -> Vec<String> {
        values
            .iter()
            .filter(|v| !is_empty(v))
            .map(|v| self.render(v, jobs).trim().to_string())
            .filter(|block| !block.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkupOptions;
    use crate::images::{ImageIndex, ImageResolver};
    use serde_json::json;

    fn with_formatter<T>(f: impl FnOnce(&Formatter, &mut ImageJobs) -> T) -> (T, usize) {
        let index = ImageIndex::default();
        let resolver = ImageResolver::new(&index);
        let rewriter = Rewriter::new(&resolver, &MarkupOptions::default());
        let formatter = Formatter::new(&rewriter);
        let mut jobs = ImageJobs::new();
        let out = f(&formatter, &mut jobs);
        (out, jobs.len())
    }

    fn render(value: Value) -> String {
        with_formatter(|f, jobs| f.render(&value, jobs)).0
    }

    #[test]
    fn emptiness_rules() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("   ")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!(["", null, []])));
        assert!(is_empty(&json!({"a": "", "b": null})));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!(false)));
        assert!(!is_empty(&json!({"title": "Keep", "x": null})));
        assert!(!is_empty(&json!({"date": "1200-01-01"})));
        assert!(!is_empty(&json!(["", "x"])));
    }

    #[test]
    fn list_emptiness_is_conjunction() {
        let samples = [json!(null), json!(""), json!("x"), json!(1), json!([]), json!({"title": "t"})];
        for a in &samples {
            for b in &samples {
                let pair = Value::Array(vec![a.clone(), b.clone()]);
                assert_eq!(is_empty(&pair), is_empty(a) && is_empty(b), "{a} {b}");
            }
        }
    }

    #[test]
    fn labels_split_camel_case_and_underscores() {
        assert_eq!(field_label("articleParent"), "Article Parent");
        assert_eq!(field_label("founding_date"), "Founding Date");
        assert_eq!(field_label("population2World"), "Population2 World");
        assert_eq!(field_label("  otherNames "), "Other Names");
    }

    #[test]
    fn render_scalars() {
        assert_eq!(render(json!(true)), "true");
        assert_eq!(render(json!(12)), "12");
        assert_eq!(render(json!(1.5)), "1.5");
        assert_eq!(render(json!("[b]Bold[/b]")), "**Bold**");
    }

    #[test]
    fn render_link_and_date_objects() {
        assert_eq!(render(json!({"title": "Skyhold", "id": "a1"})), "[[Skyhold]]");
        assert_eq!(
            render(json!({"title": "Old Roads", "entityClass": "Map"})),
            "[[Old Roads Map]]"
        );
        assert_eq!(render(json!({"date": "1200-05-01", "timezone": "x"})), "1200-05-01");
    }

    #[test]
    fn render_nested_objects_and_lists() {
        assert_eq!(
            render(json!({"firstName": "Ann", "age": 30, "skip": ""})),
            "- **First Name**: Ann\n- **Age**: 30"
        );
        assert_eq!(render(json!(["a", "", {"title": "B"}])), "- a\n- [[B]]");
    }

    #[test]
    fn note_link_titles() {
        assert_eq!(note_link_title(&json!({"title": " Keep "})), Some("Keep".to_string()));
        assert_eq!(
            note_link_title(&json!({"title": "World Map", "entityClass": "map"})),
            Some("World Map".to_string())
        );
        assert_eq!(note_link_title(&json!({"title": ""})), None);
        assert_eq!(note_link_title(&json!({"title": 3})), None);
        assert_eq!(note_link_title(&json!("Keep")), None);
    }

    #[test]
    fn tags_from_string_and_list() {
        assert_eq!(
            parse_tags(Some(&json!("north, old  kingdom ,,war"))),
            vec!["north", "old-kingdom", "war"]
        );
        assert_eq!(parse_tags(Some(&json!(["a b", " ", 7]))), vec!["a-b", "7"]);
        assert!(parse_tags(Some(&json!(5))).is_empty());
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn type_title_and_folder() {
        assert_eq!(type_title(&json!({"type": {"title": " Fortress "}})), Some("Fortress".to_string()));
        assert_eq!(type_title(&json!({"type": "Town"})), Some("Town".to_string()));
        assert_eq!(type_title(&json!({"type": {"title": ""}})), None);
        assert_eq!(type_folder_name("Ancient  Ruins!"), Some("ancient-ruins".to_string()));
        assert_eq!(type_folder_name("???"), None);
    }

    #[test]
    fn navigation_prefers_article_parent() {
        let titles = TitleIndex::from_pairs([("p1", "Realm"), ("n1", "Next Town")]);
        let record = json!({
            "articleParent": "p1",
            "parent": {"title": "Ignored"},
            "articleNext": {"id": "n1"},
            "articlePrevious": 17
        });
        assert_eq!(
            navigation_lines(&record, &titles),
            vec!["- Parent: [[Realm]]", "- Next: [[Next Town]]"]
        );
    }

    #[test]
    fn navigation_falls_back_to_parent() {
        let titles = TitleIndex::default();
        let record = json!({"articleParent": "unknown", "parent": {"title": "Valley"}});
        let lines = navigation_lines(&record, &titles);
        assert_eq!(lines, vec!["- Parent: [[Valley]]"]);
        assert_eq!(render_navigation(&lines), "## Navigation\n\n- Parent: [[Valley]]\n\n");
        assert_eq!(render_navigation(&[]), "");
    }

    #[test]
    fn sections_need_enough_content() {
        let record = json!({"sections": {
            "early_history": {"content": "[b]Long enough[/b] text"},
            "short": {"content": "tiny"},
            "broken": "not an object"
        }});
        let (sections, _) = with_formatter(|f, jobs| f.sections(&record, jobs));
        assert_eq!(
            sections,
            vec![LabeledValue::new("Early History", "**Long enough** text")]
        );
    }

    #[test]
    fn relations_link_articles_only() {
        let record = json!({"relations": {
            "allied_factions": {"items": [
                {"title": "Guild", "relationshipType": "article"},
                {"title": "Loose band", "relationshipType": "text"},
                {"title": ""}
            ]},
            "empty": {"items": []}
        }});
        assert_eq!(
            relations(&record),
            vec![LabeledValue::new("Allied Factions", "[[Guild]]\nLoose band")]
        );
    }

    #[test]
    fn card_links_from_objects_and_strings() {
        let record = json!({
            "children": [{"title": "North Gate"}, " Market ", "", 4],
            "articles": [{"title": "Coast", "entityClass": "Map"}],
            "childrenArticles": "not a list"
        });
        let sections = card_link_sections(&record);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].label, "Children");
        assert_eq!(sections[0].links, vec!["[[North Gate]]", "[[Market]]"]);
        assert_eq!(sections[1].links, vec!["[[Coast Map]]"]);
    }

    #[test]
    fn generic_fields_skip_known_keys() {
        let record = json!({
            "id": "a1",
            "title": "Skyhold",
            "content": "body",
            "climate": "Cold",
            "population": 1200,
            "ruler": {"title": "Queen"},
            "blank": "",
            "demonym": "Skyholder"
        });
        let (fields, _) = with_formatter(|f, jobs| f.generic_fields(&record, &["demonym"], jobs));
        assert_eq!(
            fields,
            vec![
                LabeledValue::new("Climate", "Cold"),
                LabeledValue::new("Population", "1200"),
                LabeledValue::new("Ruler", "[[Queen]]"),
            ]
        );
    }

    #[test]
    fn sidebar_lifts_spotify_and_orders_slots() {
        let record = json!({
            "sidepanelcontenttop": "Top",
            "sidepanelcontent": "[b]Panel[/b]",
            "sidebarcontent": "[spotify:https://open.spotify.com/track/T1] Extra",
            "sidepanelcontentbottom": "Bottom"
        });
        let (sidebar, _) = with_formatter(|f, jobs| f.sidebar_sections(&record, None, jobs));
        assert_eq!(sidebar.spotify.len(), 1);
        assert_eq!(sidebar.top, vec!["Top"]);
        assert_eq!(sidebar.panel, vec!["**Panel**", "Extra"]);
        assert_eq!(sidebar.bottom, vec!["Bottom"]);

        let aside = sidebar.render_aside();
        assert!(aside.starts_with("<aside class=\"wa-sidebar\""));
        assert!(aside.contains("Top\n\n---\n\n**Panel**"));
        assert!(aside.ends_with("</aside>\n\n"));
    }

    #[test]
    fn sidebar_portrait_for_person_template() {
        let record = json!({
            "templateType": "Person",
            "portrait": {"id": "9", "url": "http://x/p.jpg", "title": "Ann"},
            "sidepanelcontenttop": "Facts"
        });
        let (sidebar, jobs) = with_formatter(|f, jobs| f.sidebar_sections(&record, None, jobs));
        assert_eq!(sidebar.top, vec!["![[Ann.png|portrait]]", "Facts"]);
        assert_eq!(jobs, 1);
    }

    #[test]
    fn empty_sidebar_renders_nothing() {
        let (sidebar, _) = with_formatter(|f, jobs| f.sidebar_sections(&json!({}), None, jobs));
        assert_eq!(sidebar.render_aside(), "");
    }
}
