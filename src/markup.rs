use crate::config::MarkupOptions;
use crate::images::{ImageJobs, ImageResolver};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ARTICLE_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\[([^\]]+)\]\([^)]+\)").unwrap());

static STRAY_CR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n\r").unwrap());

static SPOTIFY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\[spotify:(https?://open\.spotify\.com/(track|album|playlist|episode|show)/([A-Za-z0-9]+)(?:\?[^\]]*)?)\]",
    )
    .unwrap()
});

static INLINE_IMAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[img:(\d+)(\|[^\]]*)?\]|\[img\](\d+)\[/img\]").unwrap());

enum DialectRule {
    Replace(Regex, &'static str),
    List(Regex),
    Quote(Regex),
}

fn replace(pattern: &str, replacement: &'static str) -> DialectRule {
    DialectRule::Replace(Regex::new(pattern).unwrap(), replacement)
}

/// Applied top to bottom; later rules assume earlier ones already ran.
static DIALECT_RULES: Lazy<Vec<DialectRule>> = Lazy::new(|| {
    vec![
        replace(r"(?i)\[section:[^\]]*\]|\[/section\]", ""),
        replace(r"(?i)\[container:[^\]]*\]|\[/container\]", ""),
        replace(r"[ \t]+", " "),
        replace(r"\n +(\[h\d\])", "\n${1}"),
        replace(r"\[br\]", "\n"),
        replace(r"\[h1\](.*?)\[/h1\]", "# ${1}"),
        replace(r"\[h2\](.*?)\[/h2\]", "## ${1}"),
        replace(r"\[h3\](.*?)\[/h3\]", "### ${1}"),
        replace(r"\[h4\](.*?)\[/h4\]", "#### ${1}"),
        replace(r"\[p\](.*?)\[/p\]", "${1}\n"),
        replace(r"\[b\](.*?)\[/b\]", "**${1}**"),
        replace(r"\[i\](.*?)\[/i\]", "*${1}*"),
        replace(r"\[u\](.*?)\[/u\]", "<u>${1}</u>"),
        replace(r"\[s\](.*?)\[/s\]", "~~${1}~~"),
        replace(r"\[url\](.*?)\[/url\]", "[${1}]"),
        // Each `[*]` starts a bullet holding the text up to the next marker.
        DialectRule::List(Regex::new(r"(?s)\[list\](.*?)\[/list\]").unwrap()),
        // Code blocks span lines.
        replace(r"(?s)\[code\](.*?)\[/code\]", "```\n${1}\n```"),
        DialectRule::Quote(Regex::new(r"\[quote\]([\s\S]*?)\[/quote\]").unwrap()),
        replace(r"\[sup\](.*?)\[/sup\]", "<sup>${1}</sup>"),
        replace(r"\[sub\](.*?)\[/sub\]", "<sub>${1}</sub>"),
        replace(r"\[ol\]|\[/ol\]", ""),
        replace(r"\[ul\]|\[/ul\]", ""),
        replace(r"\[li\](.*?)\[/li\]", "- ${1}"),
    ]
});

/// Rewrites the export's bracket-tag dialect into Obsidian Markdown.
///
/// Pure apart from inline image tags, which consult the resolver and queue their
/// downloads on the caller's [`ImageJobs`]. Anything that does not match a known
/// pattern passes through untouched.
pub struct Rewriter<'a> {
    images: &'a ImageResolver<'a>,
    options: MarkupOptions,
}

impl<'a> Rewriter<'a> {
    pub fn new(images: &'a ImageResolver<'a>, options: &MarkupOptions) -> Self {
        Self {
            images,
            options: options.clone(),
        }
    }

    pub fn rewrite(&self, raw: &str, jobs: &mut ImageJobs) -> String {
        let text = ARTICLE_LINK_REGEX.replace_all(raw, "[[${1}]]");
        let text = STRAY_CR_REGEX.replace_all(&text, "\n");
        let text = SPOTIFY_REGEX.replace_all(&text, |caps: &Captures| spotify_embed(caps));
        let text = INLINE_IMAGE_REGEX
            .replace_all(&text, |caps: &Captures| self.inline_image(caps, jobs));

        if self.options.dialect_conversion {
            convert_dialect(&text)
        } else {
            text.into_owned()
        }
    }

    fn inline_image(&self, caps: &Captures, jobs: &mut ImageJobs) -> String {
        let image_id = caps
            .get(1)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let params = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

        match self.images.resolve(image_id) {
            Some(image) => {
                jobs.register_image(&image);
                self.inline_image_embed(&image.filename, params)
            }
            None if self.options.missing_image_placeholder => {
                format!("\n> [!warning] Missing image {image_id}\n")
            }
            None => caps[0].to_string(),
        }
    }

    fn inline_image_embed(&self, filename: &str, params: &str) -> String {
        let width = params
            .split('|')
            .map(str::trim)
            .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()))
            .find_map(|token| token.parse::<u64>().ok());

        let attribute = match width {
            Some(w) if w > 0 && self.options.themed => Some(width_class(w).to_string()),
            Some(w) if w > 0 => Some(w.to_string()),
            _ => None,
        };

        match attribute {
            Some(attr) => format!("\n![[{filename}|{attr}]]\n"),
            None => format!("\n![[{filename}]]\n"),
        }
    }

    pub fn portrait_embed(&self, filename: &str) -> String {
        if self.options.themed {
            format!("![[{filename}|portrait]]")
        } else {
            format!("![[{filename}|250]]")
        }
    }
}

/// Theme width class for an inline image of `width` pixels.
pub fn width_class(width: u64) -> &'static str {
    match width {
        0..=70 => "wmicro",
        71..=100 => "wtiny",
        101..=200 => "wsmall",
        201..=300 => "ws-med",
        301..=400 => "wm-sm",
        401..=500 => "wmed",
        501..=600 => "wm-tl",
        601..=700 => "wtall",
        _ => "wfull",
    }
}

fn spotify_embed(caps: &Captures) -> String {
    let media_type = caps[2].trim().to_lowercase();
    let media_id = caps[3].trim();
    let height = if media_type == "track" { 84 } else { 180 };
    format!(
        "<iframe style=\"border-radius:12px\" src=\"https://open.spotify.com/embed/{media_type}/{media_id}\" \
         width=\"100%\" height=\"{height}\" frameBorder=\"0\" allowfullscreen=\"\" \
         allow=\"autoplay; clipboard-write; encrypted-media; fullscreen; picture-in-picture\" \
         loading=\"lazy\"></iframe>"
    )
}

/// Splits Spotify tags out of `text`: returns their embeds and the text without them.
pub fn extract_spotify_embeds(text: &str) -> (Vec<String>, String) {
    let embeds = SPOTIFY_REGEX.captures_iter(text).map(|c| spotify_embed(&c)).collect();
    let remaining = SPOTIFY_REGEX.replace_all(text, "").into_owned();
    (embeds, remaining)
}

fn convert_dialect(text: &str) -> String {
    let mut text = text.to_string();
    for rule in DIALECT_RULES.iter() {
        text = match rule {
            DialectRule::Replace(pattern, replacement) => {
                pattern.replace_all(&text, *replacement).into_owned()
            }
            DialectRule::List(pattern) => pattern
                .replace_all(&text, |caps: &Captures| bullet_list(&caps[1]))
                .into_owned(),
            DialectRule::Quote(pattern) => pattern
                .replace_all(&text, |caps: &Captures| {
                    format!("> {}", caps[1].split('\n').collect::<Vec<_>>().join("\n> "))
                })
                .into_owned(),
        };
    }
    text
}

/// One `* item` line per `[*]` marker; text before the first marker is kept.
fn bullet_list(inner: &str) -> String {
    let mut parts = inner.split("[*]");
    let mut out = String::with_capacity(inner.len());
    if let Some(lead) = parts.next() {
        if !lead.trim().is_empty() {
            out.push_str(lead.trim());
            out.push('\n');
        }
    }
    for item in parts {
        out.push_str("* ");
        out.push_str(item.trim());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageIndex;
    use crate::models::ImageRef;

    fn harbor_index() -> ImageIndex {
        ImageIndex::from_images([ImageRef {
            id: "42".to_string(),
            title: "Harbor".to_string(),
            url: "https://cdn.example.com/42".to_string(),
            filename: "Harbor.png".to_string(),
        }])
    }

    fn rewrite_with(index: &ImageIndex, options: MarkupOptions, raw: &str) -> (String, usize) {
        let resolver = ImageResolver::new(index);
        let rewriter = Rewriter::new(&resolver, &options);
        let mut jobs = ImageJobs::new();
        let out = rewriter.rewrite(raw, &mut jobs);
        (out, jobs.len())
    }

    fn rewrite(raw: &str) -> String {
        rewrite_with(&harbor_index(), MarkupOptions::default(), raw).0
    }

    #[test]
    fn article_link_uses_author_label() {
        assert_eq!(
            rewrite("See @[the keep](article:1234-abcd) now"),
            "See [[the keep]] now"
        );
    }

    #[test]
    fn stray_carriage_returns_collapse() {
        assert_eq!(rewrite("a\r\n\rb"), "a\nb");
    }

    #[test]
    fn spotify_track_is_compact() {
        let out = rewrite("[spotify:https://open.spotify.com/track/abc123?si=xyz]");
        assert!(out.contains("https://open.spotify.com/embed/track/abc123"));
        assert!(out.contains("height=\"84\""));
    }

    #[test]
    fn spotify_playlist_is_tall() {
        let out = rewrite("[SPOTIFY:https://open.spotify.com/Playlist/P1]");
        assert!(out.contains("embed/playlist/P1"));
        assert!(out.contains("height=\"180\""));
    }

    #[test]
    fn spotify_unknown_type_passes_through() {
        let raw = "[spotify:https://open.spotify.com/artist/a1]";
        assert_eq!(
            rewrite_with(&harbor_index(), MarkupOptions { dialect_conversion: false, ..MarkupOptions::default() }, raw).0,
            raw
        );
    }

    #[test]
    fn extract_spotify_splits_embeds() {
        let (embeds, rest) =
            extract_spotify_embeds("Theme: [spotify:https://open.spotify.com/album/A1] end");
        assert_eq!(embeds.len(), 1);
        assert!(embeds[0].contains("embed/album/A1"));
        assert_eq!(rest, "Theme:  end");
    }

    #[test]
    fn inline_image_themed_width_class() {
        let (out, jobs) = rewrite_with(&harbor_index(), MarkupOptions::default(), "[img:42|left|450]");
        assert_eq!(out.trim(), "![[Harbor.png|wmed]]");
        assert_eq!(jobs, 1);
    }

    #[test]
    fn inline_image_plain_width() {
        let options = MarkupOptions {
            themed: false,
            ..MarkupOptions::default()
        };
        let (out, _) = rewrite_with(&harbor_index(), options, "[img:42|320]");
        assert_eq!(out.trim(), "![[Harbor.png|320]]");
    }

    #[test]
    fn inline_image_without_width() {
        let (out, jobs) = rewrite_with(&harbor_index(), MarkupOptions::default(), "[IMG]42[/IMG]");
        assert_eq!(out.trim(), "![[Harbor.png]]");
        assert_eq!(jobs, 1);
    }

    #[test]
    fn missing_image_becomes_warning_callout() {
        let (out, jobs) = rewrite_with(&ImageIndex::default(), MarkupOptions::default(), "[img:42]");
        assert!(out.contains("> [!warning] Missing image 42"));
        assert_eq!(jobs, 0);
    }

    #[test]
    fn missing_image_untouched_without_placeholder() {
        let options = MarkupOptions {
            missing_image_placeholder: false,
            ..MarkupOptions::default()
        };
        let (out, _) = rewrite_with(&ImageIndex::default(), options, "before [img:42|200] after");
        assert_eq!(out, "before [img:42|200] after");
    }

    #[test]
    fn width_buckets() {
        assert_eq!(width_class(70), "wmicro");
        assert_eq!(width_class(71), "wtiny");
        assert_eq!(width_class(200), "wsmall");
        assert_eq!(width_class(300), "ws-med");
        assert_eq!(width_class(400), "wm-sm");
        assert_eq!(width_class(500), "wmed");
        assert_eq!(width_class(600), "wm-tl");
        assert_eq!(width_class(700), "wtall");
        assert_eq!(width_class(701), "wfull");
    }

    #[test]
    fn headings_and_inline_styles() {
        assert_eq!(rewrite("[h1]Welcome[/h1]"), "# Welcome");
        assert_eq!(rewrite("[h3]Lore[/h3]"), "### Lore");
        assert_eq!(
            rewrite("[b]bold[/b] [i]it[/i] [u]un[/u] [s]gone[/s]"),
            "**bold** *it* <u>un</u> ~~gone~~"
        );
        assert_eq!(rewrite("x[sup]2[/sup] H[sub]2[/sub]O"), "x<sup>2</sup> H<sub>2</sub>O");
    }

    #[test]
    fn whitespace_and_heading_indent() {
        assert_eq!(rewrite("a \t  b\n   [h2]Title[/h2]"), "a b\n## Title");
    }

    #[test]
    fn containers_are_stripped() {
        assert_eq!(
            rewrite("[section:lead]Intro[/section][CONTAINER:box]Body[/container]"),
            "IntroBody"
        );
    }

    #[test]
    fn paragraphs_and_breaks() {
        assert_eq!(rewrite("[p]One[/p][p]Two[/p]"), "One\nTwo\n");
        assert_eq!(rewrite("a[br]b"), "a\nb");
    }

    #[test]
    fn list_items_become_bullets() {
        assert_eq!(rewrite("[list]\n[*]One\n[*]Two\n[/list]"), "* One\n* Two\n");
        assert_eq!(rewrite("[list][*]A[*]B[/list]"), "* A\n* B\n");
    }

    #[test]
    fn html_style_lists() {
        assert_eq!(rewrite("[ul][li]A[/li]\n[li]B[/li][/ul]"), "- A\n- B");
    }

    #[test]
    fn quote_prefixes_every_line() {
        assert_eq!(rewrite("[quote]line one\nline two[/quote]"), "> line one\n> line two");
    }

    #[test]
    fn code_block_is_fenced() {
        assert_eq!(rewrite("[code]let x = 1;[/code]"), "```\nlet x = 1;\n```");
    }

    #[test]
    fn code_block_spans_lines() {
        assert_eq!(
            rewrite("[code]fn a() {}\nfn b() {}[/code]"),
            "```\nfn a() {}\nfn b() {}\n```"
        );
    }

    #[test]
    fn list_keeps_item_text_on_its_bullet() {
        assert_eq!(rewrite("[list]Intro[*]A\n[*]B[/list]"), "Intro\n* A\n* B\n");
    }

    #[test]
    fn url_wrapper() {
        assert_eq!(rewrite("[url]https://example.com[/url]"), "[https://example.com]");
    }

    #[test]
    fn dialect_conversion_can_be_disabled() {
        let options = MarkupOptions {
            dialect_conversion: false,
            ..MarkupOptions::default()
        };
        let (out, _) = rewrite_with(&harbor_index(), options, "[b]raw[/b] @[Keep](x)");
        assert_eq!(out, "[b]raw[/b] [[Keep]]");
    }

    #[test]
    fn unmatched_tags_pass_through() {
        assert_eq!(rewrite("[b]never closed"), "[b]never closed");
        assert_eq!(rewrite("[custom]thing[/custom]"), "[custom]thing[/custom]");
    }

    #[test]
    fn rewrite_is_idempotent_on_converted_output() {
        let raw = "[h1]Welcome[/h1]\n[b]Bold[/b] and [i]it[/i]\n[quote]q[/quote]\n[img:42|90]";
        let once = rewrite(raw);
        assert_eq!(rewrite(&once), once);
    }

    #[test]
    fn nested_same_tags_are_not_balanced() {
        // Pairing is non-greedy and nesting-agnostic.
        assert_eq!(rewrite("[b]a [b]b[/b] c[/b]"), "**a [b]b** c[/b]");
    }
}
