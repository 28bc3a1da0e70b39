//! Content extractors
//!
//! This module handles turning fetched markup into structured payloads:
//! - Book pages: hadith blocks, their narrator links, and the breadcrumb trail
//! - Narrator profiles: labelled biography fields and jarh wa ta'dil entries
//!
//! Extractors only parse. Deciding what an empty result means is the
//! classifier's job; each extractor reports block and entity counts plus the
//! raw structural indicators the classifier needs for that decision.

use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};

/// Structured result of extracting one page
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    /// Structural blocks found (hadith blocks, profile fields)
    pub block_count: usize,

    /// Target entities found inside the blocks (narrator links, a usable profile)
    pub entity_count: usize,

    /// Raw counts of structural markers, independent of extraction
    pub indicators: Vec<(&'static str, usize)>,

    /// Fields written to the success line
    pub payload: Map<String, Value>,

    /// One-line description for progress output
    pub summary: String,
}

impl ExtractedContent {
    /// Renders the indicators as `name: count, ...`
    pub fn describe_indicators(&self) -> String {
        self.indicators
            .iter()
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parses fetched markup for one kind of unit
pub trait ContentExtractor: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    fn extract(&self, markup: &str, url: &str) -> ExtractedContent;
}

const BREADCRUMB_LABEL: &str = "مسار الصفحة الحالية";
const BREADCRUMB_FALLBACK: &str = ".breadcrumb, .breadcrumbs, #breadcrumb, .path, .navpath";
const NARRATOR_LINK: &str = "a[href*='/narrator/']";
const BLOCK_NOISE: &str = "a.btn_tag, span.fa, span.anchor";

/// Extracts hadith blocks from a book page
#[derive(Debug, Clone, Copy, Default)]
pub struct BookPageExtractor;

impl ContentExtractor for BookPageExtractor {
    fn kind(&self) -> &'static str {
        "book page"
    }

    fn extract(&self, markup: &str, url: &str) -> ExtractedContent {
        let document = Html::parse_document(markup);

        let mut blocks = Vec::new();
        let mut narrator_total = 0;
        let mut blocks_with_narrators = 0;

        if let (Ok(block_selector), Ok(link_selector), Ok(matn_selector), Ok(noise_selector)) = (
            Selector::parse("div.nass"),
            Selector::parse(NARRATOR_LINK),
            Selector::parse("span.c2"),
            Selector::parse(BLOCK_NOISE),
        ) {
            for block in document.select(&block_selector) {
                let narrators: Vec<Value> = block
                    .select(&link_selector)
                    .filter_map(|link| {
                        let href = link.value().attr("href")?;
                        let id = narrator_id_from_href(href)?;
                        Some(json!({
                            "id": id,
                            "name": normalize_whitespace(&element_text(link)),
                            "url": href,
                        }))
                    })
                    .collect();

                let matn = block
                    .select(&matn_selector)
                    .next()
                    .map(|el| normalize_whitespace(&element_text(el)))
                    .unwrap_or_default();

                let noise: Vec<ElementRef<'_>> = block.select(&noise_selector).collect();
                let full_text = normalize_whitespace(&text_excluding(block, &noise));

                narrator_total += narrators.len();
                if !narrators.is_empty() {
                    blocks_with_narrators += 1;
                }

                blocks.push(json!({
                    "full_text": full_text,
                    "matn": matn,
                    "narrators": narrators,
                }));
            }
        }

        let indicators = vec![
            ("div.nass", count_matches(&document, "div.nass")),
            ("narrator links", count_matches(&document, NARRATOR_LINK)),
        ];

        let summary = if blocks_with_narrators == 0 {
            let sample: String = blocks
                .first()
                .and_then(|b| b["full_text"].as_str())
                .map(|text| text.chars().take(100).collect())
                .unwrap_or_default();
            if sample.is_empty() {
                format!("{} hadith blocks but no narrator links", blocks.len())
            } else {
                format!(
                    "{} hadith blocks but no narrator links. Sample: {}",
                    blocks.len(),
                    sample
                )
            }
        } else {
            format!("{} hadith blocks, {} narrators", blocks.len(), narrator_total)
        };

        let mut payload = Map::new();
        payload.insert("url".to_string(), Value::from(url));
        payload.insert(
            "breadcrumb_links".to_string(),
            Value::Array(extract_breadcrumb(&document)),
        );
        let block_count = blocks.len();
        payload.insert("hadith_blocks".to_string(), Value::Array(blocks));

        ExtractedContent {
            block_count,
            entity_count: blocks_with_narrators,
            indicators,
            payload,
            summary,
        }
    }
}

/// Labelled profile fields and their payload keys
const PROFILE_FIELDS: [(&str, &str); 10] = [
    ("الاسم", "name"),
    ("الكنية", "kunya"),
    ("النسب", "nasab"),
    ("علاقات الراوي", "relations"),
    ("المذهب العقدي", "aqeeda"),
    ("تاريخ الوفاة", "death_date"),
    ("تاريخ الميلاد", "birth_date"),
    ("طبقة رواة التقريب", "tabaqa"),
    ("الرتبة عند ابن حجر", "rank_ibn_hajar"),
    ("الرتبة عند الذهبي", "rank_dhahabi"),
];

/// Extracts a narrator profile
#[derive(Debug, Clone, Copy, Default)]
pub struct NarratorProfileExtractor;

impl ContentExtractor for NarratorProfileExtractor {
    fn kind(&self) -> &'static str {
        "narrator profile"
    }

    fn extract(&self, markup: &str, url: &str) -> ExtractedContent {
        let document = Html::parse_document(markup);

        let container = Selector::parse("section .col-md-12")
            .ok()
            .and_then(|selector| document.select(&selector).next())
            .unwrap_or_else(|| document.root_element());

        let mut payload = Map::new();
        payload.insert("url".to_string(), Value::from(url));

        let mut field_count = 0;
        if let Ok(label_selector) = Selector::parse("b") {
            for div in container
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "div")
            {
                let Some(label_el) = div.select(&label_selector).next() else {
                    continue;
                };
                let label = normalize_whitespace(&element_text(label_el));
                let label = label.trim_end_matches(':');

                if let Some((_, key)) = PROFILE_FIELDS
                    .iter()
                    .find(|(arabic, _)| label.contains(arabic))
                {
                    let value = normalize_whitespace(&text_excluding(div, &[label_el]));
                    payload.insert(key.to_string(), Value::from(value));
                    field_count += 1;
                }
            }
        }

        payload.insert(
            "jarh_wa_tadil".to_string(),
            Value::Array(extract_jarh_wa_tadil(container)),
        );

        let name = payload.get("name").and_then(Value::as_str).unwrap_or("");
        let kunya = payload.get("kunya").and_then(Value::as_str).unwrap_or("");

        let (entity_count, summary) = if name.contains("404") || name.contains("Page Not Found") {
            (0, "404 page not found".to_string())
        } else if strip_leading_punctuation(name).is_empty()
            && strip_leading_punctuation(kunya).is_empty()
        {
            (0, "Empty narrator profile".to_string())
        } else {
            (1, format!("narrator {}", name))
        };

        let indicators = vec![
            ("profile containers", count_matches(&document, "section .col-md-12")),
            ("labelled fields", count_matches(&document, "div > b")),
        ];

        ExtractedContent {
            block_count: field_count,
            entity_count,
            indicators,
            payload,
            summary,
        }
    }
}

/// Scholar entries: each `div.alert-info` followed by its quote divs
fn extract_jarh_wa_tadil(container: ElementRef<'_>) -> Vec<Value> {
    let Ok(scholar_selector) = Selector::parse("div.alert.alert-info") else {
        return Vec::new();
    };

    container
        .select(&scholar_selector)
        .filter_map(|scholar_div| {
            let scholar = normalize_whitespace(&element_text(scholar_div));
            if scholar.is_empty() {
                return None;
            }

            let mut quotes = Vec::new();
            for sibling in scholar_div.next_siblings().filter_map(ElementRef::wrap) {
                let name = sibling.value().name();
                let is_scholar = name == "div" && sibling.value().classes().any(|c| c == "alert-info");
                if is_scholar || name == "h4" {
                    break;
                }
                if name == "div" {
                    let text = normalize_whitespace(&element_text(sibling));
                    if !text.is_empty() {
                        quotes.push(Value::from(text));
                    }
                }
            }

            Some(json!({ "scholar": scholar, "quotes": quotes }))
        })
        .collect()
}

/// Breadcrumb links as `{text, href}`
///
/// Looks for the labelled trail first, climbing up to three ancestors from
/// the label; falls back to common breadcrumb classes.
fn extract_breadcrumb(document: &Html) -> Vec<Value> {
    let Ok(link_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let links_in = |element: ElementRef<'_>| -> Vec<Value> {
        element
            .select(&link_selector)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                Some(json!({ "text": normalize_whitespace(&element_text(a)), "href": href }))
            })
            .collect()
    };

    let label_node = document.root_element().descendants().find(|node| {
        node.value()
            .as_text()
            .map_or(false, |text| text.contains(BREADCRUMB_LABEL))
    });

    if let Some(label_node) = label_node {
        let mut container = label_node.parent().and_then(ElementRef::wrap);
        for _ in 0..3 {
            let Some(element) = container else {
                break;
            };
            let links = links_in(element);
            if !links.is_empty() {
                return links;
            }
            container = element.parent().and_then(ElementRef::wrap);
        }
    }

    Selector::parse(BREADCRUMB_FALLBACK)
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .map(links_in)
        .unwrap_or_default()
}

/// Numeric id from a `/narrator/<digits>` link
pub fn narrator_id_from_href(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/narrator/")?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Collapses runs of whitespace to single spaces and trims
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_punctuation(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '،' | ',' | '.' | '-'))
}

/// Text fragments of an element joined by spaces
fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Text of an element, skipping the subtrees rooted at `excluded`
fn text_excluding(element: ElementRef<'_>, excluded: &[ElementRef<'_>]) -> String {
    element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let inside_excluded = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| excluded.contains(&ancestor));
            if inside_excluded {
                None
            } else {
                Some(&**text)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn count_matches(document: &Html, selector: &str) -> usize {
    Selector::parse(selector)
        .map(|selector| document.select(&selector).count())
        .unwrap_or(0)
}
