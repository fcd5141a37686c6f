//! Video reference discovery over annotation text and embedded HTML documents

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::AnnotationRecord;

/// Link patterns, in the order they are tried for the canonical id
const VIDEO_ID_PATTERNS: &[&str] = &[
    r"(?:https?://)?(?:www\.|m\.)?youtube\.com/watch\?(?:[^\s<>]*?&(?:amp;)?)?v=([A-Za-z0-9_-]{11})",
    r"(?:https?://)?youtu\.be/([A-Za-z0-9_-]{11})",
    r"@\[youtube\]\(([A-Za-z0-9_-]{11})\)",
    r"(?:https?://)?(?:www\.)?youtube(?:-nocookie)?\.com/embed/([A-Za-z0-9_-]{11})",
];

const VIDEO_FILE_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v", ".ogv"];
const VIDEO_HOSTS: &[&str] = &["vimeo.com", "loom.com", "wistia.com"];
const PREVIEW_CHARS: usize = 100;

/// Which discovery pass produced a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    AnnotationContent,
    EmbeddedDocument,
}

/// Where a reference was found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoContext {
    /// `annotation`, `iframe`, `video`, `link` or `text`
    pub location: String,
    pub source_id: Option<String>,
    pub source_title: Option<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoReference {
    pub canonical_id: Option<String>,
    pub url: String,
    pub discovery_source: DiscoverySource,
    pub context: VideoContext,
}

impl VideoReference {
    /// `url` is kept as written; the id carries the identity
    fn youtube(id: String, url: String, discovery_source: DiscoverySource, context: VideoContext) -> Self {
        Self {
            url,
            canonical_id: Some(id),
            discovery_source,
            context,
        }
    }

    /// Identity used for deduplication
    fn dedup_key(&self) -> String {
        match &self.canonical_id {
            Some(id) => format!("id:{}", id),
            None => format!("url:{}", self.url.trim().to_lowercase()),
        }
    }
}

/// An HTML sub-document rendered alongside an item, e.g. the item page or an iframe body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    pub location: String,
    pub html: String,
}

/// Compiled link patterns shared by both discovery passes
#[derive(Debug, Clone)]
pub struct VideoDiscovery {
    patterns: Vec<Regex>,
}

impl Default for VideoDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDiscovery {
    pub fn new() -> Self {
        let patterns = VIDEO_ID_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        Self { patterns }
    }

    /// First pattern that matches wins
    pub fn canonical_id(&self, url: &str) -> Option<String> {
        self.patterns
            .iter()
            .find_map(|re| re.captures(url))
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    }

    /// Every video in `text` as `(id, link)`, in order of appearance.
    /// The `@[youtube](id)` shorthand is not a link and becomes a watch URL.
    pub fn links_in_text(&self, text: &str) -> Vec<(String, String)> {
        let mut found: Vec<(usize, String, String)> = self
            .patterns
            .iter()
            .flat_map(|re| re.captures_iter(text))
            .filter_map(|captures| {
                let id = captures.get(1)?;
                let link = captures.get(0)?.as_str();
                let link = if link.starts_with("@[") {
                    format!("https://www.youtube.com/watch?v={}", id.as_str())
                } else {
                    link.to_string()
                };
                Some((id.start(), id.as_str().to_string(), link))
            })
            .collect();

        found.sort();
        found.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
        found.into_iter().map(|(_, id, link)| (id, link)).collect()
    }

    /// First pass: video links written into annotation bodies
    pub fn discover_in_annotations(&self, annotations: &[AnnotationRecord]) -> Vec<VideoReference> {
        let mut videos = Vec::new();

        for annotation in annotations {
            if annotation.content.is_empty() {
                continue;
            }

            for (id, link) in self.links_in_text(&annotation.content) {
                videos.push(VideoReference::youtube(
                    id,
                    link,
                    DiscoverySource::AnnotationContent,
                    VideoContext {
                        location: "annotation".to_string(),
                        source_id: Some(annotation.id.clone()),
                        source_title: Some(annotation.title.clone()),
                        preview: Some(preview(&annotation.content)),
                    },
                ));
            }
        }

        videos
    }

    /// Second pass: video elements and links inside embedded HTML documents
    pub fn discover_in_documents(&self, documents: &[EmbeddedDocument]) -> Vec<VideoReference> {
        let mut videos = Vec::new();
        for document in documents {
            self.scan_document(&document.html, &document.location, 1, &mut videos);
        }
        videos
    }

    fn scan_document(&self, html: &str, location: &str, depth: u8, videos: &mut Vec<VideoReference>) {
        let document = Html::parse_document(html);

        let context = |kind: &str| VideoContext {
            location: kind.to_string(),
            source_id: Some(location.to_string()),
            ..Default::default()
        };

        for src in attribute_values(&document, "iframe[src]", "src") {
            if let Some(video) = self.reference_for(&src, false, context("iframe")) {
                videos.push(video);
            }
        }

        for selector in ["video[src]", "video source[src]"] {
            for src in attribute_values(&document, selector, "src") {
                if let Some(video) = self.reference_for(&src, true, context("video")) {
                    videos.push(video);
                }
            }
        }

        for href in attribute_values(&document, "a[href]", "href") {
            if let Some(video) = self.reference_for(&href, false, context("link")) {
                videos.push(video);
            }
        }

        if depth > 0 {
            for inline in attribute_values(&document, "iframe[srcdoc]", "srcdoc") {
                self.scan_document(&inline, location, depth - 1, videos);
            }
        }

        let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
        for (id, link) in self.links_in_text(&text) {
            videos.push(VideoReference::youtube(id, link, DiscoverySource::EmbeddedDocument, context("text")));
        }
    }

    /// `always_keep` is set for `<video>` sources, which are videos whatever their URL
    fn reference_for(&self, url: &str, always_keep: bool, context: VideoContext) -> Option<VideoReference> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        if let Some(id) = self.canonical_id(url) {
            return Some(VideoReference::youtube(
                id,
                url.to_string(),
                DiscoverySource::EmbeddedDocument,
                context,
            ));
        }

        if always_keep || looks_like_video(url) {
            return Some(VideoReference {
                canonical_id: None,
                url: url.to_string(),
                discovery_source: DiscoverySource::EmbeddedDocument,
                context,
            });
        }

        None
    }
}

fn attribute_values(document: &Html, selector: &str, attribute: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr(attribute))
        .map(str::to_string)
        .collect()
}

fn looks_like_video(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();

    VIDEO_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || VIDEO_HOSTS.iter().any(|host| lower.contains(host))
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        format!("{}...", content.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        content.to_string()
    }
}

/// Merge references from every pass; first-seen wins per canonical id or normalized URL
pub fn dedupe_videos(videos: Vec<VideoReference>) -> Vec<VideoReference> {
    let mut seen = HashSet::new();
    let total = videos.len();

    let unique: Vec<VideoReference> = videos
        .into_iter()
        .filter(|video| seen.insert(video.dedup_key()))
        .collect();

    debug!("🎬 {} video references, {} unique", total, unique.len());
    unique
}
