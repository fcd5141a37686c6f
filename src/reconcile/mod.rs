//! Turns one item's raw extraction payload into nodes, annotation contexts and videos
//!
//! Pure and stateless: classify, match annotations to nodes, then discover and
//! deduplicate video references across both discovery passes.

pub mod classify;
pub mod matching;
pub mod videos;

pub use classify::{ItemClassifier, ItemKind};
pub use matching::{match_annotations, MatchMethod, NodeContext, StandaloneAnnotation};
pub use videos::{dedupe_videos, DiscoverySource, EmbeddedDocument, VideoContext, VideoDiscovery, VideoReference};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ReconcileConfig;

/// Canvas coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One item as returned by the extraction source, before classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub position: Option<Vec<f64>>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub parameters: Value,

    /// Everything else the source sent along
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Ids arrive as strings or numbers depending on the endpoint
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => id,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl RawItem {
    /// `None` unless at least two coordinates are present
    pub fn position(&self) -> Option<Position> {
        match self.position.as_deref() {
            Some([x, y, ..]) => Some(Position { x: *x, y: *y }),
            _ => None,
        }
    }
}

/// A raw item accepted as a functional node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub parameters: Value,
}

/// A raw item accepted as a free-text note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub position: Position,
}

impl AnnotationRecord {
    /// `## title` heading followed by the content
    pub fn markdown(&self) -> String {
        let mut markdown = String::new();
        if !self.title.is_empty() {
            markdown.push_str(&format!("## {}\n\n", self.title));
        }
        markdown.push_str(&self.content);
        markdown.trim().to_string()
    }
}

/// Everything reconciliation produced for one item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    pub nodes: Vec<NodeRecord>,
    pub contexts: Vec<NodeContext>,
    pub standalone: Vec<StandaloneAnnotation>,
    pub videos: Vec<VideoReference>,
}

pub struct ReconciliationEngine {
    classifier: ItemClassifier,
    discovery: VideoDiscovery,
    match_threshold: f64,
}

impl ReconciliationEngine {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            classifier: ItemClassifier::new(config),
            discovery: VideoDiscovery::new(),
            match_threshold: config.match_threshold,
        }
    }

    pub fn classify(&self, raw_items: &[RawItem]) -> (Vec<NodeRecord>, Vec<AnnotationRecord>) {
        self.classifier.classify(raw_items)
    }

    pub fn match_annotations(
        &self,
        nodes: &[NodeRecord],
        annotations: &[AnnotationRecord],
    ) -> (Vec<NodeContext>, Vec<StandaloneAnnotation>) {
        match_annotations(nodes, annotations, self.match_threshold)
    }

    /// Run both discovery passes and merge their results
    pub fn discover_videos(
        &self,
        annotations: &[AnnotationRecord],
        documents: &[EmbeddedDocument],
    ) -> Vec<VideoReference> {
        let mut videos = self.discovery.discover_in_annotations(annotations);
        videos.extend(self.discovery.discover_in_documents(documents));
        dedupe_videos(videos)
    }

    pub fn reconcile(&self, raw_items: &[RawItem], documents: &[EmbeddedDocument]) -> Reconciliation {
        let (nodes, annotations) = self.classify(raw_items);
        debug!("📍 {} nodes, 📝 {} annotations", nodes.len(), annotations.len());

        let (contexts, standalone) = self.match_annotations(&nodes, &annotations);
        debug!("🔗 {} node contexts, 📌 {} standalone annotations", contexts.len(), standalone.len());

        let videos = self.discover_videos(&annotations, documents);

        Reconciliation {
            nodes,
            contexts,
            standalone,
            videos,
        }
    }
}

/// 0.3 for nodes, 0.3 for contexts, 0.2 for videos, 0.2 for transcripts
pub fn quality_score(nodes: usize, contexts: usize, videos: usize, transcripts: usize) -> f64 {
    let mut score = 0.0;
    if nodes > 0 {
        score += 0.3;
    }
    if contexts > 0 {
        score += 0.3;
    }
    if videos > 0 {
        score += 0.2;
    }
    if transcripts > 0 {
        score += 0.2;
    }
    f64::min(score, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_items() -> Vec<RawItem> {
        serde_json::from_value(json!([
            {"id": "n1", "name": "Webhook", "type": "n8n-nodes-base.webhook", "position": [0, 0],
             "typeVersion": 2, "webhookId": "abc"},
            {"id": "n2", "name": "Send Email", "type": "n8n-nodes-base.emailSend", "position": [400, 0]},
            {"id": "s1", "name": "Trigger", "type": "n8n-nodes-base.stickyNote", "position": [50, -100],
             "parameters": {"content": "Receives the form. Demo: https://youtu.be/AAAAAAAAAAA"}},
            {"id": "s2", "name": "Tutorial", "type": "n8n-nodes-base.stickyNote", "position": [5000, 5000],
             "parameters": {"content": "@[youtube](AAAAAAAAAAA) and @[youtube](BBBBBBBBBBB)"}}
        ]))
        .unwrap()
    }

    #[test]
    fn test_raw_item_keeps_extra_attributes() {
        let items = sample_items();
        assert_eq!(items[0].kind, "n8n-nodes-base.webhook");
        assert_eq!(items[0].attributes.get("webhookId"), Some(&json!("abc")));
        assert_eq!(items[0].position(), Some(Position { x: 0.0, y: 0.0 }));

        let numeric: RawItem = serde_json::from_value(json!({"id": 12, "type": "n8n-nodes-base.set"})).unwrap();
        assert_eq!(numeric.id, "12");
    }

    #[test]
    fn test_reconcile_end_to_end() {
        let engine = ReconciliationEngine::new(&ReconcileConfig::default());
        let result = engine.reconcile(&sample_items(), &[]);

        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].node_id, "n1");
        assert_eq!(result.contexts[0].method, MatchMethod::Proximity);
        assert_eq!(result.standalone.len(), 1);
        assert_eq!(result.standalone[0].id, "s2");

        let ids: Vec<_> = result.videos.iter().filter_map(|v| v.canonical_id.as_deref()).collect();
        assert_eq!(ids, vec!["AAAAAAAAAAA", "BBBBBBBBBBB"]);
    }

    #[test]
    fn test_markdown() {
        let note = |title: &str, content: &str| AnnotationRecord {
            id: "a".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            position: Position::default(),
        };

        assert_eq!(note("Setup", "Add your key").markdown(), "## Setup\n\nAdd your key");
        assert_eq!(note("", "Only content\n").markdown(), "Only content");
        assert_eq!(note("Title only", "").markdown(), "## Title only");
        assert_eq!(note("", "").markdown(), "");
    }

    #[test]
    fn test_quality_score() {
        assert_eq!(quality_score(0, 0, 0, 0), 0.0);
        assert_eq!(quality_score(3, 0, 0, 0), 0.3);
        assert!((quality_score(3, 1, 2, 1) - 1.0).abs() < 1e-9);
        assert!((quality_score(3, 1, 0, 0) - 0.6).abs() < 1e-9);
    }
}
