//! Greedy one-to-one binding of annotations to the nodes they document

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::{AnnotationRecord, NodeRecord, Position};

/// Which signal produced a context's confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Proximity,
    NameSimilarity,
}

/// A node bound to its best annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub node_position: Position,
    pub annotation_title: String,
    pub annotation_content: String,
    pub markdown: String,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// An annotation no node claimed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandaloneAnnotation {
    pub id: String,
    pub title: String,
    pub content: String,
    pub position: Position,
    pub markdown: String,
}

impl From<&AnnotationRecord> for StandaloneAnnotation {
    fn from(annotation: &AnnotationRecord) -> Self {
        Self {
            id: annotation.id.clone(),
            title: annotation.title.clone(),
            content: annotation.content.clone(),
            position: annotation.position,
            markdown: annotation.markdown(),
        }
    }
}

/// Distance bands: <150 → 0.9, <300 → 0.7, <500 → 0.5, <800 → 0.3, <1200 → 0.1
pub fn proximity_confidence(node: &Position, annotation: &Position) -> f64 {
    let distance = node.distance_to(annotation);

    if distance < 150.0 {
        0.9
    } else if distance < 300.0 {
        0.7
    } else if distance < 500.0 {
        0.5
    } else if distance < 800.0 {
        0.3
    } else if distance < 1200.0 {
        0.1
    } else {
        0.0
    }
}

/// Case-insensitive name match against the annotation title, then content, then shared words
pub fn name_confidence(node_name: &str, annotation: &AnnotationRecord) -> f64 {
    let node_name = node_name.trim().to_lowercase();
    if node_name.is_empty() {
        return 0.0;
    }

    let title = annotation.title.to_lowercase();
    let content = annotation.content.to_lowercase();

    if title.contains(&node_name) {
        return 0.8;
    }
    if content.contains(&node_name) {
        return 0.6;
    }

    let node_words: HashSet<&str> = node_name.split_whitespace().collect();
    let annotation_words: HashSet<&str> = title.split_whitespace().chain(content.split_whitespace()).collect();
    let common = node_words.intersection(&annotation_words).count();

    if common > 0 {
        0.4 * common as f64 / node_words.len() as f64
    } else {
        0.0
    }
}

fn score(node: &NodeRecord, annotation: &AnnotationRecord) -> (f64, MatchMethod) {
    let proximity = proximity_confidence(&node.position, &annotation.position);
    let name = name_confidence(&node.name, annotation);

    if name > proximity {
        (name, MatchMethod::NameSimilarity)
    } else {
        (proximity, MatchMethod::Proximity)
    }
}

/// Walk nodes in order, giving each the best still-unclaimed annotation.
///
/// A binding needs confidence strictly above `threshold`; on ties the earlier
/// annotation wins. Annotations nobody claimed come back as standalone.
pub fn match_annotations(
    nodes: &[NodeRecord],
    annotations: &[AnnotationRecord],
    threshold: f64,
) -> (Vec<NodeContext>, Vec<StandaloneAnnotation>) {
    let mut consumed = vec![false; annotations.len()];
    let mut contexts = Vec::new();

    for node in nodes {
        let mut best: Option<(usize, f64, MatchMethod)> = None;

        for (index, annotation) in annotations.iter().enumerate() {
            if consumed[index] {
                continue;
            }
            let (confidence, method) = score(node, annotation);
            if confidence > best.map_or(0.0, |(_, best_confidence, _)| best_confidence) {
                best = Some((index, confidence, method));
            }
        }

        match best {
            Some((index, confidence, method)) if confidence > threshold => {
                consumed[index] = true;
                let annotation = &annotations[index];
                debug!(
                    "🔗 Matched '{}' with annotation '{}' (confidence: {:.2})",
                    node.name, annotation.title, confidence
                );

                contexts.push(NodeContext {
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    node_type: node.kind.clone(),
                    node_position: node.position,
                    annotation_title: annotation.title.clone(),
                    annotation_content: annotation.content.clone(),
                    markdown: annotation.markdown(),
                    confidence,
                    method,
                });
            }
            _ => debug!("No annotation found for node '{}'", node.name),
        }
    }

    let standalone = annotations
        .iter()
        .zip(&consumed)
        .filter(|(_, consumed)| !**consumed)
        .map(|(annotation, _)| StandaloneAnnotation::from(annotation))
        .collect();

    (contexts, standalone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn node(id: &str, name: &str, x: f64, y: f64) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            name: name.to_string(),
            kind: "n8n-nodes-base.set".to_string(),
            position: Position { x, y },
            parameters: Value::Null,
        }
    }

    fn note(id: &str, title: &str, content: &str, x: f64, y: f64) -> AnnotationRecord {
        AnnotationRecord {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            position: Position { x, y },
        }
    }

    #[test]
    fn test_proximity_bands() {
        let origin = Position { x: 0.0, y: 0.0 };
        let at = |x| Position { x, y: 0.0 };

        assert_eq!(proximity_confidence(&origin, &at(149.0)), 0.9);
        assert_eq!(proximity_confidence(&origin, &at(150.0)), 0.7);
        assert_eq!(proximity_confidence(&origin, &at(499.0)), 0.5);
        assert_eq!(proximity_confidence(&origin, &at(799.0)), 0.3);
        assert_eq!(proximity_confidence(&origin, &at(1199.0)), 0.1);
        assert_eq!(proximity_confidence(&origin, &at(1200.0)), 0.0);
        assert_eq!(proximity_confidence(&origin, &Position { x: 300.0, y: 400.0 }), 0.3);
    }

    #[test]
    fn test_name_confidence() {
        let annotation = note("a", "Send Email setup", "Configure the SMTP credentials", 0.0, 0.0);

        assert_eq!(name_confidence("send email", &annotation), 0.8);
        assert_eq!(name_confidence("SMTP", &annotation), 0.6);
        assert!((name_confidence("email parser", &annotation) - 0.2).abs() < 1e-9);
        assert_eq!(name_confidence("webhook", &annotation), 0.0);
        assert_eq!(name_confidence("", &annotation), 0.0);
        assert_eq!(name_confidence("   ", &annotation), 0.0);
    }

    #[test]
    fn test_far_nodes_get_no_context() {
        let nodes = vec![node("n1", "Webhook", 0.0, 0.0)];
        let annotations = vec![note("a1", "Unrelated", "Nothing here", 5000.0, 5000.0)];

        let (contexts, standalone) = match_annotations(&nodes, &annotations, 0.1);
        assert!(contexts.is_empty());
        assert_eq!(standalone.len(), 1);
        assert_eq!(standalone[0].id, "a1");
    }

    #[test]
    fn test_band_at_threshold_is_rejected() {
        let nodes = vec![node("n1", "Webhook", 0.0, 0.0)];
        let annotations = vec![note("a1", "Later", "", 1000.0, 0.0)];

        let (contexts, _) = match_annotations(&nodes, &annotations, 0.1);
        assert!(contexts.is_empty());
    }

    #[test]
    fn test_greedy_one_to_one_in_node_order() {
        let nodes = vec![node("n1", "First", 0.0, 0.0), node("n2", "Second", 10.0, 0.0)];
        let annotations = vec![note("a1", "Close", "", 20.0, 0.0)];

        let (contexts, standalone) = match_annotations(&nodes, &annotations, 0.1);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].node_id, "n1");
        assert!(standalone.is_empty());
    }

    #[test]
    fn test_tie_keeps_first_annotation() {
        let nodes = vec![node("n1", "Webhook", 0.0, 0.0)];
        let annotations = vec![note("a1", "One", "", 100.0, 0.0), note("a2", "Two", "", 0.0, 100.0)];

        let (contexts, standalone) = match_annotations(&nodes, &annotations, 0.1);
        assert_eq!(contexts[0].annotation_title, "One");
        assert_eq!(standalone[0].id, "a2");
    }

    #[test]
    fn test_name_beats_distance() {
        let nodes = vec![node("n1", "Slack", 0.0, 0.0)];
        let annotations = vec![
            note("a1", "Nearby", "", 400.0, 0.0),
            note("a2", "Slack notifications", "Posts to #ops", 4000.0, 0.0),
        ];

        let (contexts, _) = match_annotations(&nodes, &annotations, 0.1);
        assert_eq!(contexts[0].annotation_title, "Slack notifications");
        assert_eq!(contexts[0].confidence, 0.8);
        assert_eq!(contexts[0].method, MatchMethod::NameSimilarity);
        assert_eq!(contexts[0].markdown, "## Slack notifications\n\nPosts to #ops");
    }
}
