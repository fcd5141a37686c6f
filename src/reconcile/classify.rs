//! Splits raw extracted items into functional nodes and annotations
use serde_json::Value;
use tracing::debug;

use super::{AnnotationRecord, NodeRecord, RawItem};
use crate::config::ReconcileConfig;

/// Closed set of item kinds the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Free-text note anchored on the canvas
    Annotation,
    /// Functional node from a recognized namespace
    Node,
    /// Inside a recognized namespace but a UI/system artifact
    Excluded,
    /// Anything else; dropped rather than guessed
    Unrecognized,
}

/// Kind-string classifier built from configuration
#[derive(Debug, Clone)]
pub struct ItemClassifier {
    annotation_kind: String,
    node_namespaces: Vec<String>,
    excluded_kinds: Vec<String>,
}

impl ItemClassifier {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            annotation_kind: config.annotation_kind.clone(),
            node_namespaces: config.node_namespaces.clone(),
            excluded_kinds: config.excluded_kinds.clone(),
        }
    }

    pub fn kind_of(&self, kind: &str) -> ItemKind {
        if kind == self.annotation_kind {
            ItemKind::Annotation
        } else if self.excluded_kinds.iter().any(|excluded| excluded == kind) {
            ItemKind::Excluded
        } else if self.node_namespaces.iter().any(|namespace| kind.starts_with(namespace.as_str())) {
            ItemKind::Node
        } else {
            ItemKind::Unrecognized
        }
    }

    /// Classify raw items, preserving input order within each group
    pub fn classify(&self, raw_items: &[RawItem]) -> (Vec<NodeRecord>, Vec<AnnotationRecord>) {
        let mut nodes = Vec::new();
        let mut annotations = Vec::new();

        for item in raw_items {
            match self.kind_of(&item.kind) {
                ItemKind::Annotation => annotations.push(annotation_from(item)),
                ItemKind::Node => match node_from(item) {
                    Some(node) => nodes.push(node),
                    None => debug!("Skipping incomplete or disabled node {:?} ({})", item.id, item.kind),
                },
                ItemKind::Excluded | ItemKind::Unrecognized => {
                    debug!("Skipping non-workflow item: {}", item.kind);
                }
            }
        }

        (nodes, annotations)
    }
}

fn annotation_from(item: &RawItem) -> AnnotationRecord {
    let content = item
        .parameters
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    AnnotationRecord {
        id: item.id.clone(),
        title: item.name.clone(),
        content,
        // Notes without coordinates sit at the canvas origin
        position: item.position().unwrap_or_default(),
    }
}

fn node_from(item: &RawItem) -> Option<NodeRecord> {
    if item.id.trim().is_empty() || item.disabled {
        return None;
    }
    let position = item.position()?;

    Some(NodeRecord {
        id: item.id.clone(),
        name: item.name.clone(),
        kind: item.kind.clone(),
        position,
        parameters: item.parameters.clone(),
    })
}
