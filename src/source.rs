//! Extraction collaborators: the trait the orchestrator drives and an HTTP implementation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{HarvestError, Result};
use crate::reconcile::{EmbeddedDocument, RawItem};

/// Raw material for one item, before reconciliation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPayload {
    pub raw_items: Vec<RawItem>,
    pub embedded_documents: Vec<EmbeddedDocument>,
    pub connection_count: usize,
    /// Which endpoint produced the items
    pub source: Option<String>,
}

/// Fetches one item's raw payload
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, id: &str, url: &str) -> Result<ExtractionPayload>;
}

/// Workflow JSON API client with a partial-data fallback endpoint
pub struct WorkflowApiSource {
    client: Client,
    config: SourceConfig,
}

impl WorkflowApiSource {
    pub fn new(config: &SourceConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    /// `Ok(None)` on 404, so the caller can try the fallback
    async fn fetch_primary(&self, id: &str) -> Result<Option<ExtractionPayload>> {
        let url = api_url(&self.config.api_url_template, id);
        debug!("Fetching workflow JSON: {}", url);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                let mut payload = payload_from_template(&body)?;
                payload.source = Some("primary_api".to_string());
                Ok(Some(payload))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(HarvestError::Http {
                status: status.as_u16(),
                message: format!("workflow API returned {} for {}", status, id),
            }),
        }
    }

    async fn fetch_fallback(&self, template: &str, id: &str) -> Result<ExtractionPayload> {
        let url = api_url(template, id);
        warn!("Primary API 404 for workflow {}, trying fallback...", id);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                let mut payload = payload_from_template(&synthesize_from_by_id(&body))?;
                payload.source = Some("by_id_api".to_string());
                info!("✅ Fallback succeeded for {}: {} nodes (partial data)", id, payload.raw_items.len());
                Ok(payload)
            }
            StatusCode::NO_CONTENT => Err(HarvestError::NonRetryable(format!(
                "workflow {} is unavailable (deleted or private)",
                id
            ))),
            status => Err(HarvestError::Http {
                status: status.as_u16(),
                message: format!("both APIs failed for {} (primary: 404, fallback: {})", id, status),
            }),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<EmbeddedDocument> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(EmbeddedDocument {
            location: url.to_string(),
            html: response.text().await?,
        })
    }
}

#[async_trait]
impl Extractor for WorkflowApiSource {
    async fn extract(&self, id: &str, url: &str) -> Result<ExtractionPayload> {
        let mut payload = match self.fetch_primary(id).await? {
            Some(payload) => payload,
            None => match &self.config.fallback_url_template {
                Some(template) => self.fetch_fallback(template, id).await?,
                None => {
                    return Err(HarvestError::Http {
                        status: 404,
                        message: format!("workflow {} not found", id),
                    })
                }
            },
        };

        if self.config.fetch_page_html && !url.is_empty() {
            match self.fetch_page(url).await {
                Ok(document) => payload.embedded_documents.push(document),
                Err(e) => warn!("Could not fetch page for {}: {}", id, e),
            }
        }

        debug!(
            "Extracted workflow {}: {} items, {} connections",
            id,
            payload.raw_items.len(),
            payload.connection_count
        );
        Ok(payload)
    }
}

fn api_url(template: &str, id: &str) -> String {
    template.replace("{id}", &urlencoding::encode(id))
}

/// Accepts `{"workflow": {"nodes", "connections"}}` or a bare `{"nodes", "connections"}`
pub fn payload_from_template(body: &Value) -> Result<ExtractionPayload> {
    let workflow = body.get("workflow").filter(|w| w.is_object()).unwrap_or(body);

    let nodes = workflow
        .get("nodes")
        .filter(|nodes| nodes.is_array())
        .ok_or_else(|| HarvestError::NonRetryable("invalid workflow JSON: missing 'nodes'".to_string()))?;
    let raw_items: Vec<RawItem> = serde_json::from_value(nodes.clone())?;

    let connection_count = match workflow.get("connections") {
        Some(Value::Object(connections)) => connections
            .values()
            .map(|outputs| match outputs {
                Value::Object(map) => map.len(),
                Value::Array(list) => list.len(),
                _ => 0,
            })
            .sum(),
        Some(_) => 0,
        None => {
            return Err(HarvestError::NonRetryable(
                "invalid workflow JSON: missing 'connections'".to_string(),
            ))
        }
    };

    Ok(ExtractionPayload {
        raw_items,
        embedded_documents: Vec::new(),
        connection_count,
        source: None,
    })
}

/// The by-id endpoint only lists `{id, url}` per node; build placeholder nodes from the URLs
fn synthesize_from_by_id(body: &Value) -> Value {
    let nodes: Vec<Value> = body
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| nodes.as_slice())
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let node_type = node.get("url").and_then(Value::as_str).and_then(node_type_from_url);
            let name = match &node_type {
                Some(slug) => slug.clone(),
                None => format!("Node {}", i),
            };
            json!({
                "id": format!("synthetic_{}", i),
                "name": name,
                "type": node_type.map(|t| format!("n8n-nodes-base.{}", t)).unwrap_or_else(|| "unknown".to_string()),
                "position": [100 + i * 200, 100],
                "parameters": {},
                "synthetic": true,
            })
        })
        .collect();

    json!({ "workflow": { "nodes": nodes, "connections": {} } })
}

/// `/integrations/http-request/` → `httpRequest`
fn node_type_from_url(url: &str) -> Option<String> {
    let mut parts = url.trim_matches('/').split('/');
    if parts.next()? != "integrations" {
        return None;
    }
    let slug = parts.next().filter(|slug| !slug.is_empty())?;

    let mut words = slug.split('-');
    let mut node_type = words.next()?.to_string();
    for word in words {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            node_type.extend(first.to_uppercase());
            node_type.push_str(chars.as_str());
        }
    }
    Some(node_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_encodes_id() {
        assert_eq!(
            api_url("https://api.n8n.io/api/workflows/templates/{id}", "42"),
            "https://api.n8n.io/api/workflows/templates/42"
        );
        assert_eq!(api_url("https://x/{id}", "a b/c"), "https://x/a%20b%2Fc");
    }

    #[test]
    fn test_payload_from_wrapped_template() {
        let body = json!({
            "id": 1,
            "workflow": {
                "nodes": [
                    {"id": "n1", "name": "Webhook", "type": "n8n-nodes-base.webhook", "position": [0, 0]},
                    {"id": "n2", "name": "Slack", "type": "n8n-nodes-base.slack", "position": [200, 0]}
                ],
                "connections": {
                    "Webhook": {"main": [[{"node": "Slack", "type": "main", "index": 0}]]},
                    "Slack": {"main": [[]]}
                }
            }
        });

        let payload = payload_from_template(&body).unwrap();
        assert_eq!(payload.raw_items.len(), 2);
        assert_eq!(payload.connection_count, 2);
    }

    #[test]
    fn test_payload_from_bare_workflow() {
        let body = json!({"nodes": [], "connections": {}});
        let payload = payload_from_template(&body).unwrap();
        assert!(payload.raw_items.is_empty());
        assert_eq!(payload.connection_count, 0);
    }

    #[test]
    fn test_invalid_structure_is_not_retryable() {
        let error = payload_from_template(&json!({"workflow": {"nodes": []}})).unwrap_err();
        assert!(!error.is_retryable());

        let error = payload_from_template(&json!({"name": "no nodes"})).unwrap_err();
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_by_id_synthesis() {
        let body = json!({
            "id": 7,
            "nodes": [{"id": 1, "url": "/integrations/http-request/"}, {"id": 2, "url": "/other/"}]
        });

        let payload = payload_from_template(&synthesize_from_by_id(&body)).unwrap();
        assert_eq!(payload.raw_items.len(), 2);
        assert_eq!(payload.raw_items[0].kind, "n8n-nodes-base.httpRequest");
        assert_eq!(payload.raw_items[0].id, "synthetic_0");
        assert_eq!(payload.raw_items[1].kind, "unknown");
        assert_eq!(payload.raw_items[1].position(), Some(crate::reconcile::Position { x: 300.0, y: 100.0 }));
    }

    #[test]
    fn test_node_type_from_url() {
        assert_eq!(node_type_from_url("/integrations/if/").as_deref(), Some("if"));
        assert_eq!(node_type_from_url("/integrations/google-calendar/").as_deref(), Some("googleCalendar"));
        assert_eq!(node_type_from_url("/workflows/1"), None);
        assert_eq!(node_type_from_url(""), None);
    }
}
