/// Accessibility snapshots of a markup snippet.
///
/// A [`SnapshotSource`] renders markup and returns the browser's raw accessibility tree.
/// [`normalize`] reduces that tree to the accessible nodes and the handful of properties
/// that matter for deciding which requirements apply.
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use mcp_common::http::backoff_delay;
use mcp_common::mcp_api::{AccessibleNode, ApplicabilitySignals};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use crate::error::AppError;

static CLASS_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sclass(Name)?=["'][^"']*["']"#).expect("valid regex"));

const FORM_ROLES: [&str; 4] = ["textbox", "checkbox", "radio", "combobox"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAxTree {
    #[serde(default)]
    pub nodes: Vec<RawAxNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAxNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub role: Option<RawAxValue>,
    #[serde(default)]
    pub name: Option<RawAxValue>,
    #[serde(default)]
    pub properties: Vec<RawAxProperty>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAxValue {
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub related_nodes: Vec<RawRelatedNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAxProperty {
    pub name: String,
    #[serde(default)]
    pub value: RawAxValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRelatedNode {
    #[serde(default)]
    pub text: Option<String>,
}

impl RawAxValue {
    fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl RawAxNode {
    fn property(&self, name: &str) -> Option<&RawAxValue> {
        self.properties.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Set when the property is present with any value but `false`. Chrome reports
    /// `editable` as a token (`plaintext`, `richtext`) rather than a boolean.
    fn flag(&self, name: &str) -> bool {
        self.property(name)
            .is_some_and(|v| !matches!(v.value, Value::Null | Value::Bool(false)))
    }

    fn labels(&self) -> Vec<String> {
        match self.property("labelledby") {
            Some(value) if value.value_type.as_deref() == Some("nodeList") => value
                .related_nodes
                .iter()
                .filter_map(|n| n.text.clone())
                .filter(|t| !t.trim().is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Accessible nodes of one snippet, in tree order.
#[derive(Debug, Clone, Default)]
pub struct AxSnapshot {
    pub nodes: Vec<AccessibleNode>,
}

impl AxSnapshot {
    pub fn get(&self, node_id: &str) -> Option<&AccessibleNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

/// Drop ignored nodes and keep role, name, state flags and `labelledby` text.
pub fn normalize(tree: &RawAxTree) -> AxSnapshot {
    let nodes = tree
        .nodes
        .iter()
        .filter(|node| !node.ignored)
        .map(|node| AccessibleNode {
            node_id: node.node_id.clone(),
            role: node.role.as_ref().and_then(RawAxValue::as_text),
            name: node
                .name
                .as_ref()
                .and_then(RawAxValue::as_text)
                .unwrap_or_default(),
            focusable: node.flag("focusable"),
            editable: node.flag("editable"),
            readonly: node.flag("readonly"),
            required: node.flag("required"),
            labels: node.labels(),
        })
        .collect();
    AxSnapshot { nodes }
}

/// Strip `class` and `className` attributes, which carry no accessibility meaning.
pub fn clean_code_snippet(code: &str) -> Result<String, AppError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("empty code snippet".to_string()));
    }
    Ok(CLASS_ATTR_RE.replace_all(trimmed, "").into_owned())
}

/// Roles present in the snapshot and the broad requirement areas they touch.
pub fn applicability_signals(snapshot: &AxSnapshot) -> ApplicabilitySignals {
    let mut roles = BTreeSet::new();
    let mut categories = BTreeSet::new();
    for node in &snapshot.nodes {
        if let Some(role) = node.role.as_deref().filter(|r| !r.is_empty()) {
            roles.insert(role.to_string());
            if FORM_ROLES.contains(&role) {
                categories.insert("forms".to_string());
            }
        }
        if node.focusable {
            categories.insert("keyboard".to_string());
        }
        if !node.labels.is_empty() {
            categories.insert("labels".to_string());
        }
    }
    ApplicabilitySignals {
        roles: roles.into_iter().collect(),
        categories: categories.into_iter().collect(),
    }
}

/// Renders markup and reports the raw accessibility tree.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn compute(&self, markup: &str) -> Result<RawAxTree, AppError>;
}

/// Runs an external program that reads markup on stdin and prints the raw tree as
/// JSON on stdout. The child is killed if the attempt times out or is dropped.
pub struct CommandSnapshotSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    retries: u32,
}

impl CommandSnapshotSource {
    pub fn new(command: &[String], timeout: Duration, retries: u32) -> Result<Self, AppError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("snapshot command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            retries,
        })
    }

    async fn attempt(&self, markup: &str) -> Result<RawAxTree, AppError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Upstream(format!("failed to start {}: {e}", self.program)))?;

        // Writing and waiting share one deadline; a child that never drains stdin
        // must not stall the write past it.
        let stdin = child.stdin.take();
        let exchange = async move {
            tokio::join!(send_markup(stdin, markup), child.wait_with_output())
        };
        let (sent, output) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                AppError::Upstream(format!(
                    "accessibility snapshot timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?;
        let output =
            output.map_err(|e| AppError::Upstream(format!("snapshot process failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Upstream(format!(
                "snapshot process exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = sent {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(AppError::Upstream(format!("failed to send markup: {e}")));
            }
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::Upstream(format!("snapshot output is not an AX tree: {e}")))
    }
}

/// Write the markup and close stdin so the child sees end of input.
async fn send_markup(stdin: Option<ChildStdin>, markup: &str) -> std::io::Result<()> {
    if let Some(mut stdin) = stdin {
        stdin.write_all(markup.as_bytes()).await?;
        stdin.shutdown().await?;
    }
    Ok(())
}

#[async_trait]
impl SnapshotSource for CommandSnapshotSource {
    async fn compute(&self, markup: &str) -> Result<RawAxTree, AppError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(markup).await {
                Ok(tree) => {
                    debug!(nodes = tree.nodes.len(), "accessibility snapshot acquired");
                    return Ok(tree);
                }
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    let delay =
                        backoff_delay(Duration::from_millis(250), Duration::from_secs(2), attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying accessibility snapshot"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Stand-in used when no snapshot command is configured.
pub struct UnavailableSnapshotSource;

#[async_trait]
impl SnapshotSource for UnavailableSnapshotSource {
    async fn compute(&self, _markup: &str) -> Result<RawAxTree, AppError> {
        Err(AppError::Upstream(
            "accessibility snapshots are not configured (set WCAG_SNAPSHOT_COMMAND)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(json: Value) -> RawAxTree {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_ignored_nodes_are_dropped() {
        let raw = tree(serde_json::json!({
            "nodes": [
                { "nodeId": "1", "ignored": true, "role": { "type": "role", "value": "none" } },
                {
                    "nodeId": "2", "ignored": false,
                    "role": { "type": "role", "value": "button" },
                    "name": { "type": "computedString", "value": "Submit" }
                }
            ]
        }));
        let snapshot = normalize(&raw);
        assert_eq!(snapshot.nodes.len(), 1);
        let node = snapshot.get("2").unwrap();
        assert_eq!(node.role.as_deref(), Some("button"));
        assert_eq!(node.name, "Submit");
        assert!(!node.focusable && !node.editable && !node.readonly && !node.required);
        assert!(snapshot.get("1").is_none());
    }

    #[test]
    fn test_flags_and_labelledby() {
        let raw = tree(serde_json::json!({
            "nodes": [
                {
                    "nodeId": "7",
                    "role": { "value": "textbox" },
                    "properties": [
                        { "name": "focusable", "value": { "type": "booleanOrUndefined", "value": true } },
                        { "name": "editable", "value": { "type": "token", "value": "plaintext" } },
                        { "name": "required", "value": { "type": "boolean", "value": true } },
                        { "name": "labelledby", "value": { "type": "nodeList", "relatedNodes": [
                            { "idref": "l1", "text": "Email" },
                            { "idref": "l2" },
                            { "idref": "l3", "text": "(required)" }
                        ] } }
                    ]
                },
                {
                    "nodeId": "8",
                    "role": { "value": "checkbox" },
                    "properties": [
                        { "name": "labelledby", "value": { "type": "idrefList", "value": "x" } }
                    ]
                }
            ]
        }));
        let snapshot = normalize(&raw);
        let textbox = snapshot.get("7").unwrap();
        assert!(textbox.focusable);
        assert!(textbox.editable, "token values count as set");
        assert!(!textbox.readonly);
        assert!(textbox.required);
        assert_eq!(textbox.labels, vec!["Email", "(required)"]);
        assert!(snapshot.get("8").unwrap().labels.is_empty());
        assert_eq!(snapshot.get("8").unwrap().name, "");
    }

    #[test]
    fn test_flag_values() {
        let raw = tree(serde_json::json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": { "value": "textbox" },
                    "properties": [
                        { "name": "editable", "value": { "type": "token", "value": "richtext" } },
                        { "name": "focusable", "value": { "type": "booleanOrUndefined", "value": false } },
                        { "name": "readonly", "value": { "type": "boolean" } }
                    ]
                }
            ]
        }));
        let node = normalize(&raw).nodes.remove(0);
        assert!(node.editable);
        assert!(!node.focusable);
        assert!(!node.readonly);
        assert!(!node.required);
    }

    #[test]
    fn test_clean_code_snippet() {
        let cleaned = clean_code_snippet(
            "  <div class=\"card\"><button className='btn primary' type=\"submit\">Go</button></div> ",
        )
        .unwrap();
        assert_eq!(cleaned, "<div><button type=\"submit\">Go</button></div>");

        let err = clean_code_snippet(" \n ").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_applicability_signals() {
        let raw = tree(serde_json::json!({
            "nodes": [
                { "nodeId": "1", "role": { "value": "RootWebArea" } },
                { "nodeId": "2", "role": { "value": "combobox" },
                  "properties": [ { "name": "focusable", "value": { "value": true } } ] },
                { "nodeId": "3", "role": { "value": "link" } }
            ]
        }));
        let signals = applicability_signals(&normalize(&raw));
        assert_eq!(signals.roles, vec!["RootWebArea", "combobox", "link"]);
        assert_eq!(signals.categories, vec!["forms", "keyboard"]);
    }

    #[tokio::test]
    async fn test_unavailable_source_is_upstream_error() {
        let err = UnavailableSnapshotSource.compute("<p>hi</p>").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_reads_stdout() {
        let script = r#"cat > /dev/null; echo '{"nodes":[{"nodeId":"1","role":{"value":"button"}}]}'"#;
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let source = CommandSnapshotSource::new(&command, Duration::from_secs(5), 0).unwrap();
        let tree = source.compute("<button>Go</button>").await.unwrap();
        assert_eq!(tree.nodes.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_timeout_covers_stdin() {
        let script = "sleep 6; echo '{\"nodes\":[]}'";
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let source = CommandSnapshotSource::new(&command, Duration::from_secs(1), 0).unwrap();
        let markup = "<p>x</p>".repeat(40_000);

        let started = std::time::Instant::now();
        let err = source.compute(&markup).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_failure_is_upstream() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let source = CommandSnapshotSource::new(&command, Duration::from_secs(5), 0).unwrap();
        let err = source.compute("<p/>").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
