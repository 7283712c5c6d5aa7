//! Diagnostics translator
//!
//! Converts wire-format diagnostics (push notifications and pull responses)
//! into the caller-facing model, resolving URIs to caller resources along
//! the way. Resources the caller does not recognize are dropped from push
//! events and omitted from workspace reports.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

use crate::rpc::protocol::RpcError;

// ============================================================================
// Caller-Facing Model
// ============================================================================

/// Diagnostic severity levels, ordered from most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    /// Map a wire severity (1..=4). Unknown values yield `None`; translation
    /// treats them as `Error` so nothing is silently downgraded.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Self::Error => 1,
            Self::Warning => 2,
            Self::Information => 3,
            Self::Hint => 4,
        }
    }
}

/// Zero-based position within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open range within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A single translated diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub message: String,
    pub source: Option<String>,
    pub code: Option<String>,
}

/// Diagnostics pushed by the server for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedDiagnostics {
    pub items: Vec<Diagnostic>,
    pub version: Option<i64>,
}

/// Result of a diagnostic pull for one resource
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticReport {
    /// A complete result set, replacing whatever the caller held before
    Full {
        result_id: Option<String>,
        version: Option<i64>,
        items: Vec<Diagnostic>,
    },
    /// The previously reported set is still valid
    Unchanged { result_id: String },
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Deserialize)]
struct WireDiagnostic {
    range: Range,
    #[serde(default)]
    severity: Option<i64>,
    message: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

impl WireDiagnostic {
    fn into_diagnostic(self) -> Diagnostic {
        let severity = self
            .severity
            .and_then(Severity::from_wire)
            .unwrap_or(Severity::Error);
        let code = self.code.and_then(|code| match code {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        });
        Diagnostic {
            range: self.range,
            severity,
            message: self.message,
            source: self.source,
            code,
        }
    }
}

#[derive(Deserialize)]
struct WirePublishParams {
    uri: String,
    #[serde(default)]
    version: Option<i64>,
    diagnostics: Vec<WireDiagnostic>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WireDocumentReport {
    Full {
        #[serde(rename = "resultId", default)]
        result_id: Option<String>,
        items: Vec<WireDiagnostic>,
    },
    Unchanged {
        #[serde(rename = "resultId")]
        result_id: String,
    },
}

#[derive(Deserialize)]
struct WireWorkspaceReport {
    items: Vec<WireWorkspaceItem>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WireWorkspaceItem {
    Full {
        uri: String,
        #[serde(rename = "resultId", default)]
        result_id: Option<String>,
        #[serde(default)]
        version: Option<i64>,
        items: Vec<WireDiagnostic>,
    },
    Unchanged {
        uri: String,
        #[serde(rename = "resultId")]
        result_id: String,
    },
}

// ============================================================================
// Translation
// ============================================================================

/// Translate a `textDocument/publishDiagnostics` payload.
///
/// Returns `Ok(None)` when the URI does not resolve to a caller resource;
/// the event is dropped, not an error.
pub fn translate_publish<R, F>(
    resolve: F,
    params: Value,
) -> Result<Option<(R, PublishedDiagnostics)>, RpcError>
where
    F: Fn(&str) -> Option<R>,
{
    let params: WirePublishParams = serde_json::from_value(params)?;

    let Some(resource) = resolve(&params.uri) else {
        debug!("Dropping published diagnostics for unresolvable URI: {}", params.uri);
        return Ok(None);
    };

    let published = PublishedDiagnostics {
        items: params
            .diagnostics
            .into_iter()
            .map(WireDiagnostic::into_diagnostic)
            .collect(),
        version: params.version,
    };
    Ok(Some((resource, published)))
}

/// Translate a `textDocument/diagnostic` response.
///
/// An `unchanged` report is only legal when the pull supplied a previous
/// result id; otherwise it is a protocol violation.
pub fn translate_document_report(
    value: Value,
    had_previous: bool,
) -> Result<DiagnosticReport, RpcError> {
    let report: WireDocumentReport = serde_json::from_value(value)?;

    match report {
        WireDocumentReport::Full { result_id, items } => Ok(DiagnosticReport::Full {
            result_id,
            version: None,
            items: items.into_iter().map(WireDiagnostic::into_diagnostic).collect(),
        }),
        WireDocumentReport::Unchanged { result_id } => {
            if !had_previous {
                return Err(RpcError::Protocol(format!(
                    "unchanged report ({result_id}) without a previous result id"
                )));
            }
            Ok(DiagnosticReport::Unchanged { result_id })
        }
    }
}

/// Translate a `workspace/diagnostic` response into a per-resource map.
///
/// Entries with unresolvable URIs are omitted. An `unchanged` entry for a
/// resource the pull did not supply a previous result id for is a protocol
/// violation.
pub fn translate_workspace_report<R, F>(
    resolve: F,
    previous: &HashMap<R, String>,
    value: Value,
) -> Result<HashMap<R, DiagnosticReport>, RpcError>
where
    R: Eq + Hash,
    F: Fn(&str) -> Option<R>,
{
    let report: WireWorkspaceReport = serde_json::from_value(value)?;

    let mut translated = HashMap::new();
    for item in report.items {
        match item {
            WireWorkspaceItem::Full {
                uri,
                result_id,
                version,
                items,
            } => {
                let Some(resource) = resolve(&uri) else {
                    debug!("Omitting workspace diagnostics for unresolvable URI: {uri}");
                    continue;
                };
                translated.insert(
                    resource,
                    DiagnosticReport::Full {
                        result_id,
                        version,
                        items: items.into_iter().map(WireDiagnostic::into_diagnostic).collect(),
                    },
                );
            }
            WireWorkspaceItem::Unchanged { uri, result_id } => {
                let Some(resource) = resolve(&uri) else {
                    debug!("Omitting workspace diagnostics for unresolvable URI: {uri}");
                    continue;
                };
                if !previous.contains_key(&resource) {
                    return Err(RpcError::Protocol(format!(
                        "unchanged report for {uri} without a previous result id"
                    )));
                }
                translated.insert(resource, DiagnosticReport::Unchanged { result_id });
            }
        }
    }
    Ok(translated)
}

// ============================================================================
// Pull Parameter Builders
// ============================================================================

/// Build `textDocument/diagnostic` params for one resource.
pub fn document_pull_params(uri: &str, previous_result_id: Option<&str>) -> Value {
    match previous_result_id {
        Some(previous) => json!({
            "textDocument": {"uri": uri},
            "previousResultId": previous,
        }),
        None => json!({
            "textDocument": {"uri": uri},
        }),
    }
}

/// Build `workspace/diagnostic` params from `(uri, result_id)` pairs.
pub fn workspace_pull_params(previous: impl IntoIterator<Item = (String, String)>) -> Value {
    let previous_result_ids: Vec<Value> = previous
        .into_iter()
        .map(|(uri, value)| json!({"uri": uri, "value": value}))
        .collect();
    json!({"previousResultIds": previous_result_ids})
}
