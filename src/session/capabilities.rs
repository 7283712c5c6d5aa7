//! Server capability snapshot
//!
//! Parsed once from the initialize result and immutable for the session's
//! lifetime. Only the slice of the capability surface this crate acts on is
//! modeled; everything else in the server's answer is ignored.

use serde_json::Value;

/// How the server wants document content synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Server does not want change notifications
    None,
    /// Full document text on every change
    Full,
    /// Incremental ranged changes
    Incremental,
}

impl SyncKind {
    fn from_wire(value: u64) -> Self {
        match value {
            1 => Self::Full,
            2 => Self::Incremental,
            _ => Self::None,
        }
    }
}

/// Text document synchronization support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextDocumentSync {
    pub change: SyncKind,
    pub open_close: bool,
}

/// Pull-diagnostics support level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDiagnostics {
    /// No diagnostic provider advertised
    None,
    /// Per-document pulls only
    TextDocument,
    /// Per-document and workspace-wide pulls
    Workspace,
}

/// The capability snapshot the session acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub text_document_sync: TextDocumentSync,
    pub pull_diagnostics: PullDiagnostics,
}

impl Capabilities {
    /// Parse an initialize result. Lenient: anything absent or malformed
    /// falls back to "unsupported", never an error.
    pub fn from_initialize(result: &Value) -> Self {
        let capabilities = &result["capabilities"];

        // textDocumentSync comes in two wire shapes: a bare sync-kind number
        // or an options object
        let text_document_sync = match &capabilities["textDocumentSync"] {
            Value::Number(kind) => TextDocumentSync {
                change: SyncKind::from_wire(kind.as_u64().unwrap_or(0)),
                open_close: false,
            },
            Value::Object(options) => TextDocumentSync {
                change: SyncKind::from_wire(
                    options.get("change").and_then(Value::as_u64).unwrap_or(0),
                ),
                open_close: options
                    .get("openClose")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            _ => TextDocumentSync {
                change: SyncKind::None,
                open_close: false,
            },
        };

        let pull_diagnostics = match &capabilities["diagnosticProvider"] {
            Value::Object(provider) => {
                if provider
                    .get("workspaceDiagnostics")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    PullDiagnostics::Workspace
                } else {
                    PullDiagnostics::TextDocument
                }
            }
            _ => PullDiagnostics::None,
        };

        Self {
            text_document_sync,
            pull_diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_sync_shape() {
        let result = json!({"capabilities": {"textDocumentSync": 2}});
        let capabilities = Capabilities::from_initialize(&result);

        assert_eq!(capabilities.text_document_sync.change, SyncKind::Incremental);
        assert!(!capabilities.text_document_sync.open_close);
        assert_eq!(capabilities.pull_diagnostics, PullDiagnostics::None);
    }

    #[test]
    fn test_object_sync_shape() {
        let result = json!({
            "capabilities": {
                "textDocumentSync": {"openClose": true, "change": 1}
            }
        });
        let capabilities = Capabilities::from_initialize(&result);

        assert_eq!(capabilities.text_document_sync.change, SyncKind::Full);
        assert!(capabilities.text_document_sync.open_close);
    }

    #[test]
    fn test_diagnostic_provider_levels() {
        let document_only = json!({
            "capabilities": {"diagnosticProvider": {"interFileDependencies": true}}
        });
        assert_eq!(
            Capabilities::from_initialize(&document_only).pull_diagnostics,
            PullDiagnostics::TextDocument
        );

        let workspace = json!({
            "capabilities": {"diagnosticProvider": {"workspaceDiagnostics": true}}
        });
        assert_eq!(
            Capabilities::from_initialize(&workspace).pull_diagnostics,
            PullDiagnostics::Workspace
        );
    }

    #[test]
    fn test_empty_or_malformed_answer() {
        let capabilities = Capabilities::from_initialize(&json!({}));
        assert_eq!(capabilities.text_document_sync.change, SyncKind::None);
        assert_eq!(capabilities.pull_diagnostics, PullDiagnostics::None);

        let weird = json!({"capabilities": {"textDocumentSync": "yes please"}});
        let capabilities = Capabilities::from_initialize(&weird);
        assert_eq!(capabilities.text_document_sync.change, SyncKind::None);
    }

    #[test]
    fn test_unknown_sync_kind_degrades_to_none() {
        let result = json!({"capabilities": {"textDocumentSync": 9}});
        let capabilities = Capabilities::from_initialize(&result);
        assert_eq!(capabilities.text_document_sync.change, SyncKind::None);
    }
}
