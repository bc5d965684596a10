use std::sync::Arc;

use thiserror::Error;

use crate::core::ArcStr;

/// Failure of a single graph node.
///
/// Clonable so that the same failure can be stored on the node, handed to
/// its error hook and pushed to the session's [`ErrorSink`](crate::ErrorSink).
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("Node '{node}': {cause}")]
    Resolve { node: ArcStr, cause: Arc<anyhow::Error> },

    #[error("Node '{node}' is unavailable, dependency '{dependency}' failed")]
    Upstream { node: ArcStr, dependency: ArcStr },
}

impl NodeError {
    pub(crate) fn resolve(node: ArcStr, cause: impl Into<anyhow::Error>) -> Self {
        Self::Resolve {
            node,
            cause: Arc::new(cause.into()),
        }
    }

    /// Name of the node this error belongs to.
    pub fn node(&self) -> &str {
        match self {
            Self::Resolve { node, .. } | Self::Upstream { node, .. } => node,
        }
    }

    /// Whether the node failed on its own rather than because of a dependency.
    pub fn is_origin(&self) -> bool {
        matches!(self, Self::Resolve { .. })
    }
}

/// Errors reported by a [`DataService`](crate::DataService).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Transient failure in {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// A batched call failed for some of its items; the batch as a whole is
    /// treated as failed.
    #[error("Batch {operation} failed for {failed} of {total} items")]
    PartialData {
        operation: &'static str,
        failed: usize,
        total: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Couldn't parse settings.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Threshold '{name}' must be finite and non-negative, got {value}")]
    Threshold { name: &'static str, value: f64 },
}
