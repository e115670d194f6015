//! SupportArchive Custom Resource Definition
//!
//! A SupportArchive requests a zip bundle of diagnostic data for the
//! namespace it lives in. The spec only selects what to leave out and which
//! time window to cover; the operator owns the status block.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::{CollectorDomain, Error, Timeframe};

/// Content categories a user can leave out of the archive
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedContents {
    /// Skip cluster resource state
    #[serde(default)]
    pub system_state: bool,
    /// Skip censored secrets
    #[serde(default)]
    pub secrets: bool,
    /// Skip container logs
    #[serde(default)]
    pub logs: bool,
    /// Skip Kubernetes events
    #[serde(default)]
    pub events: bool,
    /// Skip volume metrics
    #[serde(default)]
    pub volume_info: bool,
    /// Skip node metrics
    #[serde(default)]
    pub node_info: bool,
}

impl ExcludedContents {
    /// Check if a domain is excluded
    pub fn excludes(&self, domain: CollectorDomain) -> bool {
        match domain {
            CollectorDomain::Logs => self.logs,
            CollectorDomain::VolumeInfo => self.volume_info,
            CollectorDomain::NodeInfo => self.node_info,
            CollectorDomain::Secret => self.secrets,
            CollectorDomain::SystemState => self.system_state,
            CollectorDomain::Events => self.events,
        }
    }

    /// Domains to collect, in collection order
    pub fn target_domains(&self) -> Vec<CollectorDomain> {
        CollectorDomain::ALL
            .into_iter()
            .filter(|d| !self.excludes(*d))
            .collect()
    }
}

/// Explicit collection window
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentTimeframe {
    /// Start of the window (RFC 3339)
    pub start_time: DateTime<Utc>,
    /// End of the window (RFC 3339)
    pub end_time: DateTime<Utc>,
}

/// Phase of a SupportArchive
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ArchivePhase {
    /// Nothing has been collected yet
    #[default]
    Pending,
    /// Domains are being collected
    Creating,
    /// The zip artifact is available at `downloadPath`
    Created,
    /// The spec cannot be processed
    Failed,
}

impl std::fmt::Display for ArchivePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Creating => write!(f, "Creating"),
            Self::Created => write!(f, "Created"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a SupportArchive
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportArchiveStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ArchivePhase,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// URL the finished archive can be downloaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
}

/// Specification for a SupportArchive
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "archivist.dev",
    version = "v1",
    kind = "SupportArchive",
    plural = "supportarchives",
    shortname = "sa",
    namespaced,
    status = "SupportArchiveStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Download","type":"string","jsonPath":".status.downloadPath"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SupportArchiveSpec {
    /// Content categories to leave out
    #[serde(default)]
    pub excluded_contents: ExcludedContents,

    /// Collection window; defaults to the configured span ending at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_timeframe: Option<ContentTimeframe>,
}

impl SupportArchive {
    /// Creation timestamp; objects not yet persisted sort before everything
    pub fn created_at(&self) -> DateTime<Utc> {
        self.creation_timestamp()
            .map(|t| t.0)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Check if the API server has marked this object for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Window the collectors cover
    ///
    /// Anchored on the creation timestamp so every reconcile of the same
    /// archive asks for exactly the same data.
    pub fn timeframe(&self, default_span: Duration) -> Result<Timeframe, Error> {
        match &self.spec.content_timeframe {
            Some(tf) => Timeframe::new(tf.start_time, tf.end_time).map_err(|e| {
                Error::validation_for(
                    format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any()),
                    e.to_string(),
                )
            }),
            None => {
                let end = self.created_at();
                let span = chrono::Duration::from_std(default_span)
                    .map_err(|e| Error::validation(format!("default timeframe: {e}")))?;
                let start = end
                    .checked_sub_signed(span)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                Timeframe::new(start, end)
            }
        }
    }
}
