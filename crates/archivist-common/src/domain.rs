//! Collector domains and the time window they are collected for

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One category of diagnostic data in a support archive
///
/// The declaration order is the collection order: the create orchestrator
/// always runs the first pending domain of [`CollectorDomain::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollectorDomain {
    /// Container logs
    Logs,
    /// Persistent volume usage metrics
    VolumeInfo,
    /// Node resource metrics
    NodeInfo,
    /// Censored secrets
    Secret,
    /// Cluster resource state
    SystemState,
    /// Kubernetes events
    Events,
}

impl CollectorDomain {
    /// Every domain, in collection order
    pub const ALL: [CollectorDomain; 6] = [
        CollectorDomain::Logs,
        CollectorDomain::VolumeInfo,
        CollectorDomain::NodeInfo,
        CollectorDomain::Secret,
        CollectorDomain::SystemState,
        CollectorDomain::Events,
    ];

    /// Directory name in the work tree and prefix of zip entries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logs => "Logs",
            Self::VolumeInfo => "VolumeInfo",
            Self::NodeInfo => "NodeInfo",
            Self::Secret => "Secrets",
            Self::SystemState => "SystemState",
            Self::Events => "Events",
        }
    }
}

impl std::fmt::Display for CollectorDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectorDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown collector domain: {s}")))
    }
}

/// Closed time window a support archive collects data for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeframe {
    /// Inclusive start of the window
    pub start: DateTime<Utc>,
    /// Inclusive end of the window
    pub end: DateTime<Utc>,
}

impl Timeframe {
    /// Create a window, rejecting one that ends before it starts
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, Error> {
        if start > end {
            return Err(Error::validation(format!(
                "timeframe start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a point in time lies inside the window
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}
