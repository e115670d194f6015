//! Stable identity of one support archive

use std::fmt;

use kube::{Resource, ResourceExt};

use crate::Error;

/// Namespace and name of a SupportArchive
///
/// Every work directory, marker and artifact path is derived from this pair,
/// so two descriptors never contend for the same files.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveId {
    /// Namespace of the descriptor
    pub namespace: String,
    /// Name of the descriptor
    pub name: String,
}

impl ArchiveId {
    /// Create an id from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the id of a namespaced Kubernetes object
    pub fn of<K: Resource>(obj: &K) -> Result<Self, Error> {
        let name = obj.name_any();
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "resource has no namespace"))?;
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
