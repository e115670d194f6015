use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use super::{cancellable, strip_export_metadata, to_value, Collector};
use crate::record::ResourceRecord;
use crate::stream::RecordSender;

/// Replacement for every secret value
pub const CENSORED: &str = "*****";

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Collects the secrets of the namespace with every value censored
///
/// Keys stay visible so a support engineer can see what is configured.
pub struct SecretCollector {
    client: Client,
}

impl SecretCollector {
    /// Create a collector using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for SecretCollector {
    type Record = ResourceRecord;

    fn domain(&self) -> CollectorDomain {
        CollectorDomain::Secret
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        _window: Timeframe,
        out: &RecordSender<ResourceRecord>,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secrets = cancellable(cancel, api.list(&ListParams::default()))
            .await?
            .map_err(|e| Error::collection(self.domain(), e.to_string()))?;

        for secret in secrets {
            let name = secret.name_any();
            let body = to_value(self.domain(), &censor(secret))?;
            out.send(cancel, ResourceRecord { path: name, body }).await?;
        }
        Ok(())
    }
}

/// Replace every value of the secret and drop metadata that could leak one
fn censor(mut secret: Secret) -> Secret {
    if let Some(data) = secret.data.as_mut() {
        for value in data.values_mut() {
            *value = ByteString(CENSORED.as_bytes().to_vec());
        }
    }
    if let Some(string_data) = secret.string_data.as_mut() {
        for value in string_data.values_mut() {
            *value = CENSORED.to_string();
        }
    }
    secret.annotations_mut().remove(LAST_APPLIED_ANNOTATION);
    strip_export_metadata(&mut secret.metadata);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("db-credentials".to_string()),
                namespace: Some("ecosystem".to_string()),
                annotations: Some(BTreeMap::from([
                    (
                        LAST_APPLIED_ANNOTATION.to_string(),
                        r#"{"data":{"password":"aHVudGVyMg=="}}"#.to_string(),
                    ),
                    ("team".to_string(), "storage".to_string()),
                ])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            string_data: Some(BTreeMap::from([(
                "username".to_string(),
                "admin".to_string(),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn values_are_censored_and_keys_kept() {
        let censored = censor(secret());

        let data = censored.data.unwrap();
        assert_eq!(data["password"], ByteString(CENSORED.as_bytes().to_vec()));
        assert_eq!(censored.string_data.unwrap()["username"], CENSORED);
    }

    #[test]
    fn last_applied_configuration_is_dropped() {
        let censored = censor(secret());
        let annotations = censored.metadata.annotations.unwrap();
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
        assert_eq!(annotations["team"], "storage");
    }

    #[test]
    fn exported_document_has_no_plaintext() {
        let body = to_value(CollectorDomain::Secret, &censor(secret())).unwrap();
        let text = serde_yaml::to_string(&body).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("aHVudGVyMg"));
        assert!(!text.contains("admin"));
    }
}
