//! Registry login material composed from a fetched access token.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stratum_domain::{ObjectMeta, ObjectSpec, StepId};

use crate::deferred::{Deferred, Resolution};
use crate::error::ProvisionError;

/// Secret type consumed by the platform as image pull credentials.
pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Field of the secret holding the serialized [`DockerConfig`].
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub auth: String,
    pub username: String,
    pub password: String,
    pub email: String,
}

/// `{"auths": {<registry-host>: {auth, username, password, email}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub auths: BTreeMap<String, RegistryAuth>,
}

/// base64 of `<account>:<token>`.
#[must_use]
pub fn registry_auth(account: &str, token: &str) -> String {
    STANDARD.encode(format!("{account}:{token}"))
}

#[must_use]
pub fn docker_config(host: &str, account: &str, token: &str, email: &str) -> DockerConfig {
    let entry = RegistryAuth {
        auth: registry_auth(account, token),
        username: account.to_string(),
        password: token.to_string(),
        email: email.to_string(),
    };
    DockerConfig {
        auths: BTreeMap::from([(host.to_string(), entry)]),
    }
}

/// Serialized login document for the secret step `owner`. The token only
/// enters the document inside the transformation, after it resolves.
#[must_use]
pub fn registry_login_document(
    owner: &StepId,
    host: &str,
    account: &str,
    email: &str,
    token: &Deferred<String>,
) -> Deferred<String> {
    let owner = owner.clone();
    let (host, account, email) = (host.to_string(), account.to_string(), email.to_string());
    token.try_map(move |token| {
        let document = docker_config(&host, &account, &token, &email);
        encode_login_document(&owner, &document)
    })
}

fn encode_login_document(owner: &StepId, document: &DockerConfig) -> Resolution<String> {
    serde_json::to_string(document).map_err(|error| {
        ProvisionError::resolution(owner, format!("registry login cannot be encoded: {error}"))
    })
}

/// Secret object carrying a login document under [`DOCKER_CONFIG_KEY`].
#[must_use]
pub fn registry_secret(metadata: ObjectMeta, document: &Deferred<String>) -> Deferred<ObjectSpec> {
    document.map(move |document| {
        ObjectSpec::new(
            metadata,
            json!({
                "type": DOCKER_CONFIG_SECRET_TYPE,
                "stringData": { DOCKER_CONFIG_KEY: document },
            }),
        )
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use stratum_domain::{ObjectKind, ObjectMeta, StepId, StepKind, StepName};

    use super::{
        DOCKER_CONFIG_KEY, DockerConfig, registry_auth, registry_login_document, registry_secret,
    };
    use crate::deferred::Deferred;
    use crate::error::ProvisionError;

    fn owner() -> StepId {
        StepId::new(
            StepKind::Object(ObjectKind::Secret),
            StepName::try_from("gh-registry-secrets").expect("name"),
        )
    }

    #[test]
    fn auth_is_base64_of_account_and_token() {
        assert_eq!(registry_auth("user", "tok"), STANDARD.encode("user:tok"));
        assert_eq!(registry_auth("user", "tok"), "dXNlcjp0b2s=");
    }

    #[tokio::test]
    async fn login_document_keeps_every_field_through_reparse() {
        let token = Deferred::ready("tok".to_string());
        let document =
            registry_login_document(&owner(), "ghcr.io", "user", "ops@example.com", &token)
                .resolve()
                .await
                .expect("document");

        let parsed: DockerConfig = serde_json::from_str(&document).expect("parse");
        let entry = parsed.auths.get("ghcr.io").expect("registry entry");
        assert_eq!(entry.auth, "dXNlcjp0b2s=");
        assert_eq!(entry.username, "user");
        assert_eq!(entry.password, "tok");
        assert_eq!(entry.email, "ops@example.com");

        let reserialized = serde_json::to_string(&parsed).expect("serialize");
        let original: serde_json::Value = serde_json::from_str(&document).expect("value");
        let again: serde_json::Value = serde_json::from_str(&reserialized).expect("value");
        assert_eq!(original, again);
    }

    #[tokio::test]
    async fn secret_object_embeds_document_under_dockerconfigjson() {
        let step = StepId::new(StepKind::Cluster, StepName::try_from("token-source").expect("name"));
        let (resolver, token) = Deferred::<String>::channel(step);
        let document =
            registry_login_document(&owner(), "ghcr.io", "user", "ops@example.com", &token);
        let secret = registry_secret(
            ObjectMeta::named("gh-registry-secret").in_namespace("alura"),
            &document,
        );
        assert_eq!(secret.sources().len(), 1);

        resolver.resolve("tok".to_string());
        let spec = secret.resolve().await.expect("spec");
        assert_eq!(spec.body["type"], "kubernetes.io/dockerconfigjson");
        let embedded = spec.body["stringData"][DOCKER_CONFIG_KEY]
            .as_str()
            .expect("document string");
        assert!(embedded.contains("\"auths\""));
    }

    #[tokio::test]
    async fn failed_token_fails_the_document_instead_of_leaving_it_empty() {
        let token = Deferred::<String>::failed(ProvisionError::configuration(
            "gh_pat",
            "missing required secret \"gh_pat\"",
        ));
        let document =
            registry_login_document(&owner(), "ghcr.io", "user", "ops@example.com", &token);
        let secret = registry_secret(ObjectMeta::named("gh-registry-secret"), &document);

        let error = secret.resolve().await.expect_err("no document without a token");
        assert!(matches!(error, ProvisionError::Configuration { ref key, .. } if key == "gh_pat"));
    }

    #[test]
    fn encoded_document_is_the_docker_config_json() {
        let config = super::docker_config("ghcr.io", "user", "tok", "ops@example.com");
        let encoded = super::encode_login_document(&owner(), &config).expect("encode");
        let decoded: DockerConfig = serde_json::from_str(&encoded).expect("parse");
        assert_eq!(decoded, config);
    }
}
