use crate::{
    networking::{DestinationRule, Gateway, ServiceEntry, Sidecar, VirtualService, WorkloadEntry},
    security::AuthorizationPolicy,
    ObjectMeta, Time,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::fmt;

/// A single decoded configuration document.
#[derive(Clone, Debug)]
pub enum Document {
    VirtualService(VirtualService),
    DestinationRule(DestinationRule),
    Gateway(Gateway),
    ServiceEntry(ServiceEntry),
    WorkloadEntry(WorkloadEntry),
    Sidecar(Sidecar),
    AuthorizationPolicy(AuthorizationPolicy),

    /// A well-formed document whose kind never affects a decision (e.g. `EnvoyFilter`,
    /// `Telemetry`, or a non-mesh resource).
    Ignored(IgnoredDocument),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoredDocument {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Identifies a document by kind, namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("document {index}: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document {index}: missing `kind`")]
    MissingKind { index: usize },

    #[error("document {index}: {kind} is missing `metadata.name`")]
    MissingName { index: usize, kind: String },
}

#[derive(Deserialize)]
struct PartialMeta {
    name: Option<String>,
    namespace: Option<String>,
}

/// Decodes a stream of `---`-separated YAML documents. Empty documents are skipped.
pub fn decode_documents(yaml: &str) -> Result<Vec<Document>, DecodeError> {
    let mut docs = Vec::new();
    for (index, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = serde_yaml::Value::deserialize(de)
            .map_err(|source| DecodeError::Yaml { index, source })?;
        if value.is_null() {
            continue;
        }
        docs.push(Document::from_value(index, value)?);
    }
    Ok(docs)
}

// === impl Document ===

impl Document {
    fn from_value(index: usize, value: serde_yaml::Value) -> Result<Self, DecodeError> {
        fn parse<T: DeserializeOwned>(index: usize, value: serde_yaml::Value) -> Result<T, DecodeError> {
            serde_yaml::from_value(value).map_err(|source| DecodeError::Yaml { index, source })
        }

        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .ok_or(DecodeError::MissingKind { index })?
            .to_string();
        let api_version = value
            .get("apiVersion")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let group = api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default();

        let doc = match (group, kind.as_str()) {
            ("networking.istio.io", "VirtualService") => Self::VirtualService(parse(index, value)?),
            ("networking.istio.io", "DestinationRule") => {
                Self::DestinationRule(parse(index, value)?)
            }
            ("networking.istio.io", "Gateway") => Self::Gateway(parse(index, value)?),
            ("networking.istio.io", "ServiceEntry") => Self::ServiceEntry(parse(index, value)?),
            ("networking.istio.io", "WorkloadEntry") => Self::WorkloadEntry(parse(index, value)?),
            ("networking.istio.io", "Sidecar") => Self::Sidecar(parse(index, value)?),
            ("security.istio.io", "AuthorizationPolicy") => {
                Self::AuthorizationPolicy(parse(index, value)?)
            }
            _ => {
                let meta = match value.get("metadata") {
                    Some(meta) => parse::<PartialMeta>(index, meta.clone())?,
                    None => PartialMeta {
                        name: None,
                        namespace: None,
                    },
                };
                tracing::debug!(%api_version, %kind, "ignoring document");
                Self::Ignored(IgnoredDocument {
                    api_version,
                    kind: kind.clone(),
                    name: meta.name.unwrap_or_default(),
                    namespace: meta.namespace,
                })
            }
        };

        if doc.name().is_empty() {
            return Err(DecodeError::MissingName { index, kind });
        }
        Ok(doc)
    }

    fn meta(&self) -> Option<&ObjectMeta> {
        match self {
            Self::VirtualService(r) => Some(&r.metadata),
            Self::DestinationRule(r) => Some(&r.metadata),
            Self::Gateway(r) => Some(&r.metadata),
            Self::ServiceEntry(r) => Some(&r.metadata),
            Self::WorkloadEntry(r) => Some(&r.metadata),
            Self::Sidecar(r) => Some(&r.metadata),
            Self::AuthorizationPolicy(r) => Some(&r.metadata),
            Self::Ignored(_) => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::VirtualService(_) => "VirtualService",
            Self::DestinationRule(_) => "DestinationRule",
            Self::Gateway(_) => "Gateway",
            Self::ServiceEntry(_) => "ServiceEntry",
            Self::WorkloadEntry(_) => "WorkloadEntry",
            Self::Sidecar(_) => "Sidecar",
            Self::AuthorizationPolicy(_) => "AuthorizationPolicy",
            Self::Ignored(doc) => &doc.kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ignored(doc) => &doc.name,
            _ => self
                .meta()
                .and_then(|m| m.name.as_deref())
                .unwrap_or_default(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Ignored(doc) => doc.namespace.as_deref(),
            _ => self.meta().and_then(|m| m.namespace.as_deref()),
        }
    }

    pub fn creation_timestamp(&self) -> Option<&Time> {
        self.meta().and_then(|m| m.creation_timestamp.as_ref())
    }

    /// Identifies the document, placing documents without a namespace in `default_ns`.
    pub fn key(&self, default_ns: &str) -> ResourceKey {
        ResourceKey {
            kind: self.kind().to_string(),
            namespace: self.namespace().unwrap_or(default_ns).to_string(),
            name: self.name().to_string(),
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

// === impl ResourceKey ===

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multiple_documents() {
        let docs = decode_documents(
            r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews]
  http:
  - route:
    - destination:
        host: reviews
        subset: v1
      weight: 80
    - destination:
        host: reviews
        subset: v2
      weight: 20
---
apiVersion: networking.istio.io/v1
kind: DestinationRule
metadata:
  name: reviews
spec:
  host: reviews
  subsets:
  - name: v1
    labels: {version: v1}
---
---
apiVersion: networking.istio.io/v1alpha3
kind: EnvoyFilter
metadata:
  name: lua
  namespace: istio-system
spec:
  configPatches: []
"#,
        )
        .unwrap();

        assert_eq!(docs.len(), 3);
        match &docs[0] {
            Document::VirtualService(vs) => {
                assert_eq!(vs.spec.hosts, vec!["reviews".to_string()]);
                let weights = vs.spec.http[0]
                    .route
                    .iter()
                    .map(|r| r.weight)
                    .collect::<Vec<_>>();
                assert_eq!(weights, vec![Some(80), Some(20)]);
            }
            doc => panic!("unexpected document: {doc:?}"),
        }
        assert_eq!(
            docs[1].key("default"),
            ResourceKey {
                kind: "DestinationRule".to_string(),
                namespace: "default".to_string(),
                name: "reviews".to_string(),
            }
        );
        assert!(docs[2].is_ignored());
        assert_eq!(docs[2].kind(), "EnvoyFilter");
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = decode_documents(
            r#"
apiVersion: networking.istio.io/v1
kind: DestinationRule
metadata:
  name: no-host
spec:
  subsets: []
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Yaml { index: 0, .. }), "{err}");

        let err = decode_documents("apiVersion: v1\nmetadata: {name: x}\n").unwrap_err();
        assert!(matches!(err, DecodeError::MissingKind { index: 0 }));

        let err = decode_documents(
            "apiVersion: networking.istio.io/v1\nkind: Sidecar\nmetadata: {namespace: x}\nspec: {}\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::MissingName { .. }));
    }
}
