use crate::{MeshInfo, Snapshot};
use anyhow::Result;
use mesh_policy_k8s_api::{Document, ResourceKey};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Builds and publishes snapshots. Owned by the single task that processes configuration
/// changes.
#[derive(Debug)]
pub struct Writer {
    mesh: Arc<MeshInfo>,
    documents: BTreeMap<ResourceKey, Document>,
    generation: u64,
    tx: watch::Sender<Arc<Snapshot>>,
}

/// Observes the most recently published snapshot.
#[derive(Clone, Debug)]
pub struct Reader(watch::Receiver<Arc<Snapshot>>);

/// Creates a store whose readers initially observe an empty snapshot.
pub fn pair(mesh: Arc<MeshInfo>) -> (Writer, Reader) {
    let (tx, rx) = watch::channel(Arc::new(Snapshot::empty(mesh.clone())));
    let writer = Writer {
        mesh,
        documents: BTreeMap::new(),
        generation: 0,
        tx,
    };
    (writer, Reader(rx))
}

// === impl Writer ===

impl Writer {
    /// Adds or replaces documents.
    ///
    /// The resulting configuration is published only if it is valid as a whole; otherwise the
    /// previous snapshot remains active.
    #[instrument(skip_all, fields(documents = docs.len()))]
    pub fn apply(&mut self, docs: Vec<Document>) -> Result<Arc<Snapshot>> {
        let mut documents = self.documents.clone();
        for doc in docs {
            documents.insert(doc.key(&self.mesh.default_namespace), doc);
        }
        self.publish(documents)
    }

    /// Removes documents. Unknown keys are ignored.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub fn delete(&mut self, keys: &[ResourceKey]) -> Result<Arc<Snapshot>> {
        let mut documents = self.documents.clone();
        for key in keys {
            documents.remove(key);
        }
        self.publish(documents)
    }

    /// Replaces the entire configuration.
    ///
    /// Unlike [`Writer::apply`], duplicate documents are rejected rather than replaced.
    #[instrument(skip_all, fields(documents = docs.len()))]
    pub fn reset(&mut self, docs: Vec<Document>) -> Result<Arc<Snapshot>> {
        let generation = self.generation + 1;
        let snapshot = Arc::new(Snapshot::build(&docs, self.mesh.clone(), generation)?);
        self.documents = docs
            .into_iter()
            .map(|doc| (doc.key(&self.mesh.default_namespace), doc))
            .collect();
        Ok(self.commit(snapshot))
    }

    pub fn reader(&self) -> Reader {
        Reader(self.tx.subscribe())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn publish(&mut self, documents: BTreeMap<ResourceKey, Document>) -> Result<Arc<Snapshot>> {
        let generation = self.generation + 1;
        let snapshot = match Snapshot::build(documents.values(), self.mesh.clone(), generation) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(error) => {
                warn!(%error, "rejected configuration; keeping the active snapshot");
                return Err(error);
            }
        };
        self.documents = documents;
        Ok(self.commit(snapshot))
    }

    fn commit(&mut self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        self.generation = snapshot.generation();
        let counts = snapshot.counts();
        info!(
            generation = self.generation,
            resources = counts.total(),
            ignored = counts.ignored,
            "published snapshot"
        );
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}

// === impl Reader ===

impl Reader {
    /// Returns the current snapshot. The snapshot is never modified, so it may be held for the
    /// duration of a request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.0.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.0.borrow().generation()
    }

    /// Returns a watch that is notified each time a snapshot is published.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_policy_k8s_api::decode_documents;

    const VALID: &str = r#"
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: httpbin
  namespace: egress
spec:
  hosts: [httpbin.org]
  ports:
  - {number: 80, name: http, protocol: HTTP}
  resolution: DNS
"#;

    const INVALID: &str = r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews]
  http:
  - route:
    - destination: {host: reviews, subset: v1}
      weight: 60
    - destination: {host: reviews, subset: v2}
      weight: 30
"#;

    #[tokio::test]
    async fn invalid_configuration_keeps_prior_snapshot() {
        let (mut writer, reader) = pair(Arc::new(MeshInfo::default()));
        assert_eq!(reader.generation(), 0);

        let mut watch = reader.watch();
        writer
            .reset(decode_documents(VALID).unwrap())
            .expect("configuration must be valid");
        assert!(watch.has_changed().unwrap());
        let _ = watch.borrow_and_update();
        assert_eq!(reader.generation(), 1);

        let err = writer
            .apply(decode_documents(INVALID).unwrap())
            .expect_err("weights must sum to 100");
        assert!(format!("{err:#}").contains("VirtualService bookinfo/reviews"));
        assert!(!watch.has_changed().unwrap());
        assert_eq!(reader.generation(), 1);
        assert_eq!(writer.len(), 1);
        assert!(reader.snapshot().is_registered("httpbin.org", "default"));
    }

    #[tokio::test]
    async fn deletes_documents() {
        let (mut writer, reader) = pair(Arc::new(MeshInfo::default()));
        writer.apply(decode_documents(VALID).unwrap()).unwrap();
        assert!(reader.snapshot().is_registered("httpbin.org", "default"));

        let key = ResourceKey {
            kind: "ServiceEntry".to_string(),
            namespace: "egress".to_string(),
            name: "httpbin".to_string(),
        };
        let snapshot = writer.delete(&[key]).unwrap();
        assert_eq!(snapshot.generation(), 2);
        assert!(writer.is_empty());
        assert!(!reader.snapshot().is_registered("httpbin.org", "default"));
    }
}
