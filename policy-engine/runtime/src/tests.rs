use crate::{Engine, Metrics};
use mesh_policy_core::{http_route::Method, Request};
use mesh_policy_k8s_api::decode_documents;
use mesh_policy_k8s_index::{pair, MeshInfo, Writer};
use std::sync::Arc;

pub(crate) struct TestConfig {
    mesh: MeshInfo,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === impl TestConfig ===

impl TestConfig {
    /// Builds an engine whose store holds `yaml`. Draws are seeded so that tests are repeatable.
    pub(crate) fn engine(&self, yaml: &str) -> Engine {
        let (_writer, engine) = self.store(yaml);
        engine
    }

    pub(crate) fn store(&self, yaml: &str) -> (Writer, Engine) {
        let (mut writer, reader) = pair(Arc::new(self.mesh.clone()));
        let docs = decode_documents(yaml).expect("documents must decode");
        let snapshot = writer.reset(docs).expect("configuration must be valid");
        let engine = Engine::new(reader, Metrics::default()).with_seed(7);
        engine.sync(&snapshot);
        (writer, engine)
    }

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        )
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            mesh: MeshInfo::default(),
            _tracing: Self::init_tracing(),
        }
    }
}

pub(crate) fn mk_request(authority: &str, path: &str, ns: &str) -> Request {
    let mut req = Request::new(Method::GET, authority, path);
    req.source.namespace = Some(ns.to_string());
    req
}
