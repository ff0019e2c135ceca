#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod document;
pub mod duration;
pub mod labels;
pub mod networking;
pub mod security;

pub use self::{
    document::{decode_documents, DecodeError, Document, IgnoredDocument, ResourceKey},
    duration::MeshDuration,
    labels::Labels,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
pub use kube::ResourceExt;
