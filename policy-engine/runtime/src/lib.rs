#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_policy_core as core;
pub use mesh_policy_decide as decide;
pub use mesh_policy_k8s_api as k8s;
pub use mesh_policy_k8s_index as index;

pub mod admin;
pub mod api;
mod args;
mod engine;
pub mod loader;
pub mod log;
mod metrics;
pub mod reload;
pub mod simulate;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    engine::{CallError, Decision, Engine, Routed, Target},
    metrics::Metrics,
};
