//! Mesh Policy Decisions
//!
//! Given a route selected by the index, this crate decides where a request goes and what happens
//! to it on the way:
//!
//! - [`traffic::decide`] draws a destination and an endpoint, skipping endpoints that the
//!   [`OutlierTracker`] has ejected, and draws fault injection and mirroring.
//! - [`retry::execute`] runs upstream attempts under a route's retry and timeout policy.
//! - [`PoolLimiter`] bounds the requests in flight to each destination.
//! - [`authz::evaluate`] admits or denies a request to a workload.
//!
//! None of these block on I/O; the only shared state is the outlier tracker and the pool
//! limiter, both of which lock per destination.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authz;
pub mod outlier;
mod pool;
pub mod retry;
pub mod traffic;

pub use self::{
    authz::{AuthzDecision, Evaluation},
    outlier::{Health, OutlierTracker},
    pool::{Permit, PoolLimiter},
    traffic::{decide, ResolvedRoute, TrafficDecision},
};
