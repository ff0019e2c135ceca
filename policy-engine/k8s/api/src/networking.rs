pub mod destination_rule;
pub mod gateway;
pub mod service_entry;
pub mod sidecar;
pub mod virtual_service;
pub mod workload_entry;

pub use self::{
    destination_rule::{DestinationRule, DestinationRuleSpec},
    gateway::{Gateway, GatewaySpec},
    service_entry::{ServiceEntry, ServiceEntrySpec},
    sidecar::{Sidecar, SidecarSpec},
    virtual_service::{VirtualService, VirtualServiceSpec},
    workload_entry::{WorkloadEntry, WorkloadEntrySpec},
};
