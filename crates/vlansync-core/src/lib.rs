//! vlansync-core - declarative VLAN layout model and reconciliation
//!
//! Holds the transport-independent half of the tool: the [`Config`]
//! model and its validity invariants, the preview [`diff`] engine, the
//! [`SwitchDriver`] capability contract any management surface must
//! satisfy, and the [`reconcile`] engine that converges live device
//! state to a desired config through a driver.

mod config;
mod diff;
mod driver;
mod reconcile;

pub use config::{Config, MembershipState, PortId, PortPlan, VlanId, DEFAULT_VLAN_ID};
pub use diff::{diff, ConfigDiff};
pub use driver::{ApplyOutcome, SwitchDriver, SwitchKind};
pub use reconcile::{prune_vlans, read_device_config, reconcile};
