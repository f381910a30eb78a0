//! The switch driver capability contract.
//!
//! A driver hides one management surface of a device (HTML-forms admin
//! UI, line-oriented CLI session) behind uniform read/mutate calls.
//! Sessions are stateful and strictly single-user: a hidden anti-CSRF
//! token or a CLI prompt position lives inside the driver, so every
//! method takes `&mut self` and callers must never interleave calls.
//! Drivers are handed to the engine already authenticated.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use vlansync_common::SyncResult;

use crate::config::{MembershipState, PortId, VlanId};

/// Which concrete driver variant a device speaks.
///
/// Selected once by a detection step that inspects the device identity
/// string; the reconciliation engine never depends on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// HTML-forms-over-HTTP admin UI (cookie session, hidden form hash).
    HttpForm,
    /// Line-oriented CLI over a text session.
    CliSession,
}

impl SwitchKind {
    /// Short name, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchKind::HttpForm => "http-form",
            SwitchKind::CliSession => "cli-session",
        }
    }
}

/// Result of an idempotent mutation.
///
/// Distinguishes "the device changed" from "the device already had the
/// requested state" at the type level, so no-op paths are not mistaken
/// for errors (or for work done).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The device applied the mutation.
    Applied,
    /// The device already satisfied the request; nothing was changed.
    AlreadySatisfied,
}

/// Uniform read/mutate operations over one switch.
///
/// Every call is one blocking round trip to the device; implementations
/// must not pipeline or reorder. Membership vectors carry one entry per
/// device port in ascending port-index order, matching the port-list
/// ordering of [`crate::Config`].
#[async_trait]
pub trait SwitchDriver: Send {
    /// The variant this driver implements.
    fn kind(&self) -> SwitchKind;

    /// Whether 802.1Q VLAN mode is enabled on the device.
    async fn is_vlan_mode_enabled(&mut self) -> SyncResult<bool>;

    /// Enables 802.1Q VLAN mode.
    async fn enable_vlan_mode(&mut self) -> SyncResult<()>;

    /// VLANs currently defined on the device.
    async fn list_vlan_ids(&mut self) -> SyncResult<BTreeSet<VlanId>>;

    /// Creates a VLAN. A device rejection meaning "already exists" is
    /// reported as [`ApplyOutcome::AlreadySatisfied`]; any other
    /// rejection is an error.
    async fn add_vlan(&mut self, vlan: VlanId) -> SyncResult<ApplyOutcome>;

    /// Deletes a VLAN.
    async fn delete_vlan(&mut self, vlan: VlanId) -> SyncResult<()>;

    /// Current PVID of every port.
    async fn port_pvids(&mut self) -> SyncResult<BTreeMap<PortId, VlanId>>;

    /// Sets one port's PVID. The device refuses a PVID for a VLAN the
    /// port is excluded from; callers fix membership first.
    async fn set_port_pvid(&mut self, port: PortId, vlan: VlanId) -> SyncResult<()>;

    /// Current membership vector of a VLAN.
    async fn membership(&mut self, vlan: VlanId) -> SyncResult<Vec<MembershipState>>;

    /// Replaces a VLAN's membership vector wholesale.
    async fn set_membership(&mut self, vlan: VlanId, states: &[MembershipState])
        -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_kind_names() {
        assert_eq!(SwitchKind::HttpForm.as_str(), "http-form");
        assert_eq!(SwitchKind::CliSession.as_str(), "cli-session");
    }

    #[test]
    fn test_apply_outcome_distinct() {
        assert_ne!(ApplyOutcome::Applied, ApplyOutcome::AlreadySatisfied);
    }
}
