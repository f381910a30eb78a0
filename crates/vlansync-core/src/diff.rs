//! Structural comparison of two configs.
//!
//! Used only to render a human preview of uncommitted changes. The
//! reconciliation engine never consumes a diff; it always reads live
//! device state instead.

use std::collections::BTreeMap;

use vlansync_common::{SyncError, SyncResult};

use crate::config::{Config, MembershipState, PortId, VlanId};

/// Per-field delta between two configs over the same port list.
///
/// `None` means unchanged. A diff of a config against itself is
/// all-`None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Port list shared by both configs.
    pub ports: Vec<PortId>,
    /// New PVID per port position, `None` where unchanged.
    pub pvids: Vec<Option<VlanId>>,
    /// New membership per (VLAN, port position), `None` where unchanged.
    /// Covers every VLAN of the target config.
    pub memberships: BTreeMap<VlanId, Vec<Option<MembershipState>>>,
}

impl ConfigDiff {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.pvids.iter().all(Option::is_none)
            && self
                .memberships
                .values()
                .all(|states| states.iter().all(Option::is_none))
    }
}

/// Computes the delta that turns `from` into `to`.
///
/// Both configs must share the same port list. Membership VLANs absent
/// in `from` are compared against an all-`Excluded` vector.
pub fn diff(from: &Config, to: &Config) -> SyncResult<ConfigDiff> {
    if from.ports() != to.ports() {
        return Err(SyncError::IncompatiblePorts);
    }

    let ports = to.ports().to_vec();
    let pvids = ports
        .iter()
        .map(|port| {
            let old = from.pvids()[port];
            let new = to.pvids()[port];
            (old != new).then_some(new)
        })
        .collect();

    let mut memberships = BTreeMap::new();
    for (&vlan, new_states) in to.memberships() {
        let deltas = new_states
            .iter()
            .enumerate()
            .map(|(position, &new)| {
                let old = from
                    .membership(vlan)
                    .map(|states| states[position])
                    .unwrap_or(MembershipState::Excluded);
                (old != new).then_some(new)
            })
            .collect();
        memberships.insert(vlan, deltas);
    }

    Ok(ConfigDiff {
        ports,
        pvids,
        memberships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortPlan;
    use MembershipState::{Excluded as E, Tagged as T, Untagged as U};

    fn sample() -> Config {
        let plans = BTreeMap::from([
            (1, PortPlan::access(1)),
            (2, PortPlan::access(1)),
            (3, PortPlan::access(12)),
        ]);
        Config::from_plans(&plans).unwrap()
    }

    #[test]
    fn test_self_diff_is_all_none() {
        let config = sample();
        let delta = diff(&config, &config).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.pvids, vec![None, None, None]);
        for states in delta.memberships.values() {
            assert_eq!(states, &vec![None, None, None]);
        }
    }

    #[test]
    fn test_changed_pvid_and_membership() {
        let from = sample();
        let plans = BTreeMap::from([
            (1, PortPlan::access(1)),
            (2, PortPlan::access(12)),
            (3, PortPlan::access(12)),
        ]);
        let to = Config::from_plans(&plans).unwrap();

        let delta = diff(&from, &to).unwrap();
        assert_eq!(delta.pvids, vec![None, Some(12), None]);
        // Port 2 moves from VLAN 1 to VLAN 12.
        assert_eq!(delta.memberships[&1], vec![None, Some(E), None]);
        assert_eq!(delta.memberships[&12], vec![None, Some(U), None]);
    }

    #[test]
    fn test_vlan_absent_in_from_compared_against_excluded() {
        let from = sample();
        let plans = BTreeMap::from([
            (1, PortPlan::access(1)),
            (2, PortPlan {
                access: Some(1),
                trunk: std::collections::BTreeSet::from([20]),
            }),
            (3, PortPlan::access(12)),
        ]);
        let to = Config::from_plans(&plans).unwrap();

        let delta = diff(&from, &to).unwrap();
        // VLAN 20 is new; only port 2's tagged membership registers.
        assert_eq!(delta.memberships[&20], vec![None, Some(T), None]);
    }

    #[test]
    fn test_incompatible_ports() {
        let from = sample();
        let plans = BTreeMap::from([(1, PortPlan::access(1)), (2, PortPlan::access(1))]);
        let to = Config::from_plans(&plans).unwrap();
        assert!(matches!(
            diff(&from, &to),
            Err(SyncError::IncompatiblePorts)
        ));
    }
}
