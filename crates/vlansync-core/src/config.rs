//! Desired-state configuration model and validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use vlansync_common::{SyncError, SyncResult};

/// 1-based port index. Ports have no independent lifetime; an index is
/// only meaningful as a position within a [`Config`]'s port list.
pub type PortId = u16;

/// 802.1Q VLAN identifier. VLAN 1 is implicitly always present on the
/// device.
pub type VlanId = u16;

/// The default VLAN every device ships with.
pub const DEFAULT_VLAN_ID: VlanId = 1;

/// Membership of a port in a VLAN. Exactly one state applies per
/// (VLAN, port) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    /// Port carries this VLAN's traffic with an 802.1Q tag (trunk).
    Tagged,
    /// Port carries this VLAN's traffic untagged (access).
    Untagged,
    /// Port is not a member of this VLAN.
    Excluded,
}

impl MembershipState {
    /// Lowercase name, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipState::Tagged => "tagged",
            MembershipState::Untagged => "untagged",
            MembershipState::Excluded => "excluded",
        }
    }

    /// Single-character symbol for table output.
    pub fn symbol(&self) -> char {
        match self {
            MembershipState::Tagged => 'T',
            MembershipState::Untagged => 'U',
            MembershipState::Excluded => '.',
        }
    }
}

/// Desired role of a single port in the declarative input model.
///
/// A port is `access <vlan>` and/or `trunk <vlans>`; a trunk port with
/// no explicit access VLAN implicitly carries PVID 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPlan {
    /// Access VLAN (becomes the port's PVID, untagged member).
    pub access: Option<VlanId>,
    /// VLANs the port trunks (tagged member of each).
    pub trunk: BTreeSet<VlanId>,
}

impl PortPlan {
    /// An access port on `vlan`.
    pub fn access(vlan: VlanId) -> Self {
        Self {
            access: Some(vlan),
            trunk: BTreeSet::new(),
        }
    }

    /// A trunk port carrying `vlans` (PVID defaults to 1).
    pub fn trunk(vlans: impl IntoIterator<Item = VlanId>) -> Self {
        Self {
            access: None,
            trunk: vlans.into_iter().collect(),
        }
    }
}

/// Immutable desired VLAN layout for one device.
///
/// Composed of an ordered list of distinct ports, one PVID per port,
/// and one membership vector per VLAN (one entry per port, in port-list
/// order). Constructed only through [`Config::build`] or
/// [`Config::from_plans`], which enforce the structural invariants, so
/// any `Config` in circulation is valid. The port list is normally the
/// device's full port list in ascending index order; membership vectors
/// read from and written to a driver use the same ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    ports: Vec<PortId>,
    pvids: BTreeMap<PortId, VlanId>,
    memberships: BTreeMap<VlanId, Vec<MembershipState>>,
}

impl Config {
    /// Builds and validates a config.
    ///
    /// Requirements:
    /// - `ports` is non-empty and free of duplicates
    /// - `pvids` holds exactly one entry per port
    /// - every membership vector has one entry per port
    /// - for every port, the membership of its PVID VLAN at the port's
    ///   position is `Tagged` or `Untagged`, never `Excluded` (the
    ///   device refuses a PVID pointing at a non-member VLAN)
    pub fn build(
        ports: Vec<PortId>,
        pvids: BTreeMap<PortId, VlanId>,
        memberships: BTreeMap<VlanId, Vec<MembershipState>>,
    ) -> SyncResult<Self> {
        if ports.is_empty() {
            return Err(SyncError::malformed("no ports defined"));
        }
        let distinct: BTreeSet<PortId> = ports.iter().copied().collect();
        if distinct.len() != ports.len() {
            return Err(SyncError::malformed("duplicate port indices"));
        }
        if pvids.len() != ports.len() || !ports.iter().all(|p| pvids.contains_key(p)) {
            return Err(SyncError::malformed(
                "pvids must hold exactly one entry per port",
            ));
        }
        for (vlan, states) in &memberships {
            if states.len() != ports.len() {
                return Err(SyncError::malformed(format!(
                    "membership vector for VLAN {} has {} entries, expected {}",
                    vlan,
                    states.len(),
                    ports.len()
                )));
            }
        }
        for (position, &port) in ports.iter().enumerate() {
            let pvid = pvids[&port];
            let state = memberships
                .get(&pvid)
                .map(|states| states[position])
                .unwrap_or(MembershipState::Excluded);
            if state == MembershipState::Excluded {
                return Err(SyncError::Validation { port, vlan: pvid });
            }
        }
        Ok(Self {
            ports,
            pvids,
            memberships,
        })
    }

    /// Builds a config from per-port plans (the `access`/`trunk` input
    /// model).
    ///
    /// Ports are taken in ascending index order. A trunk port with no
    /// explicit access VLAN gets PVID 1 and an untagged membership on
    /// VLAN 1; trunked VLANs become tagged memberships and take
    /// precedence when a VLAN is both the access VLAN and trunked.
    pub fn from_plans(plans: &BTreeMap<PortId, PortPlan>) -> SyncResult<Self> {
        if plans.is_empty() {
            return Err(SyncError::malformed(
                "ports must be defined as either access or trunk ports",
            ));
        }

        let ports: Vec<PortId> = plans.keys().copied().collect();
        let mut pvids = BTreeMap::new();
        let mut vlan_ids = BTreeSet::new();
        for (&port, plan) in plans {
            let pvid = plan.access.unwrap_or(DEFAULT_VLAN_ID);
            pvids.insert(port, pvid);
            vlan_ids.insert(pvid);
            vlan_ids.extend(plan.trunk.iter().copied());
        }

        let mut memberships: BTreeMap<VlanId, Vec<MembershipState>> = vlan_ids
            .into_iter()
            .map(|vlan| (vlan, vec![MembershipState::Excluded; ports.len()]))
            .collect();
        for (position, &port) in ports.iter().enumerate() {
            let plan = &plans[&port];
            let pvid = plan.access.unwrap_or(DEFAULT_VLAN_ID);
            if let Some(states) = memberships.get_mut(&pvid) {
                states[position] = MembershipState::Untagged;
            }
            for vlan in &plan.trunk {
                if let Some(states) = memberships.get_mut(vlan) {
                    states[position] = MembershipState::Tagged;
                }
            }
        }

        Self::build(ports, pvids, memberships)
    }

    /// Ordered port list.
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    /// Per-port PVID map.
    pub fn pvids(&self) -> &BTreeMap<PortId, VlanId> {
        &self.pvids
    }

    /// Per-VLAN membership vectors, in port-list order.
    pub fn memberships(&self) -> &BTreeMap<VlanId, Vec<MembershipState>> {
        &self.memberships
    }

    /// Membership vector of a single VLAN, if this config defines it.
    pub fn membership(&self, vlan: VlanId) -> Option<&[MembershipState]> {
        self.memberships.get(&vlan).map(Vec::as_slice)
    }

    /// Position of `port` within the port list.
    pub fn port_position(&self, port: PortId) -> Option<usize> {
        self.ports.iter().position(|&p| p == port)
    }

    /// Every VLAN id this config references: all PVIDs plus every VLAN
    /// with a membership vector. These must all exist on the device.
    pub fn required_vlans(&self) -> BTreeSet<VlanId> {
        let mut vlans: BTreeSet<VlanId> = self.pvids.values().copied().collect();
        vlans.extend(self.memberships.keys().copied());
        vlans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MembershipState::{Excluded as E, Tagged as T, Untagged as U};

    fn pvid_map(entries: &[(PortId, VlanId)]) -> BTreeMap<PortId, VlanId> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_build_valid() {
        let config = Config::build(
            vec![1, 2, 3],
            pvid_map(&[(1, 1), (2, 1), (3, 12)]),
            BTreeMap::from([(1, vec![U, U, E]), (12, vec![E, E, U])]),
        )
        .unwrap();
        assert_eq!(config.ports(), &[1, 2, 3]);
        assert_eq!(config.required_vlans(), BTreeSet::from([1, 12]));
        assert_eq!(config.membership(12), Some([E, E, U].as_slice()));
    }

    #[test]
    fn test_build_rejects_excluded_pvid_membership() {
        let err = Config::build(
            vec![1, 2],
            pvid_map(&[(1, 1), (2, 10)]),
            BTreeMap::from([(1, vec![U, U]), (10, vec![E, E])]),
        )
        .unwrap_err();
        match err {
            SyncError::Validation { port, vlan } => {
                assert_eq!(port, 2);
                assert_eq!(vlan, 10);
            }
            other => panic!("expected Validation error, got {other}"),
        }
    }

    #[test]
    fn test_build_rejects_pvid_for_undefined_vlan() {
        let err = Config::build(
            vec![1],
            pvid_map(&[(1, 99)]),
            BTreeMap::from([(1, vec![U])]),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Validation { port: 1, vlan: 99 }));
    }

    #[test]
    fn test_build_rejects_duplicate_ports() {
        let err = Config::build(
            vec![1, 1],
            pvid_map(&[(1, 1)]),
            BTreeMap::from([(1, vec![U, U])]),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Malformed { .. }));
    }

    #[test]
    fn test_build_rejects_membership_length_mismatch() {
        let err = Config::build(
            vec![1, 2],
            pvid_map(&[(1, 1), (2, 1)]),
            BTreeMap::from([(1, vec![U])]),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Malformed { .. }));
    }

    #[test]
    fn test_build_rejects_empty_ports() {
        let err = Config::build(vec![], BTreeMap::new(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SyncError::Malformed { .. }));
    }

    #[test]
    fn test_from_plans_eight_port_layout() {
        // Access ports on 1/12/13/14, one uplink trunking everything,
        // one mixed access+trunk port.
        let mut plans = BTreeMap::new();
        plans.insert(1, PortPlan::access(1));
        plans.insert(
            2,
            PortPlan {
                access: Some(1),
                trunk: BTreeSet::from([12, 14]),
            },
        );
        plans.insert(3, PortPlan::access(1));
        plans.insert(4, PortPlan::access(1));
        plans.insert(5, PortPlan::access(12));
        plans.insert(6, PortPlan::access(13));
        plans.insert(7, PortPlan::access(14));
        plans.insert(8, PortPlan::trunk([1, 12, 13, 14]));

        let config = Config::from_plans(&plans).unwrap();
        assert_eq!(config.ports(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        let pvids: Vec<VlanId> = config.ports().iter().map(|p| config.pvids()[p]).collect();
        assert_eq!(pvids, vec![1, 1, 1, 1, 12, 13, 14, 1]);

        assert_eq!(config.membership(1), Some([U, U, U, U, E, E, E, T].as_slice()));
        assert_eq!(config.membership(12), Some([E, T, E, E, U, E, E, T].as_slice()));
        assert_eq!(config.membership(13), Some([E, E, E, E, E, U, E, T].as_slice()));
        assert_eq!(config.membership(14), Some([E, T, E, E, E, E, U, T].as_slice()));
    }

    #[test]
    fn test_from_plans_trunk_defaults_to_pvid_1() {
        let plans = BTreeMap::from([(1, PortPlan::access(10)), (2, PortPlan::trunk([10]))]);
        let config = Config::from_plans(&plans).unwrap();
        assert_eq!(config.pvids()[&2], 1);
        // The defaulted PVID keeps the port an untagged member of VLAN 1.
        assert_eq!(config.membership(1), Some([E, U].as_slice()));
    }

    #[test]
    fn test_from_plans_trunked_access_vlan_stays_tagged() {
        let plans = BTreeMap::from([(
            1,
            PortPlan {
                access: Some(10),
                trunk: BTreeSet::from([10]),
            },
        )]);
        let config = Config::from_plans(&plans).unwrap();
        // Trunk wins; still a member, so the PVID invariant holds.
        assert_eq!(config.membership(10), Some([T].as_slice()));
    }

    #[test]
    fn test_membership_symbols() {
        assert_eq!(T.symbol(), 'T');
        assert_eq!(U.symbol(), 'U');
        assert_eq!(E.symbol(), '.');
        assert_eq!(T.as_str(), "tagged");
    }
}
