//! Reconciliation engine.
//!
//! Converges live device state to a desired [`Config`] through a
//! [`SwitchDriver`], in a deterministic single pass:
//!
//! 1. Enable 802.1Q VLAN mode if it is off.
//! 2. Create every referenced VLAN missing from the device, ascending.
//! 3. Per port: if the port is currently excluded from its desired
//!    PVID's VLAN, write the membership fix first (the device refuses a
//!    PVID pointing at a non-member VLAN), then set the PVID.
//! 4. Write every membership vector wholesale. This pass is
//!    authoritative and overwrites any transitional state from step 3.
//!
//! Errors abort immediately; no rollback. The fix-before-pvid ordering
//! means an aborted run never leaves a port's PVID pointing at a VLAN
//! it is excluded from, though later memberships may remain stale until
//! a retry.

use std::collections::BTreeMap;
use tracing::{debug, info};

use vlansync_common::{SyncError, SyncResult};

use crate::config::{Config, MembershipState, PortId, VlanId, DEFAULT_VLAN_ID};
use crate::driver::{ApplyOutcome, SwitchDriver};

/// Applies `config` to the device behind `driver`.
///
/// Idempotent: a second run against an unchanged device performs no
/// VLAN additions and no membership fix-ups, and every remaining write
/// encodes already-true state.
pub async fn reconcile(config: &Config, driver: &mut dyn SwitchDriver) -> SyncResult<()> {
    if !driver.is_vlan_mode_enabled().await? {
        info!("enabling 802.1Q VLAN mode");
        driver.enable_vlan_mode().await?;
    }

    let required = config.required_vlans();
    let present = driver.list_vlan_ids().await?;
    debug!(?required, ?present, "device VLAN inventory read");
    for &vlan in required.difference(&present) {
        match driver.add_vlan(vlan).await? {
            ApplyOutcome::Applied => info!(vlan, "added VLAN"),
            ApplyOutcome::AlreadySatisfied => debug!(vlan, "VLAN already present"),
        }
    }

    for (position, &port) in config.ports().iter().enumerate() {
        let pvid = config.pvids()[&port];
        let current = driver.membership(pvid).await?;
        let current_state = current
            .get(position)
            .copied()
            .unwrap_or(MembershipState::Excluded);
        if current_state == MembershipState::Excluded {
            // Cannot happen for a valid config's own membership, so the
            // Untagged fallback is never taken in practice.
            let desired = config
                .membership(pvid)
                .and_then(|states| states.get(position))
                .copied()
                .unwrap_or(MembershipState::Untagged);
            let mut updated = current;
            if position >= updated.len() {
                return Err(SyncError::protocol(
                    format!("reading membership of VLAN {pvid}"),
                    format!(
                        "device reported {} ports, config expects at least {}",
                        updated.len(),
                        position + 1
                    ),
                ));
            }
            updated[position] = desired;
            info!(
                port,
                vlan = pvid,
                state = desired.as_str(),
                "joining port to its PVID VLAN before the PVID change"
            );
            driver.set_membership(pvid, &updated).await?;
        }
        info!(port, pvid, "setting port PVID");
        driver.set_port_pvid(port, pvid).await?;
    }

    for (&vlan, states) in config.memberships() {
        info!(vlan, "writing final membership");
        driver.set_membership(vlan, states).await?;
    }

    Ok(())
}

/// Deletes device VLANs the config does not reference.
///
/// Full-replace extension on top of [`reconcile`], which itself never
/// deletes. Must run after a successful reconcile; VLAN 1 is never
/// deleted. Returns the VLANs removed.
pub async fn prune_vlans(
    config: &Config,
    driver: &mut dyn SwitchDriver,
) -> SyncResult<Vec<VlanId>> {
    let required = config.required_vlans();
    let present = driver.list_vlan_ids().await?;
    let mut removed = Vec::new();
    for &vlan in present.difference(&required) {
        if vlan == DEFAULT_VLAN_ID {
            continue;
        }
        info!(vlan, "deleting unreferenced VLAN");
        driver.delete_vlan(vlan).await?;
        removed.push(vlan);
    }
    Ok(removed)
}

/// Snapshots the device's current VLAN layout as a [`Config`] over the
/// given port list, for diff previews.
///
/// The snapshot is driver-local and never cached. Device state that
/// violates the PVID-membership invariant (or omits a port) is a
/// protocol error: our assumptions about the firmware are stale.
pub async fn read_device_config(
    ports: &[PortId],
    driver: &mut dyn SwitchDriver,
) -> SyncResult<Config> {
    let device_pvids = driver.port_pvids().await?;
    let mut pvids = BTreeMap::new();
    for &port in ports {
        let pvid = device_pvids.get(&port).copied().ok_or_else(|| {
            SyncError::protocol(
                "reading port PVIDs",
                format!("device reported no PVID for port {port}"),
            )
        })?;
        pvids.insert(port, pvid);
    }

    let mut vlans = driver.list_vlan_ids().await?;
    vlans.extend(pvids.values().copied());

    let mut memberships = BTreeMap::new();
    for vlan in vlans {
        let states = driver.membership(vlan).await?;
        if states.len() < ports.len() {
            return Err(SyncError::protocol(
                format!("reading membership of VLAN {vlan}"),
                format!(
                    "device reported {} ports, config expects {}",
                    states.len(),
                    ports.len()
                ),
            ));
        }
        memberships.insert(vlan, states[..ports.len()].to_vec());
    }

    Config::build(ports.to_vec(), pvids, memberships)
        .map_err(|e| SyncError::protocol("snapshotting device state", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortPlan;
    use crate::driver::SwitchKind;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use MembershipState::{Excluded as E, Untagged as U};

    /// In-memory switch that records every driver call.
    struct MockSwitch {
        num_ports: usize,
        vlan_mode: bool,
        vlans: BTreeSet<VlanId>,
        pvids: BTreeMap<PortId, VlanId>,
        memberships: BTreeMap<VlanId, Vec<MembershipState>>,
        calls: Vec<String>,
        reject_adds: bool,
    }

    impl MockSwitch {
        /// Factory-fresh device: VLAN mode off, only VLAN 1, every port
        /// untagged on VLAN 1 with PVID 1.
        fn factory(num_ports: usize) -> Self {
            Self {
                num_ports,
                vlan_mode: false,
                vlans: BTreeSet::from([1]),
                pvids: (1..=num_ports as PortId).map(|p| (p, 1)).collect(),
                memberships: BTreeMap::from([(1, vec![U; num_ports])]),
                calls: Vec::new(),
                reject_adds: false,
            }
        }

        fn mutating_calls(&self) -> Vec<&String> {
            self.calls
                .iter()
                .filter(|c| {
                    c.starts_with("add_vlan")
                        || c.starts_with("set_membership")
                        || c.starts_with("set_port_pvid")
                        || c.starts_with("enable_vlan_mode")
                        || c.starts_with("delete_vlan")
                })
                .collect()
        }

        fn membership_vec(&self, vlan: VlanId) -> Vec<MembershipState> {
            self.memberships
                .get(&vlan)
                .cloned()
                .unwrap_or_else(|| vec![E; self.num_ports])
        }
    }

    fn states_code(states: &[MembershipState]) -> String {
        states.iter().map(|s| s.symbol()).collect()
    }

    #[async_trait]
    impl SwitchDriver for MockSwitch {
        fn kind(&self) -> SwitchKind {
            SwitchKind::HttpForm
        }

        async fn is_vlan_mode_enabled(&mut self) -> SyncResult<bool> {
            self.calls.push("is_vlan_mode_enabled".into());
            Ok(self.vlan_mode)
        }

        async fn enable_vlan_mode(&mut self) -> SyncResult<()> {
            self.calls.push("enable_vlan_mode".into());
            self.vlan_mode = true;
            Ok(())
        }

        async fn list_vlan_ids(&mut self) -> SyncResult<BTreeSet<VlanId>> {
            self.calls.push("list_vlan_ids".into());
            Ok(self.vlans.clone())
        }

        async fn add_vlan(&mut self, vlan: VlanId) -> SyncResult<ApplyOutcome> {
            self.calls.push(format!("add_vlan {vlan}"));
            if self.reject_adds {
                return Err(SyncError::rejected(
                    format!("add_vlan({vlan})"),
                    "Max VLANs reached",
                ));
            }
            if self.vlans.insert(vlan) {
                Ok(ApplyOutcome::Applied)
            } else {
                Ok(ApplyOutcome::AlreadySatisfied)
            }
        }

        async fn delete_vlan(&mut self, vlan: VlanId) -> SyncResult<()> {
            self.calls.push(format!("delete_vlan {vlan}"));
            self.vlans.remove(&vlan);
            self.memberships.remove(&vlan);
            Ok(())
        }

        async fn port_pvids(&mut self) -> SyncResult<BTreeMap<PortId, VlanId>> {
            self.calls.push("port_pvids".into());
            Ok(self.pvids.clone())
        }

        async fn set_port_pvid(&mut self, port: PortId, vlan: VlanId) -> SyncResult<()> {
            self.calls.push(format!("set_port_pvid {port} {vlan}"));
            let member = self
                .membership_vec(vlan)
                .get(port as usize - 1)
                .copied()
                .unwrap_or(E)
                != E;
            assert!(
                member,
                "device invariant violated: PVID {vlan} on port {port} which is excluded"
            );
            self.pvids.insert(port, vlan);
            Ok(())
        }

        async fn membership(&mut self, vlan: VlanId) -> SyncResult<Vec<MembershipState>> {
            self.calls.push(format!("membership {vlan}"));
            Ok(self.membership_vec(vlan))
        }

        async fn set_membership(
            &mut self,
            vlan: VlanId,
            states: &[MembershipState],
        ) -> SyncResult<()> {
            self.calls
                .push(format!("set_membership {vlan} {}", states_code(states)));
            self.memberships.insert(vlan, states.to_vec());
            Ok(())
        }
    }

    /// ports = [1,2,3], pvids = {1:1, 2:1, 3:12},
    /// memberships = {1: [U,U,E], 12: [E,E,U]}
    fn three_port_config() -> Config {
        let plans = BTreeMap::from([
            (1, PortPlan::access(1)),
            (2, PortPlan::access(1)),
            (3, PortPlan::access(12)),
        ]);
        Config::from_plans(&plans).unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_factory_device_call_sequence() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);

        reconcile(&config, &mut switch).await.unwrap();

        assert_eq!(
            switch.mutating_calls(),
            vec![
                "enable_vlan_mode",
                "add_vlan 12",
                // Port 3 is excluded from VLAN 12; membership is fixed
                // strictly before the PVID change.
                "set_port_pvid 1 1",
                "set_port_pvid 2 1",
                "set_membership 12 ..U",
                "set_port_pvid 3 12",
                "set_membership 1 UU.",
                "set_membership 12 ..U",
            ]
        );

        // End state exactly matches the config.
        assert_eq!(switch.pvids, BTreeMap::from([(1, 1), (2, 1), (3, 12)]));
        assert_eq!(switch.memberships[&1], vec![U, U, E]);
        assert_eq!(switch.memberships[&12], vec![E, E, U]);
        assert!(switch.vlan_mode);
    }

    #[tokio::test]
    async fn test_reconcile_fixup_precedes_pvid_change() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);
        reconcile(&config, &mut switch).await.unwrap();

        let fixup = switch
            .calls
            .iter()
            .position(|c| c == "set_membership 12 ..U")
            .unwrap();
        let pvid = switch
            .calls
            .iter()
            .position(|c| c == "set_port_pvid 3 12")
            .unwrap();
        assert!(fixup < pvid);
    }

    #[tokio::test]
    async fn test_reconcile_one_add_vlan_per_missing_vlan() {
        let mut plans = BTreeMap::new();
        plans.insert(1, PortPlan::access(20));
        plans.insert(2, PortPlan::trunk([20, 30]));
        let config = Config::from_plans(&plans).unwrap();

        let mut switch = MockSwitch::factory(2);
        reconcile(&config, &mut switch).await.unwrap();

        let adds: Vec<&String> = switch
            .calls
            .iter()
            .filter(|c| c.starts_with("add_vlan"))
            .collect();
        // Ascending order, one per missing VLAN, none for VLAN 1.
        assert_eq!(adds, vec!["add_vlan 20", "add_vlan 30"]);
    }

    #[tokio::test]
    async fn test_reconcile_idempotent_second_run() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);
        reconcile(&config, &mut switch).await.unwrap();

        switch.calls.clear();
        reconcile(&config, &mut switch).await.unwrap();

        assert!(!switch.calls.iter().any(|c| c.starts_with("add_vlan")));
        assert!(!switch.calls.iter().any(|c| c == "enable_vlan_mode"));
        // Only the structurally fixed writes remain, and each encodes
        // already-true state.
        assert_eq!(
            switch.mutating_calls(),
            vec![
                "set_port_pvid 1 1",
                "set_port_pvid 2 1",
                "set_port_pvid 3 12",
                "set_membership 1 UU.",
                "set_membership 12 ..U",
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_aborts_on_rejection() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);
        switch.reject_adds = true;

        let err = reconcile(&config, &mut switch).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { .. }));
        // Aborted before any PVID or membership write.
        assert!(!switch.calls.iter().any(|c| c.starts_with("set_")));
    }

    #[tokio::test]
    async fn test_prune_vlans_removes_only_orphans() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);
        switch.vlans.extend([12, 40, 50]);

        let removed = prune_vlans(&config, &mut switch).await.unwrap();
        assert_eq!(removed, vec![40, 50]);
        assert_eq!(switch.vlans, BTreeSet::from([1, 12]));
    }

    #[tokio::test]
    async fn test_prune_vlans_never_deletes_vlan_1() {
        let plans = BTreeMap::from([(1, PortPlan::access(10))]);
        let config = Config::from_plans(&plans).unwrap();
        // Config references only VLAN 10; VLAN 1 must survive anyway.
        let mut switch = MockSwitch::factory(1);
        switch.vlans.insert(10);

        let removed = prune_vlans(&config, &mut switch).await.unwrap();
        assert!(removed.is_empty());
        assert!(switch.vlans.contains(&1));
    }

    #[tokio::test]
    async fn test_read_device_config_round_trip() {
        let config = three_port_config();
        let mut switch = MockSwitch::factory(3);
        reconcile(&config, &mut switch).await.unwrap();

        let snapshot = read_device_config(config.ports(), &mut switch)
            .await
            .unwrap();
        assert_eq!(snapshot, config);

        let delta = crate::diff::diff(&snapshot, &config).unwrap();
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn test_read_device_config_factory_state() {
        let mut switch = MockSwitch::factory(3);
        let snapshot = read_device_config(&[1, 2, 3], &mut switch).await.unwrap();
        assert_eq!(snapshot.pvids()[&1], 1);
        assert_eq!(snapshot.membership(1), Some([U, U, U].as_slice()));
    }
}
