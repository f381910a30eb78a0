//! CLI-session driver for the GS7xxT-class managed switches.
//!
//! Speaks the line-oriented management CLI over a raw TCP text session:
//! write a command, read until the next prompt, scrape the tabular
//! output. Paged output (`--More-- or (q)uit`) is advanced with a
//! newline. The session holds a cursor position (login shell, enable
//! mode, config submodes), so calls must never be interleaved.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use vlansync_common::{SyncError, SyncResult};
use vlansync_core::{ApplyOutcome, MembershipState, PortId, SwitchDriver, SwitchKind, VlanId};

use crate::auth::FACTORY_PASSWORD;

/// TCP port the management CLI listens on.
pub const CLI_PORT: u16 = 60000;

const IO_TIMEOUT: Duration = Duration::from_secs(20);
const MORE_PROMPT: &str = "--More-- or (q)uit";
const EXEC_PROMPT: &str = "#";

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Lines of the table body: everything between the dashed header rule
/// and the next blank line.
fn table_body(output: &str) -> Vec<&str> {
    let mut body = Vec::new();
    let mut in_body = false;
    for line in output.lines() {
        if line.trim().is_empty() {
            in_body = false;
        }
        if in_body {
            body.push(line);
        }
        if line.starts_with("----") {
            in_body = true;
        }
    }
    body
}

/// Splits an `0/3`-style interface field into (unit, port).
fn parse_interface(field: &str) -> Option<(u16, PortId)> {
    let (unit, port) = field.split_once('/')?;
    Some((unit.parse().ok()?, port.parse().ok()?))
}

/// VLAN ids from `show vlan brief`: rows whose first field is numeric.
fn parse_vlan_brief(output: &str) -> BTreeSet<VlanId> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|field| field.parse::<VlanId>().ok())
        .collect()
}

/// Per-port membership from a `show vlan <id>` table.
///
/// Physical ports are unit 0; a row is a member when the Current column
/// says `Include`, and tagged when the Tagging column says exactly
/// `Tagged` (never matched as a substring, `Untagged` contains it).
fn parse_vlan_detail(output: &str) -> BTreeMap<PortId, MembershipState> {
    let mut members = BTreeMap::new();
    for line in table_body(output) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&(0, port)) = fields.first().and_then(|f| parse_interface(f)).as_ref() else {
            continue;
        };
        let included = fields.get(1) == Some(&"Include");
        let tagged = fields.iter().any(|f| *f == "Tagged");
        let state = if !included {
            MembershipState::Excluded
        } else if tagged {
            MembershipState::Tagged
        } else {
            MembershipState::Untagged
        };
        members.insert(port, state);
    }
    members
}

/// Per-port PVIDs from a `show vlan port all` table.
fn parse_port_pvids(output: &str) -> BTreeMap<PortId, VlanId> {
    let mut pvids = BTreeMap::new();
    for line in table_body(output) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&(0, port)) = fields.first().and_then(|f| parse_interface(f)).as_ref() else {
            continue;
        };
        if let Some(pvid) = fields.get(1).and_then(|f| f.parse::<VlanId>().ok()) {
            pvids.insert(port, pvid);
        }
    }
    pvids
}

/// Flattens a by-port membership map into the position-ordered vector
/// the driver contract requires. The ports must be exactly `1..=n`; a
/// gap would silently shift every later port into the wrong position.
fn membership_vector(
    members: BTreeMap<PortId, MembershipState>,
    vlan: VlanId,
) -> SyncResult<Vec<MembershipState>> {
    let context = format!("reading membership of VLAN {vlan}");
    if members.is_empty() {
        return Err(SyncError::protocol(
            context,
            "no physical-port rows in `show vlan` output",
        ));
    }
    for (position, &port) in members.keys().enumerate() {
        let expected = position as PortId + 1;
        if port != expected {
            return Err(SyncError::protocol(
                context,
                format!("port rows are not contiguous from 1: expected port {expected}, found {port}"),
            ));
        }
    }
    Ok(members.into_values().collect())
}

/// First error line the CLI printed in response to a command, if any.
fn rejection_in(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Error") || line.starts_with("Failed"))
        .map(str::to_string)
}

/// Driver variant for the line-oriented CLI session.
#[derive(Debug)]
pub struct CliSessionDriver {
    host: String,
    stream: TcpStream,
    pending: Vec<u8>,
}

impl CliSessionDriver {
    /// Connects, enters admin mode, authenticates, and enters enable
    /// mode. The returned driver sits at the exec prompt.
    ///
    /// A device still on its factory password is provisioned in place:
    /// when `password` is rejected the factory default is tried, and on
    /// success the password is changed to `password` before returning.
    pub async fn connect(host: &str, password: &str) -> SyncResult<Self> {
        Self::connect_port(host, CLI_PORT, password).await
    }

    async fn connect_port(host: &str, port: u16, password: &str) -> SyncResult<Self> {
        info!(host, port, "opening CLI session");
        let stream = timeout(IO_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| SyncError::transport(host, "connect timed out"))?
            .map_err(|e| SyncError::transport(host, e.to_string()))?;
        let mut driver = Self {
            host: host.to_string(),
            stream,
            pending: Vec::new(),
        };

        driver.admin_mode().await?;
        if !driver.try_login(password).await? {
            if password == FACTORY_PASSWORD {
                return Err(SyncError::authentication(host, "password rejected"));
            }
            // A failed login drops back to the banner.
            debug!(host, "configured password rejected, trying the factory default");
            driver.admin_mode().await?;
            if !driver.try_login(FACTORY_PASSWORD).await? {
                return Err(SyncError::authentication(
                    host,
                    "password rejected (factory default rejected too)",
                ));
            }
            driver.change_password(FACTORY_PASSWORD, password).await?;
        }

        info!(host, "CLI session established");
        Ok(driver)
    }

    /// Waits for the login banner and enters admin mode.
    async fn admin_mode(&mut self) -> SyncResult<()> {
        self.expect(&["please wait ..."]).await?;
        self.write("admin\n").await
    }

    /// One password attempt at the `Password:` prompt. On success the
    /// session is left at the exec prompt; `Ok(false)` means the
    /// password was wrong and the device returned to the banner.
    async fn try_login(&mut self, password: &str) -> SyncResult<bool> {
        self.expect(&["Password:"]).await?;
        self.write(password).await?;
        self.write("\n").await?;

        let (matched, _) = self.expect(&[">", "Applying"]).await?;
        if matched == 1 {
            return Ok(false);
        }

        self.write("enable\n\n").await?;
        self.expect(&[EXEC_PROMPT]).await?;
        Ok(true)
    }

    /// Replaces the factory default password. `passwd` only exists
    /// outside enable mode, so the session drops to the login shell and
    /// re-enters enable mode afterwards.
    async fn change_password(&mut self, old: &str, new: &str) -> SyncResult<()> {
        info!(host = %self.host, "factory password accepted, setting the configured password");
        self.write("exit\n").await?;
        self.expect(&[">"]).await?;
        self.write("passwd\n").await?;
        self.expect(&["Enter old password:"]).await?;
        self.write(old).await?;
        self.write("\n").await?;
        self.expect(&["Enter new password:"]).await?;
        self.write(new).await?;
        self.write("\n").await?;
        self.expect(&["Confirm new password:"]).await?;
        self.write(new).await?;
        self.write("\n").await?;
        self.expect(&["Password Changed!"]).await?;
        self.write("enable\n\n").await?;
        self.expect(&[EXEC_PROMPT]).await?;
        info!(host = %self.host, "password changed");
        Ok(())
    }

    /// Leaves enable mode and logs out. The session is unusable after.
    pub async fn logout(&mut self) -> SyncResult<()> {
        self.write("exit\n").await?;
        self.expect(&[">"]).await?;
        self.write("logout\n").await?;
        Ok(())
    }

    async fn write(&mut self, data: &str) -> SyncResult<()> {
        debug!(host = %self.host, data = data.trim_end(), "CLI write");
        timeout(IO_TIMEOUT, self.stream.write_all(data.as_bytes()))
            .await
            .map_err(|_| SyncError::transport(&self.host, "write timed out"))?
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))
    }

    /// Reads until one of `patterns` appears; returns the index of the
    /// pattern that matched earliest plus everything consumed through
    /// it.
    async fn expect(&mut self, patterns: &[&str]) -> SyncResult<(usize, String)> {
        loop {
            let mut earliest: Option<(usize, usize, usize)> = None;
            for (index, pattern) in patterns.iter().enumerate() {
                if let Some(pos) = find_sub(&self.pending, pattern.as_bytes()) {
                    let end = pos + pattern.len();
                    if earliest.map(|(_, p, _)| pos < p).unwrap_or(true) {
                        earliest = Some((index, pos, end));
                    }
                }
            }
            if let Some((index, _, end)) = earliest {
                let consumed: Vec<u8> = self.pending.drain(..end).collect();
                return Ok((index, String::from_utf8_lossy(&consumed).into_owned()));
            }

            let mut chunk = [0u8; 4096];
            let n = timeout(IO_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .map_err(|_| {
                    SyncError::transport(&self.host, format!("timed out waiting for {patterns:?}"))
                })?
                .map_err(|e| SyncError::transport(&self.host, e.to_string()))?;
            if n == 0 {
                return Err(SyncError::transport(&self.host, "connection closed"));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Collects full command output across pager stops, through the
    /// next exec prompt.
    async fn page(&mut self) -> SyncResult<String> {
        let mut output = String::new();
        loop {
            let (matched, consumed) = self.expect(&[MORE_PROMPT, EXEC_PROMPT]).await?;
            output.push_str(&consumed);
            if matched == 0 {
                self.write("\n").await?;
            } else {
                return Ok(output);
            }
        }
    }

    /// Runs one command at the exec prompt and returns its output.
    async fn exec(&mut self, command: &str) -> SyncResult<String> {
        self.write(command).await?;
        self.write("\n").await?;
        self.page().await
    }

    /// Runs `command` inside `vlan database` mode.
    async fn vlan_database(&mut self, command: &str, operation: &str) -> SyncResult<()> {
        self.exec("vlan database").await?;
        let output = self.exec(command).await?;
        self.exec("exit").await?;
        match rejection_in(&output) {
            Some(message) => Err(SyncError::rejected(operation, message)),
            None => Ok(()),
        }
    }

    /// Runs `command` inside `configure` / `interface 0/<port>` mode.
    async fn configure_interface(
        &mut self,
        port: PortId,
        command: &str,
        operation: &str,
    ) -> SyncResult<()> {
        self.exec("configure").await?;
        self.exec(&format!("interface 0/{port}")).await?;
        let output = self.exec(command).await?;
        self.exec("exit").await?;
        self.exec("exit").await?;
        match rejection_in(&output) {
            Some(message) => Err(SyncError::rejected(operation, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SwitchDriver for CliSessionDriver {
    fn kind(&self) -> SwitchKind {
        SwitchKind::CliSession
    }

    async fn is_vlan_mode_enabled(&mut self) -> SyncResult<bool> {
        // 802.1Q is always on for this family; there is no toggle.
        Ok(true)
    }

    async fn enable_vlan_mode(&mut self) -> SyncResult<()> {
        Ok(())
    }

    async fn list_vlan_ids(&mut self) -> SyncResult<BTreeSet<VlanId>> {
        let output = self.exec("show vlan brief").await?;
        Ok(parse_vlan_brief(&output))
    }

    async fn add_vlan(&mut self, vlan: VlanId) -> SyncResult<ApplyOutcome> {
        // The CLI accepts re-creating an existing VLAN silently; check
        // first so the outcome is reported honestly.
        if self.list_vlan_ids().await?.contains(&vlan) {
            return Ok(ApplyOutcome::AlreadySatisfied);
        }
        self.vlan_database(&format!("vlan {vlan}"), &format!("add_vlan({vlan})"))
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn delete_vlan(&mut self, vlan: VlanId) -> SyncResult<()> {
        self.vlan_database(&format!("no vlan {vlan}"), &format!("delete_vlan({vlan})"))
            .await
    }

    async fn port_pvids(&mut self) -> SyncResult<BTreeMap<PortId, VlanId>> {
        let output = self.exec("show vlan port all").await?;
        let pvids = parse_port_pvids(&output);
        if pvids.is_empty() {
            return Err(SyncError::protocol(
                "reading port PVIDs",
                "no physical-port rows in `show vlan port all` output",
            ));
        }
        Ok(pvids)
    }

    async fn set_port_pvid(&mut self, port: PortId, vlan: VlanId) -> SyncResult<()> {
        self.configure_interface(
            port,
            &format!("vlan pvid {vlan}"),
            &format!("set_port_pvid({port}, {vlan})"),
        )
        .await
    }

    async fn membership(&mut self, vlan: VlanId) -> SyncResult<Vec<MembershipState>> {
        let output = self.exec(&format!("show vlan {vlan}")).await?;
        membership_vector(parse_vlan_detail(&output), vlan)
    }

    async fn set_membership(
        &mut self,
        vlan: VlanId,
        states: &[MembershipState],
    ) -> SyncResult<()> {
        for (position, state) in states.iter().enumerate() {
            let port = position as PortId + 1;
            let operation = format!("set_membership({vlan}) port {port}");
            match state {
                MembershipState::Excluded => {
                    self.configure_interface(
                        port,
                        &format!("vlan participation exclude {vlan}"),
                        &operation,
                    )
                    .await?;
                }
                MembershipState::Tagged | MembershipState::Untagged => {
                    self.configure_interface(
                        port,
                        &format!("vlan participation include {vlan}"),
                        &operation,
                    )
                    .await?;
                    let tagging = if *state == MembershipState::Tagged {
                        format!("vlan tagging {vlan}")
                    } else {
                        format!("no vlan tagging {vlan}")
                    };
                    self.configure_interface(port, &tagging, &operation).await?;
                }
            }
        }
        Ok(())
    }
}
