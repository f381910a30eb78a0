//! Port-spec DSL parsing.
//!
//! The command line carries a token stream like:
//!
//! ```text
//! port 1 access 10 : desk jack A3
//! port 8 access 1 trunk 10,12-14
//! ```
//!
//! Commands match by unambiguous prefix (`p 1 a 10` works); `:` starts
//! a comment that runs until the next `port`. Trunk lists accept
//! comma-separated ids and `a-b` ranges.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use vlansync_core::{Config, PortId, PortPlan, VlanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Port,
    Access,
    Trunk,
    Comment,
}

const COMMANDS: [(&str, Command); 4] = [
    ("port", Command::Port),
    ("access", Command::Access),
    ("trunk", Command::Trunk),
    (":", Command::Comment),
];

/// Resolves a token to a command by unambiguous prefix.
fn match_command(token: &str) -> Result<Command> {
    let matches: Vec<&(&str, Command)> = COMMANDS
        .iter()
        .filter(|(word, _)| word.starts_with(token))
        .collect();
    match matches.as_slice() {
        [] => bail!("token {token:?} is not a command (expected port, access, trunk, or :)"),
        [(_, command)] => Ok(*command),
        many => {
            let words: Vec<&str> = many.iter().map(|(word, _)| *word).collect();
            bail!("token {token:?} is ambiguous between {words:?}")
        }
    }
}

/// Expands a VLAN list like `1,12-14` into ids.
fn expand_vlan_list(list: &str) -> Result<Vec<VlanId>> {
    let mut vlans = Vec::new();
    for part in list.split(',') {
        if let Some((low, high)) = part.split_once('-') {
            let low: VlanId = low.parse().with_context(|| format!("bad VLAN range {part:?}"))?;
            let high: VlanId = high
                .parse()
                .with_context(|| format!("bad VLAN range {part:?}"))?;
            if low > high {
                bail!("empty VLAN range {part:?}");
            }
            vlans.extend(low..=high);
        } else {
            vlans.push(part.parse().with_context(|| format!("bad VLAN id {part:?}"))?);
        }
    }
    Ok(vlans)
}

/// Parses the token stream into a validated [`Config`].
pub fn parse_tokens(tokens: &[String]) -> Result<Config> {
    let mut plans: BTreeMap<PortId, PortPlan> = BTreeMap::new();
    let mut current: Option<PortId> = None;
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        match match_command(token)? {
            Command::Port => {
                let arg = iter.next().context("port requires an index")?;
                let port: PortId = arg.parse().with_context(|| format!("bad port {arg:?}"))?;
                plans.entry(port).or_default();
                current = Some(port);
            }
            Command::Access => {
                let port = current.context("access before any port")?;
                let arg = iter.next().context("access requires a VLAN id")?;
                let vlan: VlanId = arg.parse().with_context(|| format!("bad VLAN id {arg:?}"))?;
                plans.entry(port).or_default().access = Some(vlan);
            }
            Command::Trunk => {
                let port = current.context("trunk before any port")?;
                let arg = iter.next().context("trunk requires a VLAN list")?;
                let vlans = expand_vlan_list(arg)?;
                plans.entry(port).or_default().trunk.extend(vlans);
            }
            Command::Comment => {
                while let Some(peeked) = iter.peek() {
                    if matches!(match_command(peeked.as_str()), Ok(Command::Port)) {
                        break;
                    }
                    iter.next();
                }
            }
        }
    }

    Ok(Config::from_plans(&plans)?)
}
