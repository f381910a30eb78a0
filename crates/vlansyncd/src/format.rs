//! Table rendering for configs and diffs.

use tabled::builder::Builder;
use tabled::settings::Style;

use vlansync_core::{Config, ConfigDiff};

/// Renders a config as one row per port with a PVID column and one
/// membership column per VLAN (`U` untagged, `T` tagged, `.` excluded).
pub fn render_config(config: &Config) -> String {
    let mut builder = Builder::default();

    let mut header = vec!["PORT".to_string(), "PVID".to_string()];
    header.extend(config.memberships().keys().map(|vlan| vlan.to_string()));
    builder.push_record(header);

    for (position, &port) in config.ports().iter().enumerate() {
        let mut row = vec![port.to_string(), config.pvids()[&port].to_string()];
        row.extend(
            config
                .memberships()
                .values()
                .map(|states| states[position].symbol().to_string()),
        );
        builder.push_record(row);
    }

    builder.build().with(Style::sharp()).to_string()
}

/// Renders a diff in the same layout, leaving unchanged cells blank.
pub fn render_diff(diff: &ConfigDiff) -> String {
    let mut builder = Builder::default();

    let mut header = vec!["PORT".to_string(), "PVID".to_string()];
    header.extend(diff.memberships.keys().map(|vlan| vlan.to_string()));
    builder.push_record(header);

    for (position, &port) in diff.ports.iter().enumerate() {
        let mut row = vec![
            port.to_string(),
            diff.pvids[position]
                .map(|vlan| vlan.to_string())
                .unwrap_or_default(),
        ];
        row.extend(diff.memberships.values().map(|states| {
            states[position]
                .map(|state| state.symbol().to_string())
                .unwrap_or_default()
        }));
        builder.push_record(row);
    }

    builder.build().with(Style::sharp()).to_string()
}
