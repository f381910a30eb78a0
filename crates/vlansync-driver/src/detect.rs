//! Driver-variant detection and session establishment.
//!
//! One detection step inspects the device's identity string and picks a
//! [`SwitchKind`]; everything downstream depends only on the abstract
//! driver capability. No duck-typed probing: if neither identity
//! matches, detection fails loudly with what the device actually said.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};

use vlansync_common::{SyncError, SyncResult};
use vlansync_core::{SwitchDriver, SwitchKind};

use crate::auth::SessionState;
use crate::cli::CliSessionDriver;
use crate::http::HttpFormDriver;

const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Web-managed E-series identity, e.g. "GS108Ev3"; captures the
/// firmware major version.
static E_SERIES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"GS\d+Ev(\d)").expect("Invalid regex pattern"));

/// CLI-managed T-series identity in the landing page title.
static T_SERIES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<title>[^<]*GS\d+T").expect("Invalid regex pattern"));

/// Identified device: the driver variant plus any variant-specific
/// detail the driver needs (E-series firmware major version).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedSwitch {
    pub kind: SwitchKind,
    /// Firmware major version, known only for the HTTP-form variant.
    pub firmware_version: Option<u8>,
}

/// Classifies an identity page body.
fn classify(html: &str) -> Option<DetectedSwitch> {
    if let Some(captures) = E_SERIES_RE.captures(html) {
        let version = captures[1].parse().ok()?;
        return Some(DetectedSwitch {
            kind: SwitchKind::HttpForm,
            firmware_version: Some(version),
        });
    }
    if T_SERIES_RE.is_match(html) {
        return Some(DetectedSwitch {
            kind: SwitchKind::CliSession,
            firmware_version: None,
        });
    }
    None
}

/// Probes `host` once over HTTP and identifies the driver variant.
pub async fn detect(host: &str) -> SyncResult<DetectedSwitch> {
    let http = reqwest::Client::builder()
        .timeout(DETECT_TIMEOUT)
        .build()
        .map_err(|e| SyncError::transport(host, e.to_string()))?;

    // Both families serve their identity on the login/landing page.
    let mut identity = String::new();
    for path in ["login.cgi", ""] {
        let url = format!("http://{host}/{path}");
        let html = http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::transport(host, e.to_string()))?
            .text()
            .await
            .map_err(|e| SyncError::transport(host, e.to_string()))?;
        if let Some(detected) = classify(&html) {
            debug!(host, kind = detected.kind.as_str(), "switch identified");
            return Ok(detected);
        }
        identity = html;
    }

    let excerpt: String = identity.chars().take(200).collect();
    Err(SyncError::detection(host, excerpt))
}

/// Options for establishing a management session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Admin password.
    pub password: String,
    /// Previously saved HTTP session to try before logging in afresh.
    pub session: SessionState,
}

/// An established, authenticated management session.
///
/// Keeps the concrete driver type visible so the caller can read the
/// session value back out for persistence; the reconciliation engine
/// only ever sees `&mut dyn SwitchDriver`.
pub enum SwitchConnection {
    HttpForm(HttpFormDriver),
    CliSession(CliSessionDriver),
}

impl SwitchConnection {
    /// The driver capability view.
    pub fn driver(&mut self) -> &mut dyn SwitchDriver {
        match self {
            SwitchConnection::HttpForm(driver) => driver,
            SwitchConnection::CliSession(driver) => driver,
        }
    }

    /// The HTTP session to persist, if this is an HTTP-form session.
    pub fn session(&self) -> Option<SessionState> {
        match self {
            SwitchConnection::HttpForm(driver) => Some(driver.session().clone()),
            SwitchConnection::CliSession(_) => None,
        }
    }
}

/// Detects the driver variant for `host` and establishes an
/// authenticated session.
pub async fn connect(host: &str, options: &ConnectOptions) -> SyncResult<SwitchConnection> {
    let detected = detect(host).await?;
    info!(host, kind = detected.kind.as_str(), "connecting");
    match detected.kind {
        SwitchKind::HttpForm => {
            let version = detected.firmware_version.unwrap_or(3);
            let driver =
                HttpFormDriver::connect(host, &options.password, version, options.session.clone())
                    .await?;
            Ok(SwitchConnection::HttpForm(driver))
        }
        SwitchKind::CliSession => {
            let driver = CliSessionDriver::connect(host, &options.password).await?;
            Ok(SwitchConnection::CliSession(driver))
        }
    }
}
