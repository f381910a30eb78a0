//! HTTP-form driver for the GS108Ev3-class web admin UI.
//!
//! Every mutation follows the same dance: GET the page, scrape the
//! hidden anti-CSRF `hash` input, POST the form with the hash
//! resubmitted. Device errors come back inside a hidden `err_msg`
//! input. The whole UI is plain fixed-layout HTML, so scraping is
//! regex over the relevant tags rather than a DOM parser.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{COOKIE, REFERER, SET_COOKIE};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use vlansync_common::{SyncError, SyncResult};
use vlansync_core::{ApplyOutcome, MembershipState, PortId, SwitchDriver, SwitchKind, VlanId};

use crate::auth::{challenge_response, SessionState, FACTORY_PASSWORD};
use crate::codec::{decode_membership, encode_membership};

/// 802.1Q status / VLAN add+delete page.
pub const PAGE_VLAN_CONFIG: &str = "8021qCf";
/// Per-VLAN membership page.
pub const PAGE_VLAN_MEMBERS: &str = "8021qMembe";
/// Port PVID page.
pub const PAGE_PORT_PVID: &str = "portPVID";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

static INPUT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<input[^>]*>").expect("Invalid regex pattern"));
static OPTION_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<option[^>]*>").expect("Invalid regex pattern"));
static NAME_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name\s*=\s*['"]([^'"]*)['"]"#).expect("Invalid regex pattern"));
static ID_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bid\s*=\s*['"]([^'"]*)['"]"#).expect("Invalid regex pattern"));
static VALUE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"value\s*=\s*['"]([^'"]*)['"]"#).expect("Invalid regex pattern"));
static PVID_CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<td class="def" sel="input">(\d+)"#).expect("Invalid regex pattern"));

fn attr(tag: &str, re: &Regex) -> Option<String> {
    re.captures(tag).map(|c| c[1].to_string())
}

/// Value of the first `<input>` whose `name` attribute equals `name`.
fn input_value_by_name(html: &str, name: &str) -> Option<String> {
    INPUT_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attr(tag, &NAME_ATTR_RE).as_deref() == Some(name))
        .and_then(|tag| attr(tag, &VALUE_ATTR_RE))
}

/// Value of the first `<input>` whose `id` attribute equals `id`.
fn input_value_by_id(html: &str, id: &str) -> Option<String> {
    INPUT_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attr(tag, &ID_ATTR_RE).as_deref() == Some(id))
        .and_then(|tag| attr(tag, &VALUE_ATTR_RE))
}

/// (name, value) of every `<input>` whose name starts with `prefix`.
fn inputs_with_name_prefix(html: &str, prefix: &str) -> Vec<(String, String)> {
    INPUT_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .filter_map(|tag| {
            let name = attr(tag, &NAME_ATTR_RE)?;
            if !name.starts_with(prefix) {
                return None;
            }
            let value = attr(tag, &VALUE_ATTR_RE)?;
            Some((name, value))
        })
        .collect()
}

/// Whether the `status` radio input marked `checked` is the Enable one.
fn vlan_status_enabled(html: &str) -> bool {
    INPUT_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| attr(tag, &NAME_ATTR_RE).as_deref() == Some("status"))
        .any(|tag| tag.contains("checked") && attr(tag, &VALUE_ATTR_RE).as_deref() == Some("Enable"))
}

/// Value of the `<option selected>` on the members page VLAN selector.
fn selected_option_value(html: &str) -> Option<String> {
    OPTION_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| tag.contains("selected"))
        .and_then(|tag| attr(tag, &VALUE_ATTR_RE))
}

/// Device error message from the hidden `err_msg` input, if non-empty.
fn error_message(html: &str) -> Option<String> {
    input_value_by_id(html, "err_msg").filter(|msg| !msg.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoginOutcome {
    Accepted,
    /// Wrong password; another password may be tried.
    InvalidPassword,
    /// The device refused the login for another reason (e.g. the
    /// session limit); retrying with a different password is pointless.
    Refused(String),
    Unexpected,
}

/// Classifies the body the device returns from `login.cgi`.
fn classify_login(html: &str) -> LoginOutcome {
    if let Some(message) = error_message(html) {
        if message.contains("The password is invalid") {
            return LoginOutcome::InvalidPassword;
        }
        return LoginOutcome::Refused(message);
    }
    if html.contains("Maximum sessions reached") {
        return LoginOutcome::Refused("maximum sessions reached".to_string());
    }
    if html.contains("RedirectToIndexPage") {
        return LoginOutcome::Accepted;
    }
    LoginOutcome::Unexpected
}

/// Driver variant for the HTML-forms admin UI.
pub struct HttpFormDriver {
    http: reqwest::Client,
    host: String,
    /// Firmware major version from the identity string (GS108Ev3 -> 3).
    version: u8,
    session: SessionState,
}

impl HttpFormDriver {
    /// Establishes an authenticated session against `host`.
    ///
    /// A previously saved `session` is tried first; if the device no
    /// longer honors its cookie, a fresh challenge-response login is
    /// performed. Read the session back with [`HttpFormDriver::session`]
    /// and persist it for the next run.
    pub async fn connect(
        host: &str,
        password: &str,
        version: u8,
        session: SessionState,
    ) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::transport(host, e.to_string()))?;
        let mut driver = Self {
            http,
            host: host.to_string(),
            version,
            session,
        };

        let html = driver.request_get("index.htm").await?;
        if html.contains("RedirectToLoginPage") {
            debug!("saved session rejected, logging in again");
            driver.session.cookie = None;
            driver.establish_login(password).await?;
        } else if html.contains("Thank you for selecting NETGEAR products") {
            debug!("saved session still valid");
        } else {
            return Err(SyncError::protocol(
                "probing login state",
                "index page is neither a login redirect nor the switch UI",
            ));
        }
        Ok(driver)
    }

    /// The session value to persist for cookie reuse.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Logs in with `password`, falling back to the factory default.
    ///
    /// A device still on its factory password is provisioned in place:
    /// log in with the default, change the password to `password`, and
    /// keep the session.
    async fn establish_login(&mut self, password: &str) -> SyncResult<()> {
        if self.try_login(password).await? {
            return Ok(());
        }
        if password != FACTORY_PASSWORD {
            debug!(host = %self.host, "configured password rejected, trying the factory default");
            if self.try_login(FACTORY_PASSWORD).await? {
                self.change_password(FACTORY_PASSWORD, password).await?;
                return Ok(());
            }
        }
        Err(SyncError::authentication(
            &self.host,
            "password rejected (factory default rejected too)",
        ))
    }

    /// One challenge-response login attempt. `Ok(false)` means the
    /// password was wrong; every other refusal is an error.
    async fn try_login(&mut self, password: &str) -> SyncResult<bool> {
        let html = self.request_get("login.htm").await?;
        let nonce = input_value_by_id(&html, "rand").ok_or_else(|| {
            SyncError::protocol("fetching login page", "no challenge nonce input found")
        })?;

        let response = challenge_response(password, &nonce);
        let html = self
            .request_post("login.cgi", &[("password", response)])
            .await?;

        match classify_login(&html) {
            LoginOutcome::Accepted => {
                self.request_get("index.htm").await?;
                info!(host = %self.host, "logged in");
                Ok(true)
            }
            LoginOutcome::InvalidPassword => Ok(false),
            LoginOutcome::Refused(message) => Err(SyncError::authentication(&self.host, message)),
            LoginOutcome::Unexpected => Err(SyncError::protocol(
                "logging in",
                "login response is neither an error nor an index redirect",
            )),
        }
    }

    /// Replaces the factory default password within the current session.
    async fn change_password(&mut self, old: &str, new: &str) -> SyncResult<()> {
        let op = "changing factory default password";
        info!(host = %self.host, "factory password accepted, setting the configured password");

        // The firmware serves the change form only behind an index
        // Referer.
        let mut req = self
            .http
            .get(self.url("pwd_ck.htm"))
            .header(REFERER, self.url("index.htm"));
        if let Some(cookie) = &self.session.cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))?;
        self.capture_cookie(&resp);
        let html = resp
            .text()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))?;
        if let Some(message) = error_message(&html) {
            return Err(SyncError::rejected(op, message));
        }

        let hash = input_value_by_id(&html, "hashEle")
            .ok_or_else(|| SyncError::protocol(op, "no hashEle input on password page"))?;
        self.post_form(
            "changeDefPwd",
            op,
            &[
                ("hash", hash),
                ("oldPassword", old.to_string()),
                ("newPassword", new.to_string()),
            ],
        )
        .await?;
        info!(host = %self.host, "password changed");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.host, path)
    }

    /// Raw GET; captures any session cookie, no `err_msg` inspection.
    async fn request_get(&mut self, path: &str) -> SyncResult<String> {
        debug!(host = %self.host, path, "GET");
        let mut req = self.http.get(self.url(path));
        if let Some(cookie) = &self.session.cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))?;
        self.capture_cookie(&resp);
        resp.text()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))
    }

    /// Raw POST of a urlencoded form; captures any session cookie.
    async fn request_post(&mut self, path: &str, form: &[(&str, String)]) -> SyncResult<String> {
        debug!(host = %self.host, path, "POST");
        let mut req = self.http.post(self.url(path)).form(form);
        if let Some(cookie) = &self.session.cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))?;
        self.capture_cookie(&resp);
        resp.text()
            .await
            .map_err(|e| SyncError::transport(&self.host, e.to_string()))
    }

    fn capture_cookie(&mut self, resp: &reqwest::Response) {
        if let Some(value) = resp.headers().get(SET_COOKIE) {
            if let Ok(value) = value.to_str() {
                if let Some(cookie) = value.split(';').next() {
                    self.session.cookie = Some(cookie.to_string());
                }
            }
        }
    }

    /// GET `{page}.htm` and surface any device error as a rejection.
    async fn get_page(&mut self, page: &str, operation: &str) -> SyncResult<String> {
        let html = self.request_get(&format!("{page}.htm")).await?;
        match error_message(&html) {
            Some(message) => Err(SyncError::rejected(operation, message)),
            None => Ok(html),
        }
    }

    /// POST `{page}.cgi` and surface any device error as a rejection.
    async fn post_form(
        &mut self,
        page: &str,
        operation: &str,
        form: &[(&str, String)],
    ) -> SyncResult<String> {
        let html = self.request_post(&format!("{page}.cgi"), form).await?;
        match error_message(&html) {
            Some(message) => Err(SyncError::rejected(operation, message)),
            None => Ok(html),
        }
    }

    /// Scrapes the anti-CSRF hash off a freshly fetched page.
    fn page_hash(&self, html: &str, operation: &str) -> SyncResult<String> {
        input_value_by_name(html, "hash").ok_or_else(|| {
            SyncError::protocol(
                operation.to_string(),
                "no hidden hash input on page (firmware layout changed?)",
            )
        })
    }
}

#[async_trait]
impl SwitchDriver for HttpFormDriver {
    fn kind(&self) -> SwitchKind {
        SwitchKind::HttpForm
    }

    async fn is_vlan_mode_enabled(&mut self) -> SyncResult<bool> {
        let html = self
            .get_page(PAGE_VLAN_CONFIG, "reading 802.1Q status")
            .await?;
        Ok(vlan_status_enabled(&html))
    }

    async fn enable_vlan_mode(&mut self) -> SyncResult<()> {
        let op = "enable 802.1Q VLAN mode";
        let html = self.get_page(PAGE_VLAN_CONFIG, op).await?;
        let hash = self.page_hash(&html, op)?;
        self.post_form(
            PAGE_VLAN_CONFIG,
            op,
            &[("status", "Enable".to_string()), ("hash", hash)],
        )
        .await?;
        Ok(())
    }

    async fn list_vlan_ids(&mut self) -> SyncResult<std::collections::BTreeSet<VlanId>> {
        let html = self.get_page(PAGE_VLAN_CONFIG, "listing VLANs").await?;
        let mut vlans = std::collections::BTreeSet::new();
        for (name, value) in inputs_with_name_prefix(&html, "vlanck") {
            match value.parse::<VlanId>() {
                Ok(vlan) => {
                    vlans.insert(vlan);
                }
                Err(_) => warn!(%name, %value, "ignoring non-numeric VLAN checkbox"),
            }
        }
        Ok(vlans)
    }

    async fn add_vlan(&mut self, vlan: VlanId) -> SyncResult<ApplyOutcome> {
        let op = format!("add_vlan({vlan})");
        let html = self.get_page(PAGE_VLAN_CONFIG, &op).await?;
        let hash = self.page_hash(&html, &op)?;
        let vlan_num = input_value_by_name(&html, "vlanNum").unwrap_or_else(|| "0".to_string());
        let result = self
            .post_form(
                PAGE_VLAN_CONFIG,
                &op,
                &[
                    ("status", "Enable".to_string()),
                    ("hiddVlan", String::new()),
                    ("ADD_VLANID", vlan.to_string()),
                    ("vlanNum", vlan_num),
                    ("hash", hash),
                    ("ACTION", "Add".to_string()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(ApplyOutcome::Applied),
            Err(SyncError::Rejected { message, .. })
                if message.to_ascii_lowercase().contains("exist") =>
            {
                Ok(ApplyOutcome::AlreadySatisfied)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_vlan(&mut self, vlan: VlanId) -> SyncResult<()> {
        let op = format!("delete_vlan({vlan})");
        let html = self.get_page(PAGE_VLAN_CONFIG, &op).await?;
        let hash = self.page_hash(&html, &op)?;
        let vlan_num = input_value_by_name(&html, "vlanNum").unwrap_or_else(|| "0".to_string());
        let checkbox = inputs_with_name_prefix(&html, "vlanck")
            .into_iter()
            .find(|(_, value)| value == &vlan.to_string());
        let Some((checkbox_name, _)) = checkbox else {
            debug!(vlan, "VLAN not on device, nothing to delete");
            return Ok(());
        };
        self.post_form(
            PAGE_VLAN_CONFIG,
            &op,
            &[
                ("status", "Enable".to_string()),
                ("hiddVlan", String::new()),
                ("ADD_VLANID", String::new()),
                (&checkbox_name, vlan.to_string()),
                ("vlanNum", vlan_num),
                ("hash", hash),
                ("ACTION", "Delete".to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn port_pvids(&mut self) -> SyncResult<BTreeMap<PortId, VlanId>> {
        let op = "reading port PVIDs";
        let html = self.get_page(PAGE_PORT_PVID, op).await?;
        let mut pvids = BTreeMap::new();
        for (index, capture) in PVID_CELL_RE.captures_iter(&html).enumerate() {
            let pvid = capture[1]
                .parse::<VlanId>()
                .map_err(|_| SyncError::protocol(op, format!("bad PVID cell {:?}", &capture[1])))?;
            pvids.insert(index as PortId + 1, pvid);
        }
        if pvids.is_empty() {
            return Err(SyncError::protocol(op, "no PVID cells found on page"));
        }
        Ok(pvids)
    }

    async fn set_port_pvid(&mut self, port: PortId, vlan: VlanId) -> SyncResult<()> {
        let op = format!("set_port_pvid({port}, {vlan})");
        let html = self.get_page(PAGE_PORT_PVID, &op).await?;
        let hash = self.page_hash(&html, &op)?;
        // v2 firmware names the checkboxes port0..n-1, v3 names them
        // port1..n.
        let form_index = if self.version <= 2 { port - 1 } else { port };
        let port_field = format!("port{form_index}");
        self.post_form(
            PAGE_PORT_PVID,
            &op,
            &[
                (&port_field, "checked".to_string()),
                ("pvid", vlan.to_string()),
                ("hash", hash),
            ],
        )
        .await?;
        Ok(())
    }

    async fn membership(&mut self, vlan: VlanId) -> SyncResult<Vec<MembershipState>> {
        let op = format!("reading membership of VLAN {vlan}");
        let mut html = self.get_page(PAGE_VLAN_MEMBERS, &op).await?;

        // The members page loads showing a single VLAN (usually 1); a
        // read for any other VLAN is only trustworthy after reposting
        // the selector for it.
        let shown = selected_option_value(&html)
            .and_then(|value| value.parse::<VlanId>().ok())
            .ok_or_else(|| SyncError::protocol(op.as_str(), "no selected VLAN option on members page"))?;
        if shown != vlan {
            let hash = self.page_hash(&html, &op)?;
            html = self
                .post_form(
                    PAGE_VLAN_MEMBERS,
                    &op,
                    &[("VLAN_ID", vlan.to_string()), ("hash", hash)],
                )
                .await?;
        }

        let code = input_value_by_name(&html, "hiddenMem")
            .ok_or_else(|| SyncError::protocol(op.as_str(), "no hiddenMem input on members page"))?;
        decode_membership(&code)
    }

    async fn set_membership(
        &mut self,
        vlan: VlanId,
        states: &[MembershipState],
    ) -> SyncResult<()> {
        let op = format!("set_membership({vlan})");
        let html = self.get_page(PAGE_VLAN_MEMBERS, &op).await?;
        let hash = self.page_hash(&html, &op)?;
        self.post_form(
            PAGE_VLAN_MEMBERS,
            &op,
            &[
                ("VLAN_ID", vlan.to_string()),
                ("VLAN_ID_HD", vlan.to_string()),
                ("hash", hash),
                ("hiddenMem", encode_membership(states)),
            ],
        )
        .await?;
        Ok(())
    }
}
