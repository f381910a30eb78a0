//! vlansync-driver - concrete switch management drivers
//!
//! Two transports satisfy the [`vlansync_core::SwitchDriver`] contract:
//!
//! - [`HttpFormDriver`]: the HTML-forms admin UI of the web-managed
//!   E-series (cookie session, hidden form hash, challenge-response
//!   login)
//! - [`CliSessionDriver`]: the line-oriented CLI of the T-series
//!   (prompt-driven text session, paged tabular output)
//!
//! [`detect`] picks the variant from the device identity string;
//! [`connect`] establishes an authenticated session.

mod auth;
mod cli;
mod codec;
mod detect;
mod http;

pub use auth::{challenge_response, merge_password_nonce, SessionState, FACTORY_PASSWORD};
pub use cli::{CliSessionDriver, CLI_PORT};
pub use codec::{decode_membership, encode_membership};
pub use detect::{connect, detect, ConnectOptions, DetectedSwitch, SwitchConnection};
pub use http::HttpFormDriver;
