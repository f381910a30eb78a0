//! Error types for vlansync operations.
//!
//! All errors implement `std::error::Error` via `thiserror`. The
//! reconciliation engine aborts on the first error it sees; nothing
//! here is retried implicitly.

use thiserror::Error;

/// Result type alias for vlansync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while validating, diffing, or syncing a VLAN
/// configuration.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Desired configuration violates a structural invariant.
    /// Raised before any device contact, never retried.
    #[error("Invalid configuration: port {port} has PVID {vlan} but is excluded from that VLAN")]
    Validation {
        /// The offending port index.
        port: u16,
        /// The PVID VLAN the port is not a member of.
        vlan: u16,
    },

    /// Desired configuration is malformed in a way unrelated to the
    /// PVID-membership invariant (empty/duplicate ports, missing pvid,
    /// membership vector length mismatch).
    #[error("Invalid configuration: {message}")]
    Malformed {
        /// Description of the structural problem.
        message: String,
    },

    /// Two configs with different port lists were diffed.
    #[error("Cannot diff configs with different port lists")]
    IncompatiblePorts,

    /// Credentials rejected by the device.
    #[error("Authentication failed for {host}: {message}")]
    Authentication {
        /// The device host.
        host: String,
        /// Device-supplied reason, if any.
        message: String,
    },

    /// A device response did not match the shape the driver expected.
    /// Usually stale assumptions about the firmware; fatal.
    #[error("Unexpected device response while {context}: {message}")]
    Protocol {
        /// What the driver was doing.
        context: String,
        /// What was wrong with the response.
        message: String,
    },

    /// The device returned an explicit error for a requested mutation.
    #[error("Device rejected {operation}: {message}")]
    Rejected {
        /// The mutation that was rejected.
        operation: String,
        /// The device's error message.
        message: String,
    },

    /// Connection-level failure (refused, reset, timed out).
    #[error("Transport error talking to {host}: {message}")]
    Transport {
        /// The device host.
        host: String,
        /// Description of the failure.
        message: String,
    },

    /// No known driver variant matches the device's identity string.
    #[error("Unknown switch type for {host}: {identity}")]
    Detection {
        /// The device host.
        host: String,
        /// The identity string (or response excerpt) that failed to match.
        identity: String,
    },
}

impl SyncError {
    /// Creates a malformed-config error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn authentication(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates a device-rejection error.
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a detection error.
    pub fn detection(host: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::Detection {
            host: host.into(),
            identity: identity.into(),
        }
    }
}
