//! Error taxonomy.
//!
//! One rig's or one command's failure is always isolated: callers collect
//! these errors alongside whatever partial data exists, and nothing here
//! aborts sibling rigs, sibling commands, or other page sections.

use thiserror::Error;

/// Errors from one protocol round trip against one rig.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("sending '{command}' to {addr} timed out")]
    SendTimeout { addr: String, command: String },

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: String,
        source: std::io::Error,
    },

    #[error("reading '{command}' reply from {addr} timed out")]
    ReceiveTimeout { addr: String, command: String },

    #[error("read from {addr} failed: {source}")]
    Receive {
        addr: String,
        source: std::io::Error,
    },

    /// Recoverable: the rig answered with a zero-length reply. Callers keep
    /// going with an empty record.
    #[error("'{command}' returned nothing from {addr}")]
    EmptyResponse { addr: String, command: String },
}

/// Errors from the UDP rig-discovery probe.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Aborts only discovery itself; the caller gets an empty rig set.
    #[error("discovery listen socket bind on port {port} failed: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Page-configuration errors. The offending section is skipped and the
/// rest of the page still renders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("unknown section '{0}' in page '{1}'")]
    UnknownSection(String, String),

    #[error("no join strategy for section '{0}'")]
    UnknownJoinSpec(String),

    #[error("unknown page '{0}'")]
    UnknownPage(String),
}
