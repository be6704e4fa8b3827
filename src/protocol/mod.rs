//! API protocol: command table, wire codec and TCP rig client.
//!
//! The protocol is line-oriented: a command is sent as raw bytes with no
//! framing, and the reply is a single line terminated by a NUL byte (or
//! connection close). See [`codec`] for the reply grammar.

pub mod client;
pub mod codec;
pub mod escape;

pub use client::RigClient;
pub use codec::decode;

/// Polled fleet data: per command, the decoded reply of each rig that
/// answered it, in fleet order. Rigs that failed a command are absent.
pub type Report = std::collections::HashMap<Command, Vec<(String, crate::types::Record)>>;

/// Read-only API commands the monitor issues. All of these are idempotent
/// and safe to poll concurrently across rigs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    Version,
    Summary,
    Pools,
    Devs,
    Edevs,
    Notify,
    DevDetails,
    Stats,
    Estats,
    Config,
    Coin,
    UsbStats,
    /// Avalon controller expansion: sends `estats` on the wire but
    /// post-processes STATS sections into synthesized `MM<n>` sections.
    Mm,
}

impl Command {
    /// Command name as used in page specs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Summary => "summary",
            Command::Pools => "pools",
            Command::Devs => "devs",
            Command::Edevs => "edevs",
            Command::Notify => "notify",
            Command::DevDetails => "devdetails",
            Command::Stats => "stats",
            Command::Estats => "estats",
            Command::Config => "config",
            Command::Coin => "coin",
            Command::UsbStats => "usbstats",
            Command::Mm => "mm",
        }
    }

    /// Bytes actually written to the socket. `mm` is an alias that fetches
    /// `estats` and reshapes the reply.
    pub fn wire_bytes(self) -> &'static str {
        match self {
            Command::Mm => "estats",
            other => other.name(),
        }
    }

    /// Map a section base name from a page spec to the command that
    /// produces it. `DEVS` matches `GPU`, `PGA` and `ASC` replies so one
    /// table can mix device types.
    pub fn for_section(base: &str) -> Option<Command> {
        let cmd = match base {
            "RIGS" => Command::Version,
            "SUMMARY" => Command::Summary,
            "POOL" => Command::Pools,
            "DEVS" | "GPU" | "PGA" | "ASC" => Command::Devs,
            "EDEVS" => Command::Edevs,
            "NOTIFY" => Command::Notify,
            "DEVDETAILS" => Command::DevDetails,
            "STATS" => Command::Stats,
            "ESTATS" => Command::Estats,
            "CONFIG" => Command::Config,
            "COIN" => Command::Coin,
            "USBSTATS" => Command::UsbStats,
            "MM" => Command::Mm,
            _ => return None,
        };
        Some(cmd)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mm_sends_estats_on_the_wire() {
        assert_eq!(Command::Mm.wire_bytes(), "estats");
        assert_eq!(Command::Mm.name(), "mm");
    }

    #[test]
    fn device_type_bases_map_to_devs() {
        for base in ["DEVS", "GPU", "PGA", "ASC"] {
            assert_eq!(Command::for_section(base), Some(Command::Devs));
        }
        assert_eq!(Command::for_section("EDEVS"), Some(Command::Edevs));
        assert_eq!(Command::for_section("DATE"), None);
    }
}
