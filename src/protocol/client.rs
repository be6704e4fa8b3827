//! TCP rig client: one blocking round trip per call.
//!
//! Every call opens a fresh connection, writes the raw command bytes with
//! no framing, then reads until a NUL byte or end-of-stream. Send and
//! receive legs are bound by independent timeouts. Failures are reported
//! per (rig, command) pair and never retried here: retry of a mutating
//! command has observable side effects on the rig.

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{codec, Command};
use crate::config::RigConfig;
use crate::error::ProtocolError;
use crate::types::{Record, RigAddress};

/// Stateless API client for the whole fleet. Cheap to clone; carries only
/// the immutable per-call settings.
#[derive(Debug, Clone)]
pub struct RigClient {
    default_port: u16,
    send_timeout: Duration,
    recv_timeout: Duration,
    hide_fields: HashSet<String>,
}

impl RigClient {
    pub fn new(config: &RigConfig) -> Self {
        Self {
            default_port: config.default_port,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            recv_timeout: Duration::from_secs(config.recv_timeout_secs),
            hide_fields: config.hide_fields.clone(),
        }
    }

    /// Issue one read-only command and decode the reply.
    pub async fn call(&self, rig: &RigAddress, command: Command) -> Result<Record, ProtocolError> {
        let addr = rig.socket_addr(self.default_port);
        let line = self
            .roundtrip(&addr, command.wire_bytes(), command.name())
            .await?;

        if line.is_empty() {
            warn!(rig = %rig.display_id(), command = %command, "empty reply");
            return Err(ProtocolError::EmptyResponse {
                addr,
                command: command.name().to_string(),
            });
        }

        debug!(rig = %rig.display_id(), command = %command, bytes = line.len(), "reply received");
        Ok(codec::decode(command, &line, &self.hide_fields))
    }

    /// Send a single-shot control command (`restart`, `addpool|…`,
    /// `gpuintensity|…`). Never retried, and callers must not issue the
    /// same control concurrently for one rig.
    pub async fn send_control(
        &self,
        rig: &RigAddress,
        raw_command: &str,
    ) -> Result<Record, ProtocolError> {
        let addr = rig.socket_addr(self.default_port);
        let line = self.roundtrip(&addr, raw_command, raw_command).await?;
        if line.is_empty() {
            return Err(ProtocolError::EmptyResponse {
                addr,
                command: raw_command.to_string(),
            });
        }
        // Control replies carry only STATUS; decode with the generic rules.
        Ok(codec::decode(Command::Version, &line, &self.hide_fields))
    }

    /// connect → send → read-until-NUL/EOF → close.
    async fn roundtrip(
        &self,
        addr: &str,
        wire: &str,
        command: &str,
    ) -> Result<String, ProtocolError> {
        let stream = tokio::time::timeout(self.send_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectTimeout {
                addr: addr.to_string(),
            })?
            .map_err(|e| ProtocolError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;

        // Keepalive mirrors what we set on long-lived feeds; harmless on a
        // short round trip and catches half-open peers during slow reads.
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);

        let mut stream = stream;
        tokio::time::timeout(self.send_timeout, stream.write_all(wire.as_bytes()))
            .await
            .map_err(|_| ProtocolError::SendTimeout {
                addr: addr.to_string(),
                command: command.to_string(),
            })?
            .map_err(|e| ProtocolError::Send {
                addr: addr.to_string(),
                source: e,
            })?;

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            let byte = match tokio::time::timeout(self.recv_timeout, reader.read_u8()).await {
                Ok(Ok(b)) => b,
                // EOF ends the reply just like the NUL terminator.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Ok(Err(e)) => {
                    return Err(ProtocolError::Receive {
                        addr: addr.to_string(),
                        source: e,
                    })
                }
                Err(_) => {
                    return Err(ProtocolError::ReceiveTimeout {
                        addr: addr.to_string(),
                        command: command.to_string(),
                    })
                }
            };
            if byte == 0 {
                break;
            }
            line.push(byte);
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}
