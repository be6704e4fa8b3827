//! UDP multicast rig discovery.
//!
//! Rig daemons listen on a shared multicast group. The probe datagram is
//! `"cgminer-<code>-<listenPort>"`; each daemon replies to the listen port
//! with `"cgm-<code>-<apiPort>[-<name>]"`. Discovery is the only component
//! with built-in retry, bounded by the configured retry count; its receive
//! loop is a cooperative non-blocking poll with a fixed sleep, bounded by a
//! wall-clock deadline.

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;

/// Protocol tag in the probe we send.
const PROBE_TAG: &str = "cgminer";
/// Protocol tag rigs reply with.
const REPLY_TAG: &str = "cgm";
/// Sleep between non-blocking polls of the listen socket.
const POLL_SLEEP: Duration = Duration::from_millis(100);
/// Replies are short: "cgm-CODE-PORT-NAME" padded with NULs.
const REPLY_BUF: usize = 64;

/// Probe for rigs and return their address strings (`"ip:port"` or
/// `"ip:port:name"`), deduplicated and sorted lexicographically.
///
/// A bind failure yields an empty set; discovery is never retried past
/// its configured rounds and never aborts the caller.
pub async fn discover(config: &DiscoveryConfig) -> Result<Vec<String>, DiscoveryError> {
    let listen = UdpSocket::bind(("0.0.0.0", config.listen_port))
        .await
        .map_err(|e| DiscoveryError::Bind {
            port: config.listen_port,
            source: e,
        })?;

    let mut rigs: Vec<String> = Vec::new();
    let timeout = Duration::from_secs_f64(config.timeout_secs);
    let mut rounds_left = config.retries + 1;

    while rounds_left > 0 {
        rounds_left -= 1;

        // Ephemeral socket per probe; closed as soon as the datagram is out.
        let probe = UdpSocket::bind("0.0.0.0:0").await?;
        let msg = format!("{PROBE_TAG}-{}-{}", config.code, config.listen_port);
        probe
            .send_to(msg.as_bytes(), (config.addr.as_str(), config.port))
            .await?;
        drop(probe);
        debug!(addr = %config.addr, port = config.port, "multicast probe sent");

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; REPLY_BUF];
        loop {
            match listen.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Some(rig) = parse_reply(&buf[..n], from.ip(), &config.code) {
                        if !rigs.contains(&rig) {
                            info!(rig = %rig, "rig discovered");
                            rigs.push(rig);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(POLL_SLEEP).await;
                }
                Err(e) => {
                    warn!(error = %e, "discovery receive error");
                    if Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(POLL_SLEEP).await;
                }
            }
        }

        if config.expect > 0 && rigs.len() >= config.expect {
            break;
        }
    }

    rigs.sort();
    Ok(rigs)
}

/// Parse one reply datagram. Tag and code must match exactly; trailing NUL
/// padding in the optional name is stripped.
fn parse_reply(datagram: &[u8], from: std::net::IpAddr, code: &str) -> Option<String> {
    let text = std::str::from_utf8(datagram).ok()?;
    let mut parts = text.splitn(4, '-');
    if parts.next()? != REPLY_TAG {
        return None;
    }
    if parts.next()? != code {
        return None;
    }
    let port: u16 = parts.next()?.trim_end_matches('\0').trim().parse().ok()?;
    let name = parts
        .next()
        .map(|n| n.replace('\0', ""))
        .unwrap_or_default();

    if name.is_empty() {
        Some(format!("{from}:{port}"))
    } else {
        Some(format!("{from}:{port}:{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));

    #[test]
    fn reply_without_name() {
        assert_eq!(
            parse_reply(b"cgm-FTW-4028", IP, "FTW"),
            Some("10.0.0.9:4028".to_string())
        );
    }

    #[test]
    fn reply_with_nul_padded_name() {
        assert_eq!(
            parse_reply(b"cgm-FTW-4028-shed\0\0\0", IP, "FTW"),
            Some("10.0.0.9:4028:shed".to_string())
        );
    }

    #[test]
    fn wrong_tag_or_code_rejected() {
        assert_eq!(parse_reply(b"cgminer-FTW-4028", IP, "FTW"), None);
        assert_eq!(parse_reply(b"cgm-XXX-4028", IP, "FTW"), None);
        assert_eq!(parse_reply(b"cgm-FTW-notaport", IP, "FTW"), None);
    }

    #[tokio::test]
    async fn duplicate_replies_add_one_entry() {
        // Point "multicast" at our own listen port so the probe itself is
        // ignored (wrong tag) and feed two identical replies by hand.
        let config = DiscoveryConfig {
            enabled: true,
            addr: "127.0.0.1".to_string(),
            port: 0,
            listen_port: 0,
            timeout_secs: 0.3,
            retries: 0,
            expect: 0,
            code: "FTW".to_string(),
        };
        // Bind the listen socket first on an ephemeral port, then run the
        // probe loop against it.
        let listen = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let listen_port = listen.local_addr().expect("addr").port();
        drop(listen);

        let config = DiscoveryConfig {
            listen_port,
            port: listen_port,
            ..config
        };

        let sender = tokio::spawn(async move {
            let sock = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = sock
                    .send_to(b"cgm-FTW-4028", ("127.0.0.1", listen_port))
                    .await;
            }
        });

        let rigs = discover(&config).await.expect("discover");
        sender.await.expect("sender");
        assert_eq!(rigs, vec!["127.0.0.1:4028".to_string()]);
    }

    #[tokio::test]
    async fn bind_conflict_reports_bind_failure() {
        let holder = UdpSocket::bind("0.0.0.0:0").await.expect("bind");
        let port = holder.local_addr().expect("addr").port();
        let config = DiscoveryConfig {
            listen_port: port,
            timeout_secs: 0.1,
            ..DiscoveryConfig::default()
        };
        let err = discover(&config).await.expect_err("should fail to bind");
        assert!(matches!(err, DiscoveryError::Bind { .. }));
    }
}
