//! Fleet orchestration: bounded concurrent polling across rigs.
//!
//! Each rig gets one task that runs its commands sequentially; a semaphore
//! bounds how many rigs are in flight at once. A failed (rig, command)
//! pair becomes a [`PollError`] and never disturbs sibling rigs or the
//! rig's other commands. Mutating commands go through
//! [`RigClient::send_control`] one at a time and are never fanned out.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::discovery;
use crate::error::{PageError, ProtocolError};
use crate::page::{self, Page, PageOutput};
use crate::protocol::{Command, Report, RigClient};
use crate::types::{Record, ReportRow, RigAddress};

/// One failed (rig, command) pair, reported alongside partial data.
#[derive(Debug)]
pub struct PollError {
    pub rig: String,
    pub command: Command,
    pub error: ProtocolError,
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.rig, self.command, self.error)
    }
}

/// Everything one page run produced, data and failures side by side.
#[derive(Debug)]
pub struct PageRun {
    pub rows: Vec<ReportRow>,
    pub labels: HashMap<String, String>,
    pub page_errors: Vec<PageError>,
    pub poll_errors: Vec<PollError>,
}

/// The rig fleet and the client used to reach it.
pub struct Fleet {
    client: RigClient,
    rigs: Vec<RigAddress>,
    max_concurrent: usize,
}

impl Fleet {
    pub fn new(config: &MonitorConfig, rigs: Vec<RigAddress>) -> Self {
        Self {
            client: RigClient::new(&config.rigs),
            rigs,
            max_concurrent: config.rigs.max_concurrent_polls.max(1),
        }
    }

    pub fn rigs(&self) -> &[RigAddress] {
        &self.rigs
    }

    /// Poll every rig for every command. Results preserve the fleet's rig
    /// order per command; failed pairs are absent from the data and
    /// present in the error list.
    pub async fn poll(
        &self,
        commands: &BTreeSet<Command>,
    ) -> (Report, Vec<PollError>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (idx, rig) in self.rigs.iter().enumerate() {
            let rig = rig.clone();
            let client = self.client.clone();
            let commands: Vec<Command> = commands.iter().copied().collect();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let mut replies = Vec::with_capacity(commands.len());
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, replies);
                };
                for command in commands {
                    debug!(rig = %rig.display_id(), %command, "polling");
                    replies.push((command, client.call(&rig, command).await));
                }
                (idx, replies)
            });
        }

        // Reassemble in fleet order regardless of completion order.
        let mut per_rig: Vec<Option<Vec<(Command, Result<Record, ProtocolError>)>>> =
            (0..self.rigs.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, replies)) => per_rig[idx] = Some(replies),
                Err(e) => warn!(error = %e, "poll task failed"),
            }
        }

        let mut results: Report = HashMap::new();
        let mut errors = Vec::new();
        for (idx, replies) in per_rig.into_iter().enumerate() {
            let rig_id = self.rigs[idx].display_id();
            for (command, reply) in replies.into_iter().flatten() {
                match reply {
                    Ok(record) => results
                        .entry(command)
                        .or_default()
                        .push((rig_id.clone(), record)),
                    Err(error) => {
                        warn!(rig = %rig_id, %command, %error, "poll failed");
                        errors.push(PollError {
                            rig: rig_id.clone(),
                            command,
                            error,
                        });
                    }
                }
            }
        }
        (results, errors)
    }

    /// Send one mutating command to one rig. No retry, no fan-out.
    pub async fn control(
        &self,
        rig: &RigAddress,
        raw_command: &str,
    ) -> Result<Record, ProtocolError> {
        info!(rig = %rig.display_id(), command = raw_command, "control command");
        self.client.send_control(rig, raw_command).await
    }
}

/// The rig list for this run: the discovered set when discovery is
/// enabled and found anything, otherwise the configured static list.
pub async fn resolve_rigs(config: &MonitorConfig) -> Vec<RigAddress> {
    if config.discovery.enabled {
        match discovery::discover(&config.discovery).await {
            Ok(found) if !found.is_empty() => {
                info!(count = found.len(), "using discovered rigs");
                return found.iter().map(|s| RigAddress::parse(s)).collect();
            }
            Ok(_) => warn!("discovery found no rigs, using configured list"),
            Err(e) => warn!(error = %e, "discovery failed, using configured list"),
        }
    }
    config.rigs.list.iter().map(|s| RigAddress::parse(s)).collect()
}

/// Resolve a page, poll the fleet for what it needs and assemble the rows.
pub async fn run_page(
    name: &str,
    config: &MonitorConfig,
    rigs: Vec<RigAddress>,
) -> Result<PageRun, PageError> {
    let page = Page::resolve(name, &config.pages, config.report.allow_gen)?;
    let (commands, mut page_errors) = page.plan_commands();

    let fleet = Fleet::new(config, rigs);
    let (results, poll_errors) = fleet.poll(&commands).await;

    let PageOutput {
        rows,
        labels,
        errors,
    } = page::assemble(&page, &results, &config.report, config.report.allow_gen);
    page_errors.extend(errors);

    Ok(PageRun {
        rows,
        labels,
        page_errors,
        poll_errors,
    })
}

/// The single-rig overview: `devs`, `summary`, `pools`, optionally
/// `notify`, then `config`, each emitted as its own row group.
pub async fn run_rig_overview(config: &MonitorConfig, rig: &RigAddress) -> PageRun {
    let client = RigClient::new(&config.rigs);
    let rig_id = rig.display_id();

    let mut rows = Vec::new();
    let mut poll_errors = Vec::new();
    for command in page::overview_commands(&config.report) {
        match client.call(rig, command).await {
            Ok(record) => {
                rows.extend(page::assemble_overview(&rig_id, command, &record, &config.report));
            }
            Err(error) => {
                warn!(rig = %rig_id, %command, %error, "overview poll failed");
                poll_errors.push(PollError {
                    rig: rig_id.clone(),
                    command,
                    error,
                });
            }
        }
    }

    PageRun {
        rows,
        labels: HashMap::new(),
        page_errors: Vec::new(),
        poll_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept connections forever, answering every request with `reply`
    /// NUL-terminated. Returns the bound port.
    async fn reply_server(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.write_all(&[0]).await;
                });
            }
        });
        port
    }

    fn fleet_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.rigs.send_timeout_secs = 2;
        config.rigs.recv_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn poll_preserves_rig_order() {
        let port_a = reply_server("STATUS=S|SUMMARY,Elapsed=1,MHS av=10|").await;
        let port_b = reply_server("STATUS=S|SUMMARY,Elapsed=2,MHS av=20|").await;

        let rigs = vec![
            RigAddress::parse(&format!("127.0.0.1:{port_a}:a")),
            RigAddress::parse(&format!("127.0.0.1:{port_b}:b")),
        ];
        let fleet = Fleet::new(&fleet_config(), rigs);
        let (results, errors) = fleet.poll(&BTreeSet::from([Command::Summary])).await;

        assert!(errors.is_empty());
        let summary = &results[&Command::Summary];
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].0, "a");
        assert_eq!(summary[1].0, "b");
        assert_eq!(
            summary[1].1.get("SUMMARY").and_then(|s| s.get("MHS av")),
            Some("20")
        );
    }

    #[tokio::test]
    async fn one_dead_rig_does_not_stop_the_rest() {
        let port_a = reply_server("STATUS=S|SUMMARY,Elapsed=1|").await;
        // Nothing listens on the second port.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_b = dead.local_addr().unwrap().port();
        drop(dead);

        let rigs = vec![
            RigAddress::parse(&format!("127.0.0.1:{port_a}:alive")),
            RigAddress::parse(&format!("127.0.0.1:{port_b}:dead")),
        ];
        let fleet = Fleet::new(&fleet_config(), rigs);
        let (results, errors) = fleet.poll(&BTreeSet::from([Command::Summary])).await;

        assert_eq!(results[&Command::Summary].len(), 1);
        assert_eq!(results[&Command::Summary][0].0, "alive");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rig, "dead");
        assert_eq!(errors[0].command, Command::Summary);
    }

    #[tokio::test]
    async fn run_page_assembles_rows_from_live_rigs() {
        let port = reply_server("STATUS=S,When=1|SUMMARY,Elapsed=100,MHS av=10|").await;
        let mut config = fleet_config();
        config.pages.insert(
            "tiny".to_string(),
            crate::page::PageDef {
                sections: vec![crate::page::SectionDef {
                    reference: "SUMMARY".to_string(),
                    fields: vec!["Elapsed".to_string(), "MHS av".to_string()],
                }],
                ..crate::page::PageDef::default()
            },
        );

        let rigs = vec![RigAddress::parse(&format!("127.0.0.1:{port}:r0"))];
        let run = run_page("tiny", &config, rigs).await.unwrap();

        assert!(run.page_errors.is_empty());
        assert!(run.poll_errors.is_empty());
        assert_eq!(run.rows.len(), 1);
        assert_eq!(run.rows[0].rig, "r0");
        assert_eq!(
            run.rows[0].values[1],
            ("MHS av".to_string(), Some("10".to_string()))
        );
    }

    #[tokio::test]
    async fn run_page_unknown_name_errors() {
        let config = MonitorConfig::default();
        let err = run_page("nope", &config, Vec::new()).await.unwrap_err();
        assert_eq!(err, PageError::UnknownPage("nope".to_string()));
    }
}
