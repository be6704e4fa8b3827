//! rigview - mining-rig fleet monitor
//!
//! # Usage
//!
//! ```bash
//! # Run the built-in mobile page against the configured rigs
//! rigview
//!
//! # A specific page against explicit rigs
//! rigview --page stats --rig 10.0.0.5 --rig 10.0.0.6:4029:attic
//!
//! # Discover rigs on the local network first
//! rigview --discover --page avalon
//!
//! # Detailed overview of one rig
//! rigview --overview 10.0.0.5
//!
//! # Rows as JSON lines for another tool to consume
//! rigview --page stats --json
//! ```
//!
//! # Environment Variables
//!
//! - `RIGVIEW_CONFIG`: path to the TOML config file
//! - `RUST_LOG`: logging level (default: info)

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;

use rigview::poller::{self, PageRun};
use rigview::types::base_name;
use rigview::{page, MonitorConfig, ReportRow, RigAddress};

#[derive(Parser, Debug)]
#[command(name = "rigview")]
#[command(about = "Fleet monitor for mining-rig daemons")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (otherwise RIGVIEW_CONFIG, then
    /// ./rigview.toml, then built-in defaults)
    #[arg(short, long)]
    config: Option<String>,

    /// Page to run
    #[arg(short, long, default_value = "mobile")]
    page: String,

    /// Rig address as host[:port[:name]]; repeat for several.
    /// Overrides the configured rig list.
    #[arg(short, long = "rig", value_name = "RIG")]
    rigs: Vec<String>,

    /// Probe for rigs over UDP multicast even when the config disables it
    #[arg(long)]
    discover: bool,

    /// Detailed overview of one rig instead of a fleet page
    #[arg(long, value_name = "RIG")]
    overview: Option<String>,

    /// Send one raw control command (e.g. 'restart') to the rig given
    /// with --rig, then exit
    #[arg(long, value_name = "COMMAND")]
    send: Option<String>,

    /// Print known page names and exit
    #[arg(long)]
    list_pages: bool,

    /// Emit rows as JSON lines instead of a text table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load_from_path(Path::new(path)),
        None => MonitorConfig::load(),
    };
    if args.discover {
        config.discovery.enabled = true;
    }
    if !args.rigs.is_empty() {
        config.rigs.list = args.rigs.clone();
    }

    if args.list_pages {
        for name in page::builtin_names() {
            println!("{name}");
        }
        for name in config.pages.keys() {
            println!("{name}");
        }
        return Ok(());
    }

    if let Some(raw) = &args.send {
        return send_control(&config, raw).await;
    }

    if let Some(target) = &args.overview {
        let rig = RigAddress::parse(target);
        let run = poller::run_rig_overview(&config, &rig).await;
        render(&run, args.json)?;
        return Ok(());
    }

    let rigs = poller::resolve_rigs(&config).await;
    if rigs.is_empty() {
        bail!("no rigs configured or discovered");
    }

    let run = poller::run_page(&args.page, &config, rigs)
        .await
        .with_context(|| format!("running page '{}'", args.page))?;
    render(&run, args.json)?;
    Ok(())
}

/// One control command against exactly one rig.
async fn send_control(config: &MonitorConfig, raw: &str) -> Result<()> {
    if config.rigs.list.len() != 1 {
        bail!("--send needs exactly one rig (use --rig)");
    }
    let rig = RigAddress::parse(&config.rigs.list[0]);
    let fleet = rigview::Fleet::new(config, vec![rig.clone()]);
    let reply = fleet
        .control(&rig, raw)
        .await
        .with_context(|| format!("control '{raw}' against {}", rig.display_id()))?;

    match reply.status() {
        Some(status) => println!(
            "{}: {}",
            status.get("STATUS").unwrap_or("?"),
            status.get("Msg").unwrap_or("")
        ),
        None => println!("no status in reply"),
    }
    Ok(())
}

fn render(run: &PageRun, json: bool) -> Result<()> {
    if json {
        for row in &run.rows {
            println!("{}", serde_json::to_string(row)?);
        }
    } else {
        render_table(run);
    }

    for err in &run.page_errors {
        warn!(error = %err, "page error");
    }
    for err in &run.poll_errors {
        warn!(error = %err, "poll error");
    }
    Ok(())
}

/// Aligned text tables, one per run of rows sharing a field layout.
/// Total rows share their section's layout and land in the same table.
fn render_table(run: &PageRun) {
    let mut blocks: Vec<(Vec<String>, Vec<&ReportRow>)> = Vec::new();
    for row in &run.rows {
        let keys: Vec<String> = row.values.iter().map(|(k, _)| k.clone()).collect();
        match blocks.last_mut() {
            Some((last_keys, rows)) if *last_keys == keys => rows.push(row),
            _ => blocks.push((keys, vec![row])),
        }
    }

    for (keys, rows) in blocks {
        let header: Vec<String> = {
            // Labels are keyed by the page's section reference; take them
            // from the first data row of the block.
            let reference = rows
                .iter()
                .find(|r| r.section != "total")
                .map(|r| base_name(&r.section))
                .unwrap_or_default();
            keys.iter()
                .map(|k| {
                    run.labels
                        .get(&format!("{reference}.{k}"))
                        .cloned()
                        .unwrap_or_else(|| k.clone())
                })
                .collect()
        };

        let mut widths: Vec<usize> = header.iter().map(String::len).collect();
        let mut rig_width = "Rig".len();
        for row in &rows {
            rig_width = rig_width.max(row.rig.len());
            for (i, (_, value)) in row.values.iter().enumerate() {
                if let Some(v) = value {
                    widths[i] = widths[i].max(v.len());
                }
            }
        }

        println!();
        print!("{:<rig_width$}", "Rig");
        for (name, &width) in header.iter().zip(&widths) {
            print!("  {name:>width$}");
        }
        println!();
        for row in rows {
            print!("{:<rig_width$}", row.rig);
            for ((_, value), &width) in row.values.iter().zip(&widths) {
                print!("  {:>width$}", value.as_deref().unwrap_or("-"));
            }
            println!();
        }
    }
}
