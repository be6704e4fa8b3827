//! Page specifications and report assembly.
//!
//! A page is an ordered list of section references, each with the fields to
//! display. A reference is either a plain section base (`SUMMARY`, `POOL`)
//! or a join of two (`DEVS+NOTIFY`). Four system pages mirror the classic
//! monitor layouts; user pages come from the `[pages]` table of the config
//! file and override system pages of the same name.
//!
//! Field entries support `Field=Label` display renames (collected into a
//! label map for the renderer), `*` (every field observed in the data) and
//! `#` (a per-rig row counter). Derived fields may carry a `||` fallback:
//! `GEN.THS av=TH/s||MHS av` collapses to `MHS av` when derived fields are
//! disabled, and to `GEN.THS av=TH/s` when they are enabled.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ReportConfig;
use crate::error::PageError;
use crate::protocol::{Command, Report};
use crate::query::{self, pipeline::PipelineOutput, ExtSpec};
use crate::types::{base_name, Record, ReportRow, TOTAL_RIG};
use crate::{join, query::pipeline::GenSpec};

/// A page as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageDef {
    /// Ordered section references with their display fields.
    #[serde(default)]
    pub sections: Vec<SectionDef>,

    /// Summable fields per section reference; only these contribute to
    /// total rows (`#` always counts).
    #[serde(default)]
    pub sum: HashMap<String, Vec<String>>,

    /// Query-pipeline extensions per section reference.
    #[serde(default)]
    pub ext: HashMap<String, ExtSpec>,
}

/// One section reference within a [`PageDef`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionDef {
    #[serde(rename = "ref")]
    pub reference: String,

    #[serde(default)]
    pub fields: Vec<String>,
}

/// A resolved, degen-processed page ready to run.
#[derive(Debug, Clone)]
pub struct Page {
    pub name: String,
    /// Section reference → field names, labels already stripped.
    pub sections: Vec<(String, Vec<String>)>,
    /// Summable fields per section reference.
    pub sum: HashMap<String, HashSet<String>>,
    /// Pipeline extensions per section reference.
    pub ext: HashMap<String, ExtSpec>,
    /// `"<reference>.<field>"` → display label.
    pub labels: HashMap<String, String>,
}

/// Everything one page run produced: the rows in display order, the label
/// map for headers, and any per-section errors (the rest of the page still
/// rendered).
#[derive(Debug)]
pub struct PageOutput {
    pub rows: Vec<ReportRow>,
    pub labels: HashMap<String, String>,
    pub errors: Vec<PageError>,
}

impl Page {
    /// Resolve a page by name: user pages first, then the built-in system
    /// pages. Names are matched case-insensitively.
    pub fn resolve(
        name: &str,
        user_pages: &HashMap<String, PageDef>,
        allow_gen: bool,
    ) -> Result<Page, PageError> {
        let lower = name.to_ascii_lowercase();
        let def = user_pages
            .iter()
            .find(|(n, _)| n.to_ascii_lowercase() == lower)
            .map(|(_, d)| d.clone())
            .or_else(|| builtin(&lower));

        match def {
            Some(def) => Ok(Page::prepare(name, def, allow_gen)),
            None => Err(PageError::UnknownPage(name.to_string())),
        }
    }

    /// Apply the degen pass and split `Field=Label` renames out of the
    /// field lists.
    fn prepare(name: &str, mut def: PageDef, allow_gen: bool) -> Page {
        for section in &mut def.sections {
            degen_fields(&mut section.fields, allow_gen);
        }
        for ext in def.ext.values_mut() {
            degen_fields(&mut ext.group, allow_gen);
        }

        let mut labels = HashMap::new();
        let mut sections = Vec::with_capacity(def.sections.len());
        for section in def.sections {
            let mut fields = Vec::with_capacity(section.fields.len());
            for field in section.fields {
                match field.split_once('=') {
                    Some((fld, label)) => {
                        if !label.is_empty() {
                            labels.insert(
                                format!("{}.{}", section.reference, fld),
                                label.to_string(),
                            );
                        }
                        fields.push(fld.to_string());
                    }
                    None => fields.push(field),
                }
            }
            sections.push((section.reference, fields));
        }

        let sum = def
            .sum
            .into_iter()
            .map(|(sec, fields)| (sec, fields.into_iter().collect()))
            .collect();

        Page {
            name: name.to_string(),
            sections,
            sum,
            ext: def.ext,
            labels,
        }
    }

    /// Which API commands this page needs, plus an error for every section
    /// reference no command produces.
    pub fn plan_commands(&self) -> (BTreeSet<Command>, Vec<PageError>) {
        let mut commands = BTreeSet::new();
        let mut errors = Vec::new();
        for (reference, _) in &self.sections {
            match section_commands(reference) {
                Ok(cmds) => commands.extend(cmds),
                Err(_) => errors.push(PageError::UnknownSection(
                    reference.clone(),
                    self.name.clone(),
                )),
            }
        }
        (commands, errors)
    }
}

/// Collapse `BGEN.`/`GEN.` fields with a `||` fallback. With derived fields
/// enabled the derived half wins; disabled, the fallback wins and entries
/// without one are dropped.
fn degen_fields(fields: &mut Vec<String>, allow_gen: bool) {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields.drain(..) {
        if !field.starts_with("GEN.") && !field.starts_with("BGEN.") {
            out.push(field);
            continue;
        }
        match field.split_once("||") {
            Some((derived, fallback)) => {
                if allow_gen {
                    out.push(derived.to_string());
                } else {
                    out.push(fallback.to_string());
                }
            }
            None => {
                if allow_gen {
                    out.push(field);
                }
            }
        }
    }
    *fields = out;
}

/// Commands a section reference needs, one per `+` part.
fn section_commands(reference: &str) -> Result<Vec<Command>, PageError> {
    base_name(reference)
        .split('+')
        .map(|part| {
            Command::for_section(part)
                .ok_or_else(|| PageError::UnknownJoinSpec(reference.to_string()))
        })
        .collect()
}

/// Assemble report rows from already-polled data.
///
/// `results` maps each command to per-rig records in rig order; rigs that
/// failed a command are simply absent from that command's list. Every
/// section reference is processed independently and an error in one only
/// skips that one.
pub fn assemble(
    page: &Page,
    results: &Report,
    report: &ReportConfig,
    allow_gen: bool,
) -> PageOutput {
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (reference, fields) in &page.sections {
        let bases: Vec<String> = base_name(reference)
            .split('+')
            .map(str::to_string)
            .collect();

        let commands = match section_commands(reference) {
            Ok(cmds) => cmds,
            Err(_) => {
                errors.push(PageError::UnknownSection(
                    reference.clone(),
                    page.name.clone(),
                ));
                continue;
            }
        };

        if bases[0] == "RIGS" {
            emit_rigs(results.get(&Command::Version), &mut rows);
            continue;
        }

        // Per-rig input records, joined when the reference asks for it.
        let rig_results = if commands.len() == 2 {
            match joined_results(
                &bases[0],
                &bases[1],
                results.get(&commands[0]),
                results.get(&commands[1]),
            ) {
                Ok(joined) => joined,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            }
        } else {
            results.get(&commands[0]).cloned().unwrap_or_default()
        };

        if rig_results.is_empty() {
            debug!(section = %reference, "no data for section");
            continue;
        }

        let ext = page.ext.get(reference).cloned().unwrap_or_default();
        let PipelineOutput {
            results: rig_results,
            added_fields,
        } = query::run(reference, &ext, rig_results, allow_gen);

        // Derived columns display even when the field list omits them.
        let mut fields = fields.clone();
        for added in added_fields {
            if !fields.iter().any(|f| *f == added) {
                fields.push(added);
            }
        }

        let show = displayed_fields(reference, &fields, &rig_results);
        if show.is_empty() {
            continue;
        }

        emit_section(
            reference,
            &show,
            &rig_results,
            page.sum.get(reference),
            report,
            &mut rows,
        );
    }

    PageOutput {
        rows,
        labels: page.labels.clone(),
        errors,
    }
}

/// One row per rig from the `version` reply, all fields shown.
fn emit_rigs(version: Option<&Vec<(String, Record)>>, rows: &mut Vec<ReportRow>) {
    let Some(version) = version else {
        return;
    };
    for (rig, record) in version {
        for (name, section) in record.iter() {
            if name == crate::types::STATUS {
                continue;
            }
            rows.push(ReportRow {
                rig: rig.clone(),
                section: name.to_string(),
                values: section
                    .iter()
                    .map(|(k, v)| (k.to_string(), Some(v.to_string())))
                    .collect(),
            });
        }
    }
}

/// Join left and right command results rig by rig. A rig missing either
/// side contributes nothing.
fn joined_results(
    left_base: &str,
    right_base: &str,
    left: Option<&Vec<(String, Record)>>,
    right: Option<&Vec<(String, Record)>>,
) -> Result<Vec<(String, Record)>, PageError> {
    let (Some(left), Some(right)) = (left, right) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (rig, left_record) in left {
        let Some((_, right_record)) = right.iter().find(|(r, _)| r == rig) else {
            continue;
        };
        let joined = join::apply(left_base, right_base, left_record, right_record)?;
        out.push((rig.clone(), joined));
    }
    Ok(out)
}

/// The fields actually shown: page fields present somewhere in the data,
/// `*` expanded to every observed field, `#` kept as-is. Order follows the
/// page; expanded fields keep data order.
fn displayed_fields(
    reference: &str,
    fields: &[String],
    rig_results: &[(String, Record)],
) -> Vec<String> {
    let mut show: Vec<String> = Vec::new();
    let mut push_unique = |show: &mut Vec<String>, field: &str| {
        if !show.iter().any(|f| f == field) {
            show.push(field.to_string());
        }
    };

    for field in fields {
        if field == "#" {
            push_unique(&mut show, field);
            continue;
        }
        for (_, record) in rig_results {
            for (name, section) in record.iter() {
                if !query::sec_match(reference, name) {
                    continue;
                }
                if field == "*" {
                    for (f, _) in section.iter() {
                        push_unique(&mut show, f);
                    }
                } else if section.contains(field) {
                    push_unique(&mut show, field);
                }
            }
        }
    }
    show
}

/// Emit the data rows for one section reference, per-rig total rows where
/// they apply, and the grand total across rigs.
fn emit_section(
    reference: &str,
    show: &[String],
    rig_results: &[(String, Record)],
    sum: Option<&HashSet<String>>,
    report: &ReportConfig,
    rows: &mut Vec<ReportRow>,
) {
    let summable = |field: &str| sum.is_some_and(|s| s.contains(field));

    let mut grand: HashMap<String, f64> = HashMap::new();
    let mut grand_rows = 0usize;

    for (rig, record) in rig_results {
        let mut rig_sums: HashMap<String, f64> = HashMap::new();
        let mut rn = 0usize;

        for (name, section) in record.iter() {
            if !query::sec_match(reference, name) {
                continue;
            }
            rn += 1;
            let mut values = Vec::with_capacity(show.len());
            for field in show {
                if field == "#" {
                    values.push((field.clone(), Some(rn.to_string())));
                    continue;
                }
                let value = section.get(field);
                if let Some(v) = value {
                    if summable(field) {
                        let num = v.trim().parse::<f64>().unwrap_or(0.0);
                        *rig_sums.entry(field.clone()).or_insert(0.0) += num;
                        *grand.entry(field.clone()).or_insert(0.0) += num;
                    }
                }
                values.push((field.clone(), value.map(str::to_string)));
            }
            rows.push(ReportRow {
                rig: rig.clone(),
                section: name.to_string(),
                values,
            });
        }

        grand_rows += rn;

        // Grouped output collapses to one pseudo-rig with an empty id;
        // its per-rig total would just repeat the grand total.
        let want_total = report.rig_totals
            && !rig.is_empty()
            && (!rig_sums.is_empty() || show.iter().any(|f| f == "#"))
            && (rn > report.total_min_rows || report.force_totals);
        if want_total {
            rows.push(total_row(rig, show, &rig_sums, rn));
        }
    }

    if grand_rows > 0 && (!grand.is_empty() || show.iter().any(|f| f == "#")) {
        rows.push(total_row(TOTAL_RIG, show, &grand, grand_rows));
    }
}

fn total_row(rig: &str, show: &[String], sums: &HashMap<String, f64>, count: usize) -> ReportRow {
    ReportRow {
        rig: rig.to_string(),
        section: "total".to_string(),
        values: show
            .iter()
            .map(|field| {
                let value = if field == "#" {
                    Some(count.to_string())
                } else {
                    sums.get(field).map(|v| query::expr::format_number(*v))
                };
                (field.clone(), value)
            })
            .collect(),
    }
}

/// Commands the single-rig overview polls, in display order.
pub fn overview_commands(report: &ReportConfig) -> Vec<Command> {
    let mut cmds = vec![Command::Devs, Command::Summary, Command::Pools];
    if report.notify {
        cmds.push(Command::Notify);
    }
    cmds.push(Command::Config);
    cmds
}

/// Summable fields of one overview command. `notify` sums its counter
/// fields, which all start with `*`.
fn overview_summable(command: Command, field: &str) -> bool {
    const DEVS: &[&str] = &[
        "MHS av",
        "MHS 5s",
        "MHS 1m",
        "MHS 5m",
        "MHS 15m",
        "Accepted",
        "Rejected",
        "Hardware Errors",
        "Utility",
        "Total MH",
        "Diff1 Shares",
        "Diff1 Work",
        "Difficulty Accepted",
        "Difficulty Rejected",
    ];
    const POOLS: &[&str] = &[
        "Getworks",
        "Accepted",
        "Rejected",
        "Discarded",
        "Stale",
        "Get Failures",
        "Remote Failures",
        "Diff1 Shares",
        "Diff1 Work",
        "Difficulty Accepted",
        "Difficulty Rejected",
        "Difficulty Stale",
    ];
    match command {
        Command::Devs => DEVS.contains(&field),
        Command::Pools => POOLS.contains(&field),
        Command::Notify => field.starts_with('*'),
        _ => false,
    }
}

/// Rows for one command of the single-rig overview: every data section
/// with all its fields, then a total row over the command's summable
/// fields when there are enough rows (or totals are forced).
pub fn assemble_overview(
    rig: &str,
    command: Command,
    record: &Record,
    report: &ReportConfig,
) -> Vec<ReportRow> {
    let mut rows = Vec::new();
    let mut sums: Vec<(String, f64)> = Vec::new();
    let mut data_rows = 0usize;

    for (name, section) in record.iter() {
        if name == crate::types::STATUS {
            continue;
        }
        data_rows += 1;
        let mut values = Vec::with_capacity(section.len());
        for (field, value) in section.iter() {
            if overview_summable(command, field) {
                let num = value.trim().parse::<f64>().unwrap_or(0.0);
                match sums.iter_mut().find(|(f, _)| f == field) {
                    Some((_, total)) => *total += num,
                    None => sums.push((field.to_string(), num)),
                }
            }
            values.push((field.to_string(), Some(value.to_string())));
        }
        rows.push(ReportRow {
            rig: rig.to_string(),
            section: name.to_string(),
            values,
        });
    }

    let want_total = report.rig_totals
        && !sums.is_empty()
        && (data_rows > report.total_min_rows || report.force_totals);
    if want_total {
        rows.push(ReportRow {
            rig: rig.to_string(),
            section: "total".to_string(),
            values: sums
                .into_iter()
                .map(|(f, v)| (f, Some(query::expr::format_number(v))))
                .collect(),
        });
    }
    rows
}

fn fields(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn section(reference: &str, list: &[&str]) -> SectionDef {
    SectionDef {
        reference: reference.to_string(),
        fields: fields(list),
    }
}

fn gens(list: &[(&str, &str)]) -> Vec<GenSpec> {
    list.iter()
        .map(|(name, formula)| GenSpec {
            name: name.to_string(),
            formula: formula.to_string(),
        })
        .collect()
}

fn calcs(list: &[(&str, &str)]) -> Vec<query::pipeline::CalcSpec> {
    list.iter()
        .map(|(field, func)| query::pipeline::CalcSpec {
            field: field.to_string(),
            func: func.to_string(),
        })
        .collect()
}

/// Built-in system pages, keyed by lowercase name.
fn builtin(name: &str) -> Option<PageDef> {
    match name {
        "mobile" => Some(mobile_page()),
        "stats" => Some(stats_page()),
        "avalon" => Some(avalon_page()),
        "s9" => Some(s9_page()),
        _ => None,
    }
}

/// Every built-in page name, for `--list-pages` style output.
pub fn builtin_names() -> &'static [&'static str] {
    &["mobile", "stats", "avalon", "s9"]
}

fn mobile_page() -> PageDef {
    PageDef {
        sections: vec![
            section("RIGS", &[]),
            section(
                "SUMMARY",
                &[
                    "Elapsed",
                    "MHS av",
                    "MHS 5m",
                    "Found Blocks=Blks",
                    "Difficulty Accepted=DiffA",
                    "Difficulty Rejected=DiffR",
                    "Hardware Errors=HW",
                    "Work Utility=WU",
                ],
            ),
            section(
                "DEVS+NOTIFY",
                &[
                    "DEVS.Name=Name",
                    "DEVS.ID=ID",
                    "DEVS.Status=Status",
                    "DEVS.Temperature=Temp",
                    "DEVS.MHS av=MHS av",
                    "DEVS.MHS 5m=MHS 5m",
                    "DEVS.Difficulty Accepted=DiffA",
                    "DEVS.Difficulty Rejected=DiffR",
                    "DEVS.Work Utility=WU",
                    "NOTIFY.Last Not Well=Not Well",
                ],
            ),
            section(
                "POOL",
                &[
                    "POOL",
                    "Status",
                    "Difficulty Accepted=DiffA",
                    "Difficulty Rejected=DiffR",
                    "Last Share Time=LST",
                ],
            ),
        ],
        sum: HashMap::from([
            (
                "SUMMARY".to_string(),
                fields(&[
                    "MHS av",
                    "MHS 5m",
                    "Found Blocks",
                    "Difficulty Accepted",
                    "Difficulty Rejected",
                    "Hardware Errors",
                    "Work Utility",
                ]),
            ),
            (
                "DEVS+NOTIFY".to_string(),
                fields(&[
                    "DEVS.MHS av",
                    "DEVS.Difficulty Accepted",
                    "DEVS.Difficulty Rejected",
                ]),
            ),
            (
                "POOL".to_string(),
                fields(&["Difficulty Accepted", "Difficulty Rejected"]),
            ),
        ]),
        ext: HashMap::new(),
    }
}

fn stats_page() -> PageDef {
    PageDef {
        sections: vec![
            section("RIGS", &[]),
            section(
                "SUMMARY",
                &[
                    "Elapsed",
                    "MHS av",
                    "MHS 5m",
                    "Found Blocks=Blks",
                    "Difficulty Accepted=DiffA",
                    "Difficulty Rejected=DiffR",
                    "Work Utility=WU",
                    "Hardware Errors=HW Errs",
                    "Network Blocks=Net Blks",
                ],
            ),
            section(
                "COIN",
                &[
                    "Current Block Time",
                    "Current Block Hash",
                    "Network Difficulty",
                ],
            ),
            section("STATS", &["*"]),
        ],
        sum: HashMap::from([(
            "SUMMARY".to_string(),
            fields(&[
                "MHS av",
                "MHS 5m",
                "Found Blocks",
                "Difficulty Accepted",
                "Difficulty Rejected",
                "Work Utility",
                "Hardware Errors",
            ]),
        )]),
        ext: HashMap::new(),
    }
}

fn avalon_page() -> PageDef {
    let mm_fields = [
        "#",
        "MM",
        "ID",
        "MMID",
        "Connecter",
        "Elapsed",
        "Temp=Inflow",
        "TMax=Outflow",
        "Fan=FanRPM",
        "FanR=Fan%",
        "GEN.AVATHS=TH/s||GHSmm",
        "Vi",
        "Vo",
        "Freq",
        "Led",
        "PG",
        "ECHU",
        "ECMM",
        "Ver",
    ];
    PageDef {
        sections: vec![
            section(
                "COIN",
                &[
                    "Current Block Time",
                    "Current Block Hash",
                    "Network Difficulty",
                ],
            ),
            section(
                "SUMMARY",
                &[
                    "#",
                    "Elapsed",
                    "GEN.THS av=TH/s av||MHS av",
                    "GEN.THS 5m=TH/s 5m||MHS 5m",
                    "Found Blocks=Blks",
                    "Difficulty Accepted=DiffA",
                    "Difficulty Rejected=DiffR",
                    "Work Utility=WU",
                    "Hardware Errors=HW Errs",
                    "Network Blocks=Net Blks",
                    "Best Share",
                ],
            ),
            section("MM", &mm_fields),
        ],
        sum: HashMap::from([
            (
                "SUMMARY".to_string(),
                fields(&[
                    "#",
                    "GEN.THS av",
                    "MHS av",
                    "GEN.THS 5m",
                    "MHS 5m",
                    "Found Blocks",
                    "Difficulty Accepted",
                    "Difficulty Rejected",
                    "Work Utility",
                    "Hardware Errors",
                ]),
            ),
            ("MM".to_string(), fields(&["#", "GEN.AVATHS", "GHSmm"])),
        ]),
        ext: HashMap::from([
            (
                "COIN".to_string(),
                ExtSpec {
                    group: fields(&["Current Block Hash", "Network Difficulty"]),
                    calc: calcs(&[("Current Block Time", "min")]),
                    ..ExtSpec::default()
                },
            ),
            (
                "SUMMARY".to_string(),
                ExtSpec {
                    gen: gens(&[
                        ("THS av", "MHS av / 1000000.0"),
                        ("THS 5m", "MHS 5m / 1000000.0"),
                    ]),
                    ..ExtSpec::default()
                },
            ),
            (
                "MM".to_string(),
                ExtSpec {
                    gen: gens(&[("AVATHS", "GHSmm / 1000.0")]),
                    ..ExtSpec::default()
                },
            ),
        ]),
    }
}

fn s9_page() -> PageDef {
    PageDef {
        sections: vec![section(
            "STATS",
            &[
                "#",
                "Elapsed",
                "fan_num",
                "GEN.FanA=FanA||fan3",
                "GEN.FanB=FanB||fan6",
                "GEN.TempA=TempA||temp2_6",
                "GEN.TempB=TempB||temp2_7",
                "GEN.TempC=TempC||temp2_8",
                "GEN.S9THS=TH/s||total_rate",
                "GEN.AcnA=ChainA||chain_acn6",
                "GEN.AcnB=ChainB||chain_acn7",
                "GEN.AcnC=ChainC||chain_acn8",
                "GEN.RateA=RateA||chain_rate6",
                "GEN.RateB=RateB||chain_rate7",
                "GEN.RateC=RateC||chain_rate8",
            ],
        )],
        sum: HashMap::from([(
            "STATS".to_string(),
            fields(&["#", "GEN.S9THS", "total_rate"]),
        )]),
        ext: HashMap::from([(
            "STATS".to_string(),
            ExtSpec {
                where_: vec![fields(&["ID", "!sub", "POOL"])],
                gen: gens(&[
                    ("FanA", "fan3"),
                    ("FanB", "fan6"),
                    ("TempA", "temp2_6"),
                    ("TempB", "temp2_7"),
                    ("TempC", "temp2_8"),
                    ("S9THS", "total_rate"),
                    ("AcnA", "chain_acn6"),
                    ("AcnB", "chain_acn7"),
                    ("AcnC", "chain_acn8"),
                    ("RateA", "chain_rate6"),
                    ("RateB", "chain_rate7"),
                    ("RateC", "chain_rate8"),
                ]),
                fmt: Some("s9fmt".to_string()),
                ..ExtSpec::default()
            },
        )]),
    }
}
