//! The per-section query pipeline and its aggregate functions.

use serde::{Deserialize, Serialize};

use super::expr::{self, format_number};
use super::{predicate::Predicate, sec_match};
use crate::types::{base_name, Record, Section};

/// One aggregate assignment: `field` collapsed with `func` across a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcSpec {
    pub field: String,
    pub func: String,
}

/// One derived field: `name` computed from `formula`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenSpec {
    pub name: String,
    pub formula: String,
}

/// Optional per-section-reference extensions of a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtSpec {
    /// Row filters applied before grouping; every tuple must pass.
    #[serde(default, rename = "where")]
    pub where_: Vec<Vec<String>>,

    /// Group-key fields; rows collapse per distinct value tuple.
    #[serde(default)]
    pub group: Vec<String>,

    /// Aggregates computed per group.
    #[serde(default)]
    pub calc: Vec<CalcSpec>,

    /// Derived fields computed before grouping (`BGEN.<name>`).
    #[serde(default)]
    pub bgen: Vec<GenSpec>,

    /// Derived fields computed after grouping (`GEN.<name>`).
    #[serde(default)]
    pub gen: Vec<GenSpec>,

    /// Row filters applied last.
    #[serde(default)]
    pub having: Vec<Vec<String>>,

    /// Custom-formatter hook identity, preserved for the external
    /// renderer; the pipeline never interprets it.
    #[serde(default)]
    pub fmt: Option<String>,
}

/// Pipeline result: the surviving rows per rig (grouping collapses
/// everything under a single empty rig id) plus any derived-field names
/// that must join the displayed field list.
pub struct PipelineOutput {
    pub results: Vec<(String, Record)>,
    pub added_fields: Vec<String>,
}

/// Run the full pipeline for `section_ref` (full reference including any
/// digits, e.g. `"MM0"` or `"DEVS+NOTIFY"`).
pub fn run(
    section_ref: &str,
    ext: &ExtSpec,
    results: Vec<(String, Record)>,
    allow_gen: bool,
) -> PipelineOutput {
    let mut added_fields = Vec::new();

    let mut results = filter(section_ref, &ext.where_, results);

    if allow_gen && !ext.bgen.is_empty() {
        derive(section_ref, &ext.bgen, "BGEN", &mut results, &mut added_fields);
    }

    if !ext.group.is_empty() {
        results = group(section_ref, &ext.group, &ext.calc, results);
    }

    if allow_gen && !ext.gen.is_empty() {
        derive(section_ref, &ext.gen, "GEN", &mut results, &mut added_fields);
    }

    let results = filter(section_ref, &ext.having, results);

    PipelineOutput {
        results,
        added_fields,
    }
}

/// Apply an AND-list of predicates. Rows in sections that don't belong to
/// the target pass through unfiltered (STATUS always does); rows that
/// belong are dropped unless every predicate passes.
fn filter(
    section_ref: &str,
    tests: &[Vec<String>],
    results: Vec<(String, Record)>,
) -> Vec<(String, Record)> {
    if tests.is_empty() {
        return results;
    }
    let predicates: Vec<Predicate> = tests.iter().map(|t| Predicate::compile(t)).collect();

    results
        .into_iter()
        .map(|(rig, record)| {
            let mut kept = Record::new();
            for (name, section) in record.iter() {
                if !sec_match(section_ref, name) {
                    kept.insert(name, section.clone());
                    continue;
                }
                let passes = predicates
                    .iter()
                    .all(|p| p.matches(|field| section.get(field).map(str::to_string)));
                if passes {
                    kept.insert(name, section.clone());
                }
            }
            (rig, kept)
        })
        .collect()
}

/// Compute derived fields on every matching row, storing them as
/// `<prefix>.<name>` and recording the new field names.
fn derive(
    section_ref: &str,
    gens: &[GenSpec],
    prefix: &str,
    results: &mut [(String, Record)],
    added_fields: &mut Vec<String>,
) {
    for gen in gens {
        added_fields.push(format!("{prefix}.{}", gen.name));
    }

    for (_, record) in results.iter_mut() {
        let mut updated = Record::new();
        for (name, section) in record.iter() {
            let mut section = section.clone();
            if sec_match(section_ref, name) {
                let row_fields: Vec<(String, String)> = section
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                for gen in gens {
                    let value = expr::evaluate(&gen.formula, &row_fields);
                    section.set(format!("{prefix}.{}", gen.name), value);
                }
            }
            updated.insert(name, section);
        }
        *record = updated;
    }
}

/// Partition matching rows by the group-key tuple and collapse each group
/// to one synthetic row. Non-matching sections pass through once each,
/// first-seen by name. Output is a single pseudo-rig with empty id.
fn group(
    section_ref: &str,
    group_fields: &[String],
    calcs: &[CalcSpec],
    results: Vec<(String, Record)>,
) -> Vec<(String, Record)> {
    struct Group {
        key: String,
        /// Group-key fields actually present on the first row seen.
        fields: Vec<(String, String)>,
        /// Synthetic section name, `<base><index>` in first-seen order.
        section: String,
        /// Aggregation input per calc field, in first-seen field order.
        values: Vec<(String, Vec<String>)>,
    }

    let mut passthrough = Record::new();
    let mut groups: Vec<Group> = Vec::new();

    for (_, record) in &results {
        for (name, section) in record.iter() {
            if !sec_match(section_ref, name) {
                if !passthrough.contains(name) {
                    passthrough.insert(name, section.clone());
                }
                continue;
            }

            let mut key = String::new();
            let mut key_fields = Vec::new();
            for field in group_fields {
                match section.get(field) {
                    Some(v) => {
                        key.push_str(v);
                        key.push('.');
                        key_fields.push((field.clone(), v.to_string()));
                    }
                    None => key.push('.'),
                }
            }

            let idx = match groups.iter().position(|g| g.key == key) {
                Some(i) => i,
                None => {
                    let section_name = format!("{}{}", base_name(name), groups.len());
                    groups.push(Group {
                        key,
                        fields: key_fields,
                        section: section_name,
                        values: Vec::new(),
                    });
                    groups.len() - 1
                }
            };

            for calc in calcs {
                if let Some(v) = section.get(&calc.field) {
                    let grp = &mut groups[idx];
                    if !grp.values.iter().any(|(f, _)| *f == calc.field) {
                        grp.values.push((calc.field.clone(), Vec::new()));
                    }
                    if let Some((_, vals)) =
                        grp.values.iter_mut().find(|(f, _)| *f == calc.field)
                    {
                        vals.push(v.to_string());
                    }
                }
            }
        }
    }

    let mut out = passthrough;
    for grp in groups {
        let mut section = Section::new(&grp.section);
        for (field, value) in &grp.fields {
            section.set(field, value.clone());
        }
        for (field, values) in &grp.values {
            if let Some(calc) = calcs.iter().find(|c| c.field == *field) {
                section.set(field, aggregate(&calc.func, values));
            }
        }
        out.insert(&grp.section, section);
    }

    vec![(String::new(), out)]
}

/// Collapse a multiset of values with the named aggregate function.
/// Unknown functions behave like `any`, matching the source system.
pub fn aggregate(func: &str, values: &[String]) -> String {
    if values.is_empty() {
        return String::new();
    }
    match func {
        "sum" => format_number(values.iter().map(|v| to_num(v)).sum()),
        "avg" => {
            let total: f64 = values.iter().map(|v| to_num(v)).sum();
            format_number(total / values.len() as f64)
        }
        "min" => pick(values, |cand, best| to_num(cand) < to_num(best)),
        "max" => pick(values, |cand, best| to_num(cand) > to_num(best)),
        "lo" => pick(values, |cand, best| {
            cand.to_lowercase() < best.to_lowercase()
        }),
        "hi" => pick(values, |cand, best| {
            cand.to_lowercase() > best.to_lowercase()
        }),
        "count" => values.len().to_string(),
        _ => values[0].clone(),
    }
}

fn pick(values: &[String], better: impl Fn(&str, &str) -> bool) -> String {
    let mut best = &values[0];
    for cand in &values[1..] {
        if better(cand, best) {
            best = cand;
        }
    }
    best.clone()
}

fn to_num(v: &str) -> f64 {
    v.trim().parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_record(url: &str, diff: &str) -> Record {
        let mut rec = Record::new();
        let mut status = Section::new("STATUS");
        status.set("When", "1");
        rec.insert("STATUS", status);
        let mut pool = Section::new("POOL0");
        pool.set("POOL.URL", url);
        pool.set("POOL.Difficulty Accepted", diff);
        rec.insert("POOL0", pool);
        rec
    }

    #[test]
    fn where_filter_keeps_matching_rows_only() {
        let mut rec = Record::new();
        let mut a = Section::new("MM0");
        a.set("ID", "POOL0");
        rec.insert("MM0", a);
        let mut b = Section::new("MM1");
        b.set("ID", "STATS0");
        rec.insert("MM1", b);

        let ext = ExtSpec {
            where_: vec![vec!["ID".into(), "!sub".into(), "POOL".into()]],
            ..ExtSpec::default()
        };
        let out = run("MM", &ext, vec![("rig0".into(), rec)], false);
        let record = &out.results[0].1;
        assert!(record.get("MM0").is_none());
        assert_eq!(record.get("MM1").and_then(|s| s.get("ID")), Some("STATS0"));
    }

    #[test]
    fn group_sums_per_key() {
        let ext = ExtSpec {
            group: vec!["POOL.URL".into()],
            calc: vec![CalcSpec {
                field: "POOL.Difficulty Accepted".into(),
                func: "sum".into(),
            }],
            ..ExtSpec::default()
        };
        let results = vec![
            ("rig0".to_string(), pool_record("a", "10")),
            ("rig1".to_string(), pool_record("a", "20")),
        ];
        let out = run("POOL", &ext, results, false);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].0, "");
        let record = &out.results[0].1;
        let row = record.get("POOL0").expect("group row");
        assert_eq!(row.get("POOL.URL"), Some("a"));
        assert_eq!(row.get("POOL.Difficulty Accepted"), Some("30"));
        // STATUS passed through once, not per rig.
        assert!(record.status().is_some());
    }

    #[test]
    fn distinct_keys_make_distinct_group_rows() {
        let ext = ExtSpec {
            group: vec!["POOL.URL".into()],
            calc: vec![CalcSpec {
                field: "POOL.Difficulty Accepted".into(),
                func: "sum".into(),
            }],
            ..ExtSpec::default()
        };
        let results = vec![
            ("rig0".to_string(), pool_record("a", "10")),
            ("rig1".to_string(), pool_record("b", "20")),
        ];
        let out = run("POOL", &ext, results, false);
        let record = &out.results[0].1;
        let names: Vec<&str> = record
            .iter()
            .map(|(n, _)| n)
            .filter(|n| n.starts_with("POOL"))
            .collect();
        assert_eq!(names, vec!["POOL0", "POOL1"]);
    }

    #[test]
    fn gen_fields_added_after_grouping() {
        let ext = ExtSpec {
            gen: vec![GenSpec {
                name: "THS av".into(),
                formula: "MHS av / 1000000.0".into(),
            }],
            ..ExtSpec::default()
        };
        let mut rec = Record::new();
        let mut summary = Section::new("SUMMARY");
        summary.set("MHS av", "2500000");
        rec.insert("SUMMARY", summary);

        let out = run("SUMMARY", &ext, vec![("rig0".into(), rec)], true);
        assert_eq!(out.added_fields, vec!["GEN.THS av".to_string()]);
        let row = out.results[0].1.get("SUMMARY").expect("row");
        assert_eq!(row.get("GEN.THS av"), Some("2.5"));
    }

    #[test]
    fn gen_skipped_when_disabled() {
        let ext = ExtSpec {
            gen: vec![GenSpec {
                name: "X".into(),
                formula: "1 + 1".into(),
            }],
            ..ExtSpec::default()
        };
        let mut rec = Record::new();
        rec.insert("SUMMARY", Section::new("SUMMARY"));
        let out = run("SUMMARY", &ext, vec![("rig0".into(), rec)], false);
        assert!(out.added_fields.is_empty());
        assert!(out.results[0].1.get("SUMMARY").map_or(true, |s| s.get("GEN.X").is_none()));
    }

    #[test]
    fn having_runs_after_grouping() {
        let ext = ExtSpec {
            group: vec!["POOL.URL".into()],
            calc: vec![CalcSpec {
                field: "POOL.Difficulty Accepted".into(),
                func: "sum".into(),
            }],
            having: vec![vec![
                "POOL.Difficulty Accepted".into(),
                ">".into(),
                "25".into(),
            ]],
            ..ExtSpec::default()
        };
        let results = vec![
            ("rig0".to_string(), pool_record("a", "10")),
            ("rig1".to_string(), pool_record("a", "20")),
            ("rig2".to_string(), pool_record("b", "5")),
        ];
        let out = run("POOL", &ext, results, false);
        let record = &out.results[0].1;
        assert!(record.get("POOL0").is_some()); // a: 30 > 25
        assert!(record.get("POOL1").is_none()); // b: 5 dropped
    }

    #[test]
    fn aggregates() {
        let vals: Vec<String> = ["3", "1", "2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(aggregate("sum", &vals), "6");
        assert_eq!(aggregate("avg", &vals), "2");
        assert_eq!(aggregate("min", &vals), "1");
        assert_eq!(aggregate("max", &vals), "3");
        assert_eq!(aggregate("count", &vals), "3");
        assert_eq!(aggregate("any", &vals), "3");
        let words: Vec<String> = ["Beta", "alpha"].iter().map(|s| s.to_string()).collect();
        assert_eq!(aggregate("lo", &words), "alpha");
        assert_eq!(aggregate("hi", &words), "Beta");
    }
}
