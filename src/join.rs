//! Section join engine.
//!
//! A page section reference such as `DEVS+NOTIFY` asks for two separately
//! polled commands to be stitched together per rig. Which strategy applies
//! is fixed by the base-name pair:
//!
//! - `SUMMARY+{POOL,DEVS,EDEVS,CONFIG,COIN}`: full cross join (both sides
//!   are effectively singletons)
//! - `{DEVS,EDEVS}+{NOTIFY,DEVDETAILS,USBSTATS}`: equality join on
//!   `Name` and `ID`
//! - `{DEVS,EDEVS}+{STATS,ESTATS}`: build-string join of `Name.ID` against `ID`
//! - `POOL+STATS`: build-string join of `"POOL"+<pool#>` against `ID`
//!
//! Joined sections get fields namespaced `"<Side>.<field>"` and a name made
//! of the reference plus the digits of both source sections. The STATUS
//! section of the left side is carried into the joined record; STATUS is
//! never subject to join predicates.

use crate::error::PageError;
use crate::types::{Record, Section, STATUS};

/// One token of a build-string join key: a literal, or a field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    Literal(&'static str),
    Field(&'static str),
}

/// Join strategy for one `A+B` section reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSpec {
    /// All named fields equal by value on both sides.
    Equality(&'static [&'static str]),
    /// Each side builds a comparison string from its token list; sections
    /// pair when the built strings are identical.
    BuildString {
        left: &'static [KeyToken],
        right: &'static [KeyToken],
    },
    /// Every left section paired with every right section.
    Cross,
}

/// Look up the strategy for a base-name pair, e.g. `("DEVS", "NOTIFY")`.
pub fn spec_for(left: &str, right: &str) -> Option<JoinSpec> {
    use KeyToken::{Field, Literal};
    const NAME_ID: &[&str] = &["Name", "ID"];
    const L_NAME_ID: &[KeyToken] = &[Field("Name"), Field("ID")];
    const L_POOL: &[KeyToken] = &[Literal("POOL"), Field("POOL")];
    const R_ID: &[KeyToken] = &[Field("ID")];

    match (left, right) {
        ("SUMMARY", "POOL" | "DEVS" | "EDEVS" | "CONFIG" | "COIN") => Some(JoinSpec::Cross),
        ("DEVS" | "EDEVS", "NOTIFY" | "DEVDETAILS" | "USBSTATS") => {
            Some(JoinSpec::Equality(NAME_ID))
        }
        ("DEVS" | "EDEVS", "STATS" | "ESTATS") => Some(JoinSpec::BuildString {
            left: L_NAME_ID,
            right: R_ID,
        }),
        ("POOL", "STATS") => Some(JoinSpec::BuildString {
            left: L_POOL,
            right: R_ID,
        }),
        _ => None,
    }
}

/// Join two records from the same rig according to the reference's
/// strategy. `reference` is the base section reference (`"DEVS+NOTIFY"`),
/// already split into `left`/`right` by the caller.
pub fn apply(
    left_name: &str,
    right_name: &str,
    left: &Record,
    right: &Record,
) -> Result<Record, PageError> {
    let reference = format!("{left_name}+{right_name}");
    let spec = spec_for(left_name, right_name)
        .ok_or_else(|| PageError::UnknownJoinSpec(reference.clone()))?;

    let left = normalize_gpu_sections(left);
    let right = normalize_gpu_sections(right);

    let mut out = Record::new();

    match spec {
        JoinSpec::Cross => {
            // The cross join copies STATUS through unconditionally.
            if let Some(status) = left.status() {
                out.insert(STATUS, status.clone());
            }
            for (name_l, sec_l) in data_sections(&left) {
                for (name_r, sec_r) in data_sections(&right) {
                    emit(&mut out, &reference, name_l, name_r, sec_l, sec_r, left_name, right_name);
                }
            }
        }
        JoinSpec::Equality(fields) => {
            let mut status = left.status().cloned();
            for (name_l, sec_l) in data_sections(&left) {
                for (name_r, sec_r) in data_sections(&right) {
                    let matched = fields
                        .iter()
                        .all(|f| sec_l.get(f).unwrap_or("") == sec_r.get(f).unwrap_or(""));
                    if matched {
                        if let Some(s) = status.take() {
                            out.insert(STATUS, s);
                        }
                        emit(&mut out, &reference, name_l, name_r, sec_l, sec_r, left_name, right_name);
                    }
                }
            }
        }
        JoinSpec::BuildString { left: lkey, right: rkey } => {
            let mut status = left.status().cloned();
            for (name_l, sec_l) in data_sections(&left) {
                let lval = build_key(sec_l, lkey);
                for (name_r, sec_r) in data_sections(&right) {
                    if lval == build_key(sec_r, rkey) {
                        if let Some(s) = status.take() {
                            out.insert(STATUS, s);
                        }
                        emit(&mut out, &reference, name_l, name_r, sec_l, sec_r, left_name, right_name);
                    }
                }
            }
        }
    }

    Ok(out)
}

/// GPU sections carry their index in a `GPU` field but lack the `Name`/`ID`
/// pair every other device type has, so synthesize them for device joins.
fn normalize_gpu_sections(record: &Record) -> Record {
    let needs_fixup = record
        .iter()
        .any(|(_, s)| s.base() == "GPU" && s.contains("GPU"));
    if !needs_fixup {
        return record.clone();
    }

    let mut out = Record::new();
    for (name, section) in record.iter() {
        let mut section = section.clone();
        if section.base() == "GPU" {
            if let Some(idx) = section.get("GPU").map(str::to_string) {
                section.set("Name", "GPU");
                section.set("ID", idx);
            }
        }
        out.insert(name, section);
    }
    out
}

fn data_sections(record: &Record) -> impl Iterator<Item = (&str, &Section)> {
    record.iter().filter(|(name, _)| *name != STATUS)
}

fn build_key(section: &Section, tokens: &[KeyToken]) -> String {
    let mut key = String::new();
    for token in tokens {
        match token {
            KeyToken::Literal(lit) => key.push_str(lit),
            KeyToken::Field(field) => key.push_str(section.get(field).unwrap_or("")),
        }
    }
    key
}

/// Emit one joined section: name = reference + digits of both source names,
/// fields prefixed with their side's base name.
#[allow(clippy::too_many_arguments)]
fn emit(
    out: &mut Record,
    reference: &str,
    name_l: &str,
    name_r: &str,
    sec_l: &Section,
    sec_r: &Section,
    prefix_l: &str,
    prefix_r: &str,
) {
    let digits: String = format!("{name_l}{name_r}")
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let mut joined = Section::new(&format!("{reference}{digits}"));
    for (k, v) in sec_l.iter() {
        joined.set(format!("{prefix_l}.{k}"), v);
    }
    for (k, v) in sec_r.iter() {
        joined.set(format!("{prefix_r}.{k}"), v);
    }
    out.insert(&format!("{reference}{digits}"), joined);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sections: &[(&str, &[(&str, &str)])]) -> Record {
        let mut rec = Record::new();
        for (name, fields) in sections {
            let mut sec = Section::new(name);
            for (k, v) in *fields {
                sec.set(*k, *v);
            }
            rec.insert(name, sec);
        }
        rec
    }

    #[test]
    fn cross_join_pairs_singletons() {
        let a = record(&[
            ("STATUS", &[("When", "1")]),
            ("SUMMARY", &[("Elapsed", "100")]),
        ]);
        let b = record(&[("COIN", &[("Network Difficulty", "5")])]);
        let joined = apply("SUMMARY", "COIN", &a, &b).expect("join");
        assert!(joined.status().is_some());
        let sec = joined.get("SUMMARY+COIN").expect("joined section");
        assert_eq!(sec.get("SUMMARY.Elapsed"), Some("100"));
        assert_eq!(sec.get("COIN.Network Difficulty"), Some("5"));
    }

    #[test]
    fn equality_join_requires_all_key_fields() {
        let a = record(&[
            ("STATUS", &[("When", "1")]),
            ("ASC0", &[("Name", "AV9"), ("ID", "0"), ("Temperature", "61")]),
            ("ASC1", &[("Name", "AV9"), ("ID", "1"), ("Temperature", "64")]),
        ]);
        let b = record(&[
            ("NOTIFY0", &[("Name", "AV9"), ("ID", "0"), ("Last Not Well", "0")]),
            ("NOTIFY1", &[("Name", "AV9"), ("ID", "1"), ("Last Not Well", "7")]),
        ]);
        let joined = apply("DEVS", "NOTIFY", &a, &b).expect("join");
        // Two matches, not four: ID must agree as well as Name.
        let names: Vec<&str> = joined.iter().map(|(n, _)| n).filter(|n| *n != "STATUS").collect();
        assert_eq!(names, vec!["DEVS+NOTIFY00", "DEVS+NOTIFY11"]);
        let first = joined.get("DEVS+NOTIFY00").expect("section");
        assert_eq!(first.get("DEVS.Temperature"), Some("61"));
        assert_eq!(first.get("NOTIFY.Last Not Well"), Some("0"));
    }

    #[test]
    fn status_copied_once_on_first_match() {
        let a = record(&[
            ("STATUS", &[("When", "1")]),
            ("ASC0", &[("Name", "AV9"), ("ID", "0")]),
            ("ASC1", &[("Name", "AV9"), ("ID", "1")]),
        ]);
        let b = record(&[
            ("NOTIFY0", &[("Name", "AV9"), ("ID", "0")]),
            ("NOTIFY1", &[("Name", "AV9"), ("ID", "1")]),
        ]);
        let joined = apply("DEVS", "NOTIFY", &a, &b).expect("join");
        let statuses = joined.iter().filter(|(n, _)| n.starts_with("STATUS")).count();
        assert_eq!(statuses, 1);
    }

    #[test]
    fn build_string_join_matches_pool_stats() {
        let a = record(&[
            ("STATUS", &[("When", "1")]),
            ("POOL0", &[("POOL", "0"), ("URL", "stratum://x")]),
            ("POOL1", &[("POOL", "1"), ("URL", "stratum://y")]),
        ]);
        let b = record(&[
            ("STATS0", &[("ID", "POOL0"), ("Pool Calls", "10")]),
            ("STATS1", &[("ID", "POOL1"), ("Pool Calls", "20")]),
        ]);
        let joined = apply("POOL", "STATS", &a, &b).expect("join");
        let sec = joined.get("POOL+STATS00").expect("section");
        assert_eq!(sec.get("POOL.URL"), Some("stratum://x"));
        assert_eq!(sec.get("STATS.Pool Calls"), Some("10"));
        assert!(joined.get("POOL+STATS11").is_some());
    }

    #[test]
    fn gpu_sections_gain_name_and_id() {
        let a = record(&[("GPU0", &[("GPU", "0"), ("Temperature", "70")])]);
        let b = record(&[("NOTIFY0", &[("Name", "GPU"), ("ID", "0")])]);
        let joined = apply("DEVS", "NOTIFY", &a, &b).expect("join");
        let sec = joined.get("DEVS+NOTIFY00").expect("section");
        assert_eq!(sec.get("DEVS.Name"), Some("GPU"));
        assert_eq!(sec.get("DEVS.ID"), Some("0"));
    }

    #[test]
    fn unknown_pair_is_an_error() {
        let a = record(&[("POOL0", &[("POOL", "0")])]);
        let b = record(&[("COIN", &[("Network Difficulty", "5")])]);
        let err = apply("POOL", "COIN", &a, &b).expect_err("no strategy");
        assert_eq!(err, PageError::UnknownJoinSpec("POOL+COIN".to_string()));
    }
}
