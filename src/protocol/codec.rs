//! Reply decoder: one raw line → one [`Record`].
//!
//! Reply grammar:
//!
//! ```text
//! response := section ('|' section)*
//! section  := item (',' item)*
//! item     := key '=' value | bareword
//! ```
//!
//! The first item of a section names it. When that item is `NAME=<digits>`
//! the digits join the name (`POOL=2` → section `POOL2`), which is how
//! repeated sections such as multiple pools stay distinct. A malformed
//! pair is never fatal: bare items are stored under their positional index.

use std::collections::HashSet;

use tracing::debug;

use super::escape::{neutralize, restore};
use super::Command;
use crate::types::{base_name, Record, Section};

/// Decode one neutralized-and-split reply line into a record.
///
/// `hide_fields` entries are `SECTION.Field` (base section name, no
/// digits); matching fields are dropped before storage and do not advance
/// the positional counter of bare items.
pub fn decode(command: Command, line: &str, hide_fields: &HashSet<String>) -> Record {
    let escaped = neutralize(line);
    let mut record = Record::new();

    for obj in escaped.split('|') {
        if obj.is_empty() {
            continue;
        }
        let items: Vec<&str> = obj.split(',').collect();

        // Section name: first item's key, with a pure-digit value joined on.
        let (head_key, head_value) = split_pair(items[0]);
        let mut name = head_key.to_string();
        if let Some(v) = head_value {
            if !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()) {
                name.push_str(v);
            }
        }
        if name.is_empty() {
            name = "null".to_string();
        }
        let section_base = base_name(&name);

        let mut section = Section::new(&name);
        let mut counter = 0usize;
        for item in &items {
            let (key, value) = split_pair(item);
            if hide_fields.contains(&format!("{section_base}.{key}")) {
                continue;
            }
            match value {
                Some(v) => section.set(key, restore(v)),
                None => {
                    // Legacy positional field, e.g. old-style pool replies.
                    section.set(counter.to_string(), restore(key));
                }
            }
            counter += 1;
        }

        let stored = record.insert(&name, section);
        if stored != name {
            debug!(command = %command, section = %name, stored = %stored, "renamed duplicate section");
        }
    }

    if command == Command::Mm {
        expand_mm(&record)
    } else {
        record
    }
}

fn split_pair(item: &str) -> (&str, Option<&str>) {
    match item.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (item, None),
    }
}

/// Post-processing for the `mm` command: every `MM ID*` field on a
/// non-pool STATS section becomes its own synthesized `MM<n>` section,
/// with the field's value parsed as a run of `name[value]` tokens.
/// The raw STATS sections are dropped from the result; everything else is
/// copied through unchanged.
fn expand_mm(record: &Record) -> Record {
    let mut out = Record::new();
    let mut num = 0usize;

    for (name, section) in record.iter() {
        if !name.starts_with("STATS") {
            out.insert(name, section.clone());
            continue;
        }
        let id = section.get("ID").unwrap_or("");
        if id.starts_with("POOL") {
            continue;
        }
        let snum = &name[5..];
        let connector = section.get("Connector").unwrap_or("AUC");
        let connector = format!("{connector}{snum}");

        for (field, value) in section.iter() {
            if !field.starts_with("MM ID") {
                continue;
            }
            let mut mm = Section::new(&format!("MM{num}"));
            mm.set("MM", num.to_string());
            mm.set("ID", id);
            mm.set("MMID", &field[5..]);
            mm.set("Connecter", connector.clone());
            parse_bracket_fields(value, &mut mm);
            out.insert(&format!("MM{num}"), mm);
            num += 1;
        }
    }
    out
}

/// Parse a run of `name[value]` tokens separated by spaces, e.g.
/// `Temp[45] Fan[80]`. Malformed trailing content is silently truncated.
fn parse_bracket_fields(value: &str, section: &mut Section) {
    let bytes = value.as_bytes();
    let len = bytes.len();
    let mut pos = 0usize;
    while pos < len {
        while pos < len && bytes[pos] == b' ' {
            pos += 1;
        }
        let Some(open) = find_from(value, '[', pos + 1) else {
            break;
        };
        let Some(close) = find_from(value, ']', open + 1) else {
            break;
        };
        let key = &value[pos..open];
        section.set(key, &value[open + 1..close]);
        pos = close + 1;
    }
}

fn find_from(haystack: &str, needle: char, from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..].find(needle).map(|i| i + from)
}
