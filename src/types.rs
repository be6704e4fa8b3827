//! Core data model for rig telemetry.
//!
//! The API protocol returns one reply line per call, which the codec turns
//! into a [`Record`]: an ordered collection of named [`Section`]s. Repeated
//! sections (several pools, several devices) are distinguished by a numeric
//! discriminator appended to the base name, e.g. `POOL`, `POOL1`, `POOL2`.
//!
//! Records are immutable once built; the join engine and the query pipeline
//! only ever produce new records and rows.

use serde::Serialize;

/// Address of one rig daemon, parsed from `"host"`, `"host:port"` or
/// `"host:port:name"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RigAddress {
    pub host: String,
    /// None means "use the configured default port".
    pub port: Option<u16>,
    /// Optional human-readable rig name.
    pub name: Option<String>,
}

impl RigAddress {
    /// Parse a rig address string. Port and name parts are optional;
    /// an unparsable port part is treated as absent.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.splitn(3, ':');
        let host = parts.next().unwrap_or_default().trim().to_string();
        let port = parts.next().and_then(|p| p.trim().parse::<u16>().ok());
        let name = parts
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Self { host, port, name }
    }

    /// Identifier used in report rows and error messages: the rig name if
    /// one was configured, otherwise `host:port` (or just the host when no
    /// port was given).
    pub fn display_id(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }

    /// Socket address string with the default port filled in.
    pub fn socket_addr(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

/// Strip every digit from a section or field name, leaving the letters-only
/// base used for matching (`POOL2` → `POOL`, `DEVS+NOTIFY01` → `DEVS+NOTIFY`).
pub fn base_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_ascii_digit()).collect()
}

/// Trailing digits of a section name (`POOL12` → `"12"`, `POOL` → `""`).
pub fn discriminator(name: &str) -> String {
    let split = name
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    name[split..].to_string()
}

/// One named group of ordered fields within a [`Record`].
///
/// Field order is significant: the first field is the fallback value for
/// bare (pair-less) entries and for primary-key lookups such as a pool's
/// own number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    base: String,
    discriminator: String,
    fields: Vec<(String, String)>,
}

impl Section {
    /// Create an empty section from its full name (base plus digits).
    pub fn new(full_name: &str) -> Self {
        Self {
            base: base_name(full_name),
            discriminator: discriminator(full_name),
            fields: Vec::new(),
        }
    }

    /// Letters-only base name used for page-spec matching.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Digits distinguishing repeated sections; empty for the first.
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Set a field, overwriting any existing value while keeping the
    /// field's original position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value of the first field, the section's "primary" value
    /// (e.g. a pool's own number).
    pub fn first_value(&self) -> Option<&str> {
        self.fields.first().map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Name of the status section every successful API reply carries.
pub const STATUS: &str = "STATUS";

/// Fully parsed result of one protocol call against one rig: an ordered
/// map from full section name to [`Section`]. Names are unique; inserting
/// a duplicate renames the newcomer (see [`Record::insert`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    sections: Vec<(String, Section)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a section under `name`, de-duplicating on collision by
    /// appending the smallest positive integer not already in use
    /// (`POOL` then `POOL` stores `POOL`, `POOL1`, never `POOL0`).
    /// Returns the name actually used.
    pub fn insert(&mut self, name: &str, section: Section) -> String {
        let mut full = name.to_string();
        if self.contains(&full) {
            let mut num = 1u32;
            while self.contains(&format!("{name}{num}")) {
                num += 1;
            }
            full = format!("{name}{num}");
        }
        // Keep base/discriminator consistent with the name actually stored.
        let section = if full == *name
            && section.base() == base_name(name)
            && section.discriminator() == discriminator(name)
        {
            section
        } else {
            let mut renamed = Section::new(&full);
            for (k, v) in section.iter() {
                renamed.set(k, v);
            }
            renamed
        };
        self.sections.push((full.clone(), section));
        full
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// The STATUS section, when the call succeeded.
    pub fn status(&self) -> Option<&Section> {
        self.get(STATUS)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// One emitted report row: the rig it belongs to (or `"total"`) and the
/// ordered field values the page asked to display. `None` marks a field
/// the row has no value for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub rig: String,
    pub section: String,
    pub values: Vec<(String, Option<String>)>,
}

/// Rig identifier used for synthetic total rows.
pub const TOTAL_RIG: &str = "total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_only() {
        let a = RigAddress::parse("10.0.0.5");
        assert_eq!(a.host, "10.0.0.5");
        assert_eq!(a.port, None);
        assert_eq!(a.name, None);
        assert_eq!(a.display_id(), "10.0.0.5");
    }

    #[test]
    fn parses_host_port_name() {
        let a = RigAddress::parse("10.0.0.5:4028:shed");
        assert_eq!(a.port, Some(4028));
        assert_eq!(a.name.as_deref(), Some("shed"));
        assert_eq!(a.display_id(), "shed");
        assert_eq!(a.socket_addr(4000), "10.0.0.5:4028");
    }

    #[test]
    fn base_name_strips_all_digits() {
        assert_eq!(base_name("POOL2"), "POOL");
        assert_eq!(base_name("DEVS+NOTIFY01"), "DEVS+NOTIFY");
        assert_eq!(discriminator("POOL12"), "12");
        assert_eq!(discriminator("POOL"), "");
    }

    #[test]
    fn duplicate_sections_renamed_in_order() {
        let mut rec = Record::new();
        rec.insert("POOL", Section::new("POOL"));
        let second = rec.insert("POOL", Section::new("POOL"));
        assert_eq!(second, "POOL1");
        let names: Vec<&str> = rec.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["POOL", "POOL1"]);
        assert_eq!(rec.get("POOL1").map(Section::discriminator), Some("1"));
    }

    #[test]
    fn section_set_overwrites_in_place() {
        let mut sec = Section::new("SUMMARY");
        sec.set("Elapsed", "1");
        sec.set("MHS av", "2");
        sec.set("Elapsed", "9");
        let keys: Vec<&str> = sec.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Elapsed", "MHS av"]);
        assert_eq!(sec.get("Elapsed"), Some("9"));
        assert_eq!(sec.first_value(), Some("9"));
    }
}
