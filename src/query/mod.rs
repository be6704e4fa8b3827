//! Query pipeline: filter, derive, group, aggregate.
//!
//! For one page section reference the stages run in fixed order:
//! where-filter → pre-group derived fields (`BGEN.*`) → group/aggregate →
//! post-group derived fields (`GEN.*`) → having-filter. Derived-field
//! stages run only when the monitor's `allow_gen` flag is on.

pub mod expr;
pub mod pipeline;
pub mod predicate;

pub use pipeline::{run, ExtSpec};
pub use predicate::Predicate;

use crate::types::base_name;

/// Does a row's section belong to the page section being processed?
///
/// Base names must be equal, with two protocol quirks: `estats` replies
/// name their data `STATS`, and `devs`/`edevs` replies name theirs after
/// the device type (`GPU`, `PGA`, `ASC`).
pub fn sec_match(target: &str, row_section: &str) -> bool {
    let sec = base_name(target);
    let fld = base_name(row_section);

    if sec == fld {
        return true;
    }
    if sec == "ESTATS" && fld == "STATS" {
        return true;
    }
    if (sec == "DEVS" || sec == "EDEVS") && matches!(fld.as_str(), "GPU" | "PGA" | "ASC") {
        return true;
    }
    false
}
