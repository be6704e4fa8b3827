//! Row predicates for `where` and `having` filters.
//!
//! Predicates arrive from page specs as loose `(field, operator, literal)`
//! tuples; they are compiled once into a tagged enum. A malformed tuple
//! (no operator, or a missing row field where a literal compare needs one)
//! always passes: a bad filter must not hide an entire fleet.

/// Numeric comparison operators: `<`, `<=`, `>`, `>=`, `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Case-insensitive string comparison operators: `eq,lt,le,gt,ge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One compiled predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `(field, "set")`: the field exists on the row.
    Exists { field: String },
    /// Numeric compare against a literal.
    Num {
        field: String,
        op: NumOp,
        literal: String,
    },
    /// Case-insensitive string compare against a literal.
    Str {
        field: String,
        op: StrOp,
        literal: String,
    },
    /// Case-insensitive prefix match (`sub`) or its negation (`!sub`).
    Prefix {
        field: String,
        literal: String,
        negated: bool,
    },
    /// Malformed or unrecognized input; always passes.
    Pass,
}

impl Predicate {
    /// Compile one `(field, op, literal?)` tuple.
    pub fn compile(parts: &[String]) -> Self {
        if parts.len() < 2 {
            return Predicate::Pass;
        }
        let field = parts[0].clone();
        let op = parts[1].as_str();

        if op == "set" {
            return Predicate::Exists { field };
        }
        if parts.len() < 3 {
            return Predicate::Pass;
        }
        let literal = parts[2].clone();

        match op {
            "=" => Predicate::Num { field, op: NumOp::Eq, literal },
            "<" => Predicate::Num { field, op: NumOp::Lt, literal },
            "<=" => Predicate::Num { field, op: NumOp::Le, literal },
            ">" => Predicate::Num { field, op: NumOp::Gt, literal },
            ">=" => Predicate::Num { field, op: NumOp::Ge, literal },
            "eq" => Predicate::Str { field, op: StrOp::Eq, literal },
            "lt" => Predicate::Str { field, op: StrOp::Lt, literal },
            "le" => Predicate::Str { field, op: StrOp::Le, literal },
            "gt" => Predicate::Str { field, op: StrOp::Gt, literal },
            "ge" => Predicate::Str { field, op: StrOp::Ge, literal },
            "sub" => Predicate::Prefix { field, literal, negated: false },
            "!sub" => Predicate::Prefix { field, literal, negated: true },
            _ => Predicate::Pass,
        }
    }

    /// Evaluate against a row field lookup. `None` means the field is
    /// absent, which passes every predicate except `Exists`.
    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        match self {
            Predicate::Pass => true,
            Predicate::Exists { field } => lookup(field).is_some(),
            Predicate::Num { field, op, literal } => match lookup(field) {
                None => true,
                Some(value) => num_compare(*op, &value, literal),
            },
            Predicate::Str { field, op, literal } => match lookup(field) {
                None => true,
                Some(value) => {
                    let ord = value.to_lowercase().cmp(&literal.to_lowercase());
                    match op {
                        StrOp::Eq => ord.is_eq(),
                        StrOp::Lt => ord.is_lt(),
                        StrOp::Le => ord.is_le(),
                        StrOp::Gt => ord.is_gt(),
                        StrOp::Ge => ord.is_ge(),
                    }
                }
            },
            Predicate::Prefix { field, literal, negated } => match lookup(field) {
                None => true,
                Some(value) => {
                    let matched = literal.is_empty()
                        || value
                            .get(..literal.len())
                            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(literal));
                    matched != *negated
                }
            },
        }
    }
}

/// Numeric compare when both sides parse as numbers; otherwise falls back
/// to string ordering, matching the loose comparison of the source system.
fn num_compare(op: NumOp, value: &str, literal: &str) -> bool {
    if let (Ok(a), Ok(b)) = (value.trim().parse::<f64>(), literal.trim().parse::<f64>()) {
        return match op {
            NumOp::Lt => a < b,
            NumOp::Le => a <= b,
            NumOp::Gt => a > b,
            NumOp::Ge => a >= b,
            NumOp::Eq => a == b,
        };
    }
    let ord = value.cmp(literal);
    match op {
        NumOp::Lt => ord.is_lt(),
        NumOp::Le => ord.is_le(),
        NumOp::Gt => ord.is_gt(),
        NumOp::Ge => ord.is_ge(),
        NumOp::Eq => ord.is_eq(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(parts: &[&str]) -> Predicate {
        Predicate::compile(&parts.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn row<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |field| {
            pairs
                .iter()
                .find(|(k, _)| *k == field)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn malformed_predicate_passes() {
        assert_eq!(compile(&["ID"]), Predicate::Pass);
        assert_eq!(compile(&["ID", "<"]), Predicate::Pass);
        assert_eq!(compile(&["ID", "wibble", "5"]), Predicate::Pass);
        assert!(compile(&["ID"]).matches(row(&[])));
    }

    #[test]
    fn missing_field_passes_except_exists() {
        let numeric = compile(&["Temp", ">", "80"]);
        assert!(numeric.matches(row(&[("Other", "1")])));
        let exists = compile(&["Temp", "set"]);
        assert!(!exists.matches(row(&[("Other", "1")])));
        assert!(exists.matches(row(&[("Temp", "0")])));
    }

    #[test]
    fn numeric_compare() {
        assert!(compile(&["Temp", ">", "80"]).matches(row(&[("Temp", "81.5")])));
        assert!(!compile(&["Temp", ">", "80"]).matches(row(&[("Temp", "79")])));
        assert!(compile(&["Temp", "=", "80"]).matches(row(&[("Temp", "80.0")])));
    }

    #[test]
    fn string_compare_is_case_insensitive() {
        assert!(compile(&["Status", "eq", "alive"]).matches(row(&[("Status", "Alive")])));
        assert!(compile(&["Status", "lt", "dead"]).matches(row(&[("Status", "ALIVE")])));
    }

    #[test]
    fn prefix_match_and_negation() {
        let keep_nonpools = compile(&["ID", "!sub", "POOL"]);
        assert!(!keep_nonpools.matches(row(&[("ID", "POOL0")])));
        assert!(keep_nonpools.matches(row(&[("ID", "STATS0")])));
        let pools = compile(&["ID", "sub", "pool"]);
        assert!(pools.matches(row(&[("ID", "POOL0")])));
    }
}
