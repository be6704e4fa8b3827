//! Derived-field formula evaluation.
//!
//! Formulas are strings like `"MHS av / 1000000.0"` or
//! `"round(pow(Temp, 2) % 7)"`. Row field names appearing in the formula
//! are substituted textually with their values (longer names first, so
//! `"MHS av"` wins over `"MHS"`) and the result is parsed into a small
//! arithmetic AST and interpreted. Nothing is ever evaluated as code.
//!
//! Any failure (unknown token, division result of a bad substitution,
//! unparsable remainder) yields the empty string, never an error: a broken
//! formula blanks one column, it does not take down the report.

/// Evaluate `formula` against a row, returning the formatted value or an
/// empty string on any failure.
pub fn evaluate(formula: &str, row_fields: &[(String, String)]) -> String {
    let substituted = substitute(formula, row_fields);
    match parse(&substituted).and_then(|ast| ast.eval()) {
        Some(v) => format_number(v),
        None => String::new(),
    }
}

/// Replace every field name appearing in the formula with its value.
/// Longer names are substituted before shorter ones (ties broken by
/// string order) to avoid partial-name collisions. This ordering is
/// deliberate and load-bearing: when one field name is a prefix of
/// another, the longer one must win.
pub fn substitute(formula: &str, row_fields: &[(String, String)]) -> String {
    let mut names: Vec<&(String, String)> = row_fields.iter().collect();
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    let mut out = formula.to_string();
    for (name, value) in names {
        if !name.is_empty() && out.contains(name.as_str()) {
            out = out.replace(name.as_str(), value);
        }
    }
    out
}

/// Format like the source system: integral results print without a
/// fractional part.
pub(crate) fn format_number(v: f64) -> String {
    if !v.is_finite() {
        return String::new();
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// Whitelisted functions; anything else fails the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Pow,
    Round,
    Max,
    Min,
}

impl Expr {
    fn eval(&self) -> Option<f64> {
        let v = match self {
            Expr::Num(n) => *n,
            Expr::Add(a, b) => a.eval()? + b.eval()?,
            Expr::Sub(a, b) => a.eval()? - b.eval()?,
            Expr::Mul(a, b) => a.eval()? * b.eval()?,
            Expr::Div(a, b) => {
                let d = b.eval()?;
                if d == 0.0 {
                    return None;
                }
                a.eval()? / d
            }
            Expr::Mod(a, b) => {
                let d = b.eval()?;
                if d == 0.0 {
                    return None;
                }
                a.eval()? % d
            }
            Expr::Neg(a) => -a.eval()?,
            Expr::Call(func, args) => match func {
                Func::Pow => {
                    if args.len() != 2 {
                        return None;
                    }
                    args[0].eval()?.powf(args[1].eval()?)
                }
                Func::Round => {
                    if args.len() != 1 {
                        return None;
                    }
                    args[0].eval()?.round()
                }
                Func::Max => fold_args(args, f64::max)?,
                Func::Min => fold_args(args, f64::min)?,
            },
        };
        v.is_finite().then_some(v)
    }
}

fn fold_args(args: &[Expr], f: fn(f64, f64) -> f64) -> Option<f64> {
    let mut vals = args.iter().map(Expr::eval);
    let first = vals.next()??;
    vals.try_fold(first, |acc, v| Some(f(acc, v?)))
}

fn parse(input: &str) -> Option<Expr> {
    let mut parser = Parser {
        chars: input.as_bytes(),
        pos: 0,
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    parser.at_end().then_some(expr)
}

/// Recursive-descent parser over ASCII bytes.
///
/// ```text
/// expr   := term (('+'|'-') term)*
/// term   := unary (('*'|'/'|'%') unary)*
/// unary  := '-' unary | atom
/// atom   := number | func '(' expr (',' expr)* ')' | '(' expr ')'
/// ```
struct Parser<'a> {
    chars: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn expr(&mut self) -> Option<Expr> {
        let mut left = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Some(b'-') => {
                    self.pos += 1;
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => return Some(left),
            }
        }
    }

    fn term(&mut self) -> Option<Expr> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    left = Expr::Mul(Box::new(left), Box::new(self.unary()?));
                }
                Some(b'/') => {
                    self.pos += 1;
                    left = Expr::Div(Box::new(left), Box::new(self.unary()?));
                }
                Some(b'%') => {
                    self.pos += 1;
                    left = Expr::Mod(Box::new(left), Box::new(self.unary()?));
                }
                _ => return Some(left),
            }
        }
    }

    fn unary(&mut self) -> Option<Expr> {
        self.skip_ws();
        if self.peek() == Some(b'-') {
            self.pos += 1;
            return Some(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Option<Expr> {
        self.skip_ws();
        match self.peek()? {
            b'(' => {
                self.pos += 1;
                let inner = self.expr()?;
                self.skip_ws();
                self.expect(b')')?;
                Some(inner)
            }
            b'0'..=b'9' | b'.' => self.number(),
            c if c.is_ascii_alphabetic() => self.call(),
            _ => None,
        }
    }

    fn number(&mut self) -> Option<Expr> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.chars[start..self.pos])
            .ok()?
            .parse::<f64>()
            .ok()
            .map(Expr::Num)
    }

    fn call(&mut self) -> Option<Expr> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.chars[start..self.pos]).ok()?;
        let func = match name {
            "pow" => Func::Pow,
            "round" => Func::Round,
            "max" => Func::Max,
            "min" => Func::Min,
            _ => return None,
        };
        self.skip_ws();
        self.expect(b'(')?;
        let mut args = vec![self.expr()?];
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                Some(b')') => {
                    self.pos += 1;
                    return Some(Expr::Call(func, args));
                }
                _ => return None,
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Option<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn skip_ws(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(evaluate("1 + 2 * 3", &[]), "7");
        assert_eq!(evaluate("(1 + 2) * 3", &[]), "9");
        assert_eq!(evaluate("7 % 4", &[]), "3");
        assert_eq!(evaluate("1 / 2", &[]), "0.5");
        assert_eq!(evaluate("-3 + 5", &[]), "2");
    }

    #[test]
    fn functions() {
        assert_eq!(evaluate("pow(2, 10)", &[]), "1024");
        assert_eq!(evaluate("round(2.6)", &[]), "3");
        assert_eq!(evaluate("max(1, 5, 3)", &[]), "5");
        assert_eq!(evaluate("min(4, 2)", &[]), "2");
    }

    #[test]
    fn field_substitution() {
        let row = fields(&[("MHS av", "2500000"), ("Elapsed", "100")]);
        assert_eq!(evaluate("MHS av / 1000000.0", &row), "2.5");
        assert_eq!(evaluate("Elapsed * 2", &row), "200");
    }

    #[test]
    fn longer_field_names_substituted_first() {
        // "MHS" alone must not clobber the "MHS av" reference.
        let row = fields(&[("MHS", "1"), ("MHS av", "5")]);
        assert_eq!(evaluate("MHS av * 10", &row), "50");
    }

    #[test]
    fn failures_yield_empty_string() {
        assert_eq!(evaluate("NoSuchField + 1", &[]), "");
        assert_eq!(evaluate("1 / 0", &[]), "");
        assert_eq!(evaluate("system(rm)", &[]), "");
        assert_eq!(evaluate("", &[]), "");
        let row = fields(&[("Status", "Alive")]);
        // Substituting a non-numeric value fails the parse, not the report.
        assert_eq!(evaluate("Status * 2", &row), "");
    }

    #[test]
    fn integral_results_print_without_fraction() {
        assert_eq!(evaluate("6 / 2", &[]), "3");
        assert_eq!(evaluate("5 / 2", &[]), "2.5");
    }
}
