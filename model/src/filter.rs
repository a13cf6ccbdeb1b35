//! Query conditions of the form `field:<op>value` and the predicate tree
//! they compile to.
//!
//! User fields address the stored spec, so every path is rooted at the
//! `crd` column of the persisted row.

use crate::errors::FilterError;
use crate::time::parse_rfc3339;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

/// Column holding the serialized spec in a persisted row.
pub const SPEC_COLUMN: &str = "crd";
/// Top level status column of a persisted row.
pub const STATUS_COLUMN: &str = "status";

static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.-]+):(>=|<=|=|>|<)(.*)$").expect("condition regex is valid")
});

const TIMESTAMP_FIELDS: &[&str] = &["lastUpdated", "registeredAt"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
        }
    }
}

/// One parsed `field:<op>value` query condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let captures = CONDITION_RE
            .captures(raw)
            .ok_or(FilterError::InvalidQuery)?;

        let op = match &captures[2] {
            "=" => Operator::Eq,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            _ => return Err(FilterError::InvalidQuery),
        };

        let field = captures[1].to_string();
        let value = captures[3].trim().to_string();

        if TIMESTAMP_FIELDS.contains(&field.as_str()) && parse_rfc3339(&value).is_err() {
            return Err(FilterError::InvalidValue { field, value });
        }

        Ok(Condition { field, op, value })
    }
}

/// Parses every condition, failing on the first malformed one.
pub fn parse_conditions<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Condition>, FilterError> {
    raw.iter().map(|c| Condition::parse(c.as_ref())).collect()
}

/// Backend independent predicate over a persisted row.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        path: Vec<String>,
        op: Operator,
        value: String,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(path: Vec<String>, op: Operator, value: impl Into<String>) -> Self {
        Predicate::Compare {
            path,
            op,
            value: value.into(),
        }
    }

    /// `status <> "Deleted"` on the indexed status column.
    pub fn not_deleted() -> Self {
        Predicate::compare(vec![STATUS_COLUMN.into()], Operator::Ne, "Deleted")
    }

    /// Equality on a field of the stored spec.
    pub fn spec_eq(field: &str, value: impl Into<String>) -> Self {
        Predicate::compare(spec_path(field), Operator::Eq, value)
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, Predicate::And(mut right)) => {
                right.insert(0, left);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Evaluates the predicate against a row.
    ///
    /// Timestamp fields compare as instants when both sides parse, other
    /// strings lexicographically. A missing attribute only satisfies `<>`.
    pub fn evaluate(&self, row: &Value) -> bool {
        match self {
            Predicate::And(all) => all.iter().all(|p| p.evaluate(row)),
            Predicate::Compare { path, op, value } => {
                let mut current = row;
                for segment in path {
                    match current.get(segment) {
                        Some(next) => current = next,
                        None => return *op == Operator::Ne,
                    }
                }
                let actual = match current {
                    Value::String(s) => s.clone(),
                    Value::Null => return *op == Operator::Ne,
                    other => other.to_string(),
                };
                let is_timestamp = path
                    .last()
                    .is_some_and(|field| TIMESTAMP_FIELDS.contains(&field.as_str()));
                if is_timestamp {
                    if let (Ok(a), Ok(b)) = (parse_rfc3339(&actual), parse_rfc3339(value)) {
                        return op.holds(a.cmp(&b));
                    }
                }
                op.holds(actual.as_str().cmp(value.as_str()))
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { path, op, value } => {
                write!(f, "{} {} {:?}", path.join("."), op.as_str(), value)
            }
            Predicate::And(all) => {
                for (i, p) in all.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "({p})")?;
                }
                Ok(())
            }
        }
    }
}

fn spec_path(field: &str) -> Vec<String> {
    std::iter::once(SPEC_COLUMN)
        .chain(field.split('.'))
        .map(str::to_string)
        .collect()
}

/// Compiles conditions into a conjunction over the stored spec.
///
/// An empty condition set compiles to `status <> ""`.
pub fn compile(conditions: &[Condition]) -> Predicate {
    if conditions.is_empty() {
        return Predicate::compare(vec![STATUS_COLUMN.into()], Operator::Ne, "");
    }
    Predicate::And(
        conditions
            .iter()
            .map(|c| Predicate::compare(spec_path(&c.field), c.op, c.value.clone()))
            .collect(),
    )
}
