//! Immutable condition tree for where-clauses.
//!
//! A node is either atomic (`field <cmp> literal`) or composite. Composite
//! children each carry the connective that joins them to the previous child;
//! the first child's connective is `Connective::None`. Any node may be negated.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::types::{Row, Scalar};

/// Separator used for `IN` literal lists (`'a;b;c'`).
pub const IN_LIST_SEPARATOR: char = ';';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    InList,
    IsNull,
    IsNotNull,
    Like,
    Contains,
    StartsWith,
    EndsWith,
}

impl Comparison {
    /// True for comparisons that take no right-hand literal.
    pub fn is_unary(&self) -> bool {
        matches!(self, Comparison::IsNull | Comparison::IsNotNull)
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::InList => "IN",
            Comparison::IsNull => "IS NULL",
            Comparison::IsNotNull => "IS NOT NULL",
            Comparison::Like => "LIKE",
            Comparison::Contains => "CONTAINS",
            Comparison::StartsWith => "STARTS WITH",
            Comparison::EndsWith => "ENDS WITH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connective {
    #[default]
    None,
    And,
    Or,
    AndNot,
    OrNot,
    Xor,
}

impl Connective {
    pub fn sql(&self) -> &'static str {
        match self {
            Connective::None => "",
            Connective::And => "AND",
            Connective::Or => "OR",
            Connective::AndNot => "AND NOT",
            Connective::OrNot => "OR NOT",
            Connective::Xor => "XOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub comparison: Comparison,
    #[serde(default)]
    pub value: Option<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    #[serde(default)]
    pub connective: Connective,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Atomic(Predicate),
    Composite(Vec<Child>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub negated: bool,
    pub node: Node,
}

impl Condition {
    pub fn atomic(field: impl Into<String>, comparison: Comparison, value: Option<Scalar>) -> Self {
        Self {
            negated: false,
            node: Node::Atomic(Predicate {
                field: field.into(),
                comparison,
                value,
            }),
        }
    }

    pub fn eq(field: impl Into<String>, value: Scalar) -> Self {
        Self::atomic(field, Comparison::Eq, Some(value))
    }

    pub fn compare(field: impl Into<String>, comparison: Comparison, value: Scalar) -> Self {
        Self::atomic(field, comparison, Some(value))
    }

    /// `field IN ('a';'b')`, with members given as text.
    pub fn in_list<S: AsRef<str>>(field: impl Into<String>, members: &[S]) -> Self {
        let joined = members
            .iter()
            .map(|m| m.as_ref())
            .collect::<Vec<_>>()
            .join(&IN_LIST_SEPARATOR.to_string());
        Self::atomic(field, Comparison::InList, Some(Scalar::Str(joined)))
    }

    /// Build a composite from explicit `(connective, child)` pairs.
    pub fn composite(children: Vec<(Connective, Condition)>) -> Self {
        Self {
            negated: false,
            node: Node::Composite(
                children
                    .into_iter()
                    .enumerate()
                    .map(|(i, (connective, condition))| Child {
                        connective: if i == 0 { Connective::None } else { connective },
                        condition,
                    })
                    .collect(),
            ),
        }
    }

    pub fn and(children: Vec<Condition>) -> Self {
        Self::composite(children.into_iter().map(|c| (Connective::And, c)).collect())
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Self::composite(children.into_iter().map(|c| (Connective::Or, c)).collect())
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self.node, Node::Atomic(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.node, Node::Composite(_))
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Children of a composite; empty for atomics.
    pub fn children(&self) -> &[Child] {
        match &self.node {
            Node::Composite(children) => children,
            Node::Atomic(_) => &[],
        }
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.node {
            Node::Atomic(p) => Some(p),
            Node::Composite(_) => None,
        }
    }

    /// Left-hand field name of an atomic condition.
    pub fn field(&self) -> Option<&str> {
        self.predicate().map(|p| p.field.as_str())
    }

    pub fn comparison(&self) -> Option<Comparison> {
        self.predicate().map(|p| p.comparison)
    }

    /// Right-hand literal of an atomic condition.
    pub fn value(&self) -> Option<&Scalar> {
        self.predicate().and_then(|p| p.value.as_ref())
    }

    /// Every field name referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.node {
            Node::Atomic(p) => out.push(p.field.as_str()),
            Node::Composite(children) => {
                for child in children {
                    child.condition.collect_fields(out);
                }
            }
        }
    }

    /// The top-level conjuncts of a non-negated conjunction.
    ///
    /// An atomic condition is its own single conjunct. A composite qualifies
    /// when every child after the first is joined with `AND`. Returns `None`
    /// for anything else (negated, `OR`, `XOR`, ...).
    pub fn conjuncts(&self) -> Option<Vec<&Condition>> {
        if self.negated {
            return None;
        }
        match &self.node {
            Node::Atomic(_) => Some(vec![self]),
            Node::Composite(children) => {
                let all_and = children
                    .iter()
                    .skip(1)
                    .all(|c| c.connective == Connective::And);
                if all_and {
                    Some(children.iter().map(|c| &c.condition).collect())
                } else {
                    None
                }
            }
        }
    }

    /// Rebuild a conjunction from what is left of it. `None` when empty.
    pub fn from_conjuncts(mut parts: Vec<Condition>) -> Option<Condition> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Condition::and(parts)),
        }
    }

    /// Evaluate against a row described by `schema`.
    pub fn evaluate(&self, schema: &Schema, row: &Row) -> Result<bool> {
        let raw = match &self.node {
            Node::Atomic(p) => evaluate_predicate(p, schema, row)?,
            Node::Composite(children) => {
                let mut acc: Option<bool> = None;
                for child in children {
                    let v = child.condition.evaluate(schema, row)?;
                    acc = Some(match (acc, child.connective) {
                        (None, _) => v,
                        (Some(a), Connective::None) | (Some(a), Connective::And) => a && v,
                        (Some(a), Connective::Or) => a || v,
                        (Some(a), Connective::AndNot) => a && !v,
                        (Some(a), Connective::OrNot) => a || !v,
                        (Some(a), Connective::Xor) => a ^ v,
                    });
                }
                acc.unwrap_or(true)
            }
        };
        Ok(raw != self.negated)
    }
}

fn evaluate_predicate(p: &Predicate, schema: &Schema, row: &Row) -> Result<bool> {
    let idx = schema
        .require(&p.field)
        .map_err(|e| Error::Condition(e.to_string()))?;
    let value = row
        .get(idx)
        .ok_or_else(|| Error::Condition(format!("row has no value for '{}'", p.field)))?;

    match p.comparison {
        Comparison::IsNull => return Ok(value.is_null()),
        Comparison::IsNotNull => return Ok(!value.is_null()),
        _ => {}
    }
    let literal = p.value.as_ref().ok_or_else(|| {
        Error::Condition(format!(
            "comparison {} on '{}' needs a value",
            p.comparison.sql(),
            p.field
        ))
    })?;
    if value.is_null() {
        // Null comparisons are false
        return Ok(false);
    }

    let ord = || value.compare(literal);
    Ok(match p.comparison {
        Comparison::Eq => ord() == Some(Ordering::Equal),
        Comparison::Ne => matches!(ord(), Some(o) if o != Ordering::Equal),
        Comparison::Lt => ord() == Some(Ordering::Less),
        Comparison::Le => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
        Comparison::Gt => ord() == Some(Ordering::Greater),
        Comparison::Ge => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
        Comparison::InList => {
            let members = literal.render();
            let dt = value.data_type();
            members.split(IN_LIST_SEPARATOR).any(|m| {
                let candidate = match dt {
                    Some(dt) => Scalar::parse_as(m, dt).unwrap_or(Scalar::Null),
                    None => Scalar::Null,
                };
                value.compare(&candidate) == Some(Ordering::Equal)
            })
        }
        Comparison::Like => like(&value.render(), &literal.render()),
        Comparison::Contains => value.render().contains(&literal.render()),
        Comparison::StartsWith => value.render().starts_with(&literal.render()),
        Comparison::EndsWith => value.render().ends_with(&literal.render()),
        Comparison::IsNull | Comparison::IsNotNull => unreachable!("handled above"),
    })
}

/// SQL `LIKE` with `%` (any run) and `_` (any single char).
fn like(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("NOT ")?;
        }
        match &self.node {
            Node::Atomic(p) => {
                if self.negated {
                    f.write_str("( ")?;
                }
                match (&p.comparison, &p.value) {
                    (c, _) if c.is_unary() => write!(f, "{} {}", p.field, c.sql())?,
                    (Comparison::InList, Some(v)) => {
                        let members: Vec<String> = v
                            .render()
                            .split(IN_LIST_SEPARATOR)
                            .map(|m| Scalar::Str(m.to_string()).to_string())
                            .collect();
                        write!(f, "{} IN ({})", p.field, members.join(", "))?
                    }
                    (c, Some(v)) => write!(f, "{} {} {}", p.field, c.sql(), v)?,
                    (c, None) => write!(f, "{} {} NULL", p.field, c.sql())?,
                }
                if self.negated {
                    f.write_str(" )")?;
                }
                Ok(())
            }
            Node::Composite(children) => {
                f.write_str("( ")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", child.connective.sql())?;
                    }
                    write!(f, "{}", child.condition)?;
                }
                f.write_str(" )")
            }
        }
    }
}
