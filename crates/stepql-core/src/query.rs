//! Parsed queries: what the caller asked for.
//!
//! A `QuerySpec` is built once per execution through `QuerySpecBuilder` and
//! never mutated afterwards. Parameter resolution produces a new spec.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::types::Scalar;

/// Simplified aggregations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregation {
    /// Source field the aggregation reads (`None` for `COUNT(*)`).
    pub fn field(&self) -> Option<&str> {
        match self {
            Aggregation::Count => None,
            Aggregation::Sum(f) | Aggregation::Avg(f) | Aggregation::Min(f) | Aggregation::Max(f) => {
                Some(f)
            }
        }
    }

    /// Default output name, e.g. `SUM(qty)`.
    pub fn default_alias(&self) -> String {
        match self {
            Aggregation::Count => "COUNT(*)".to_string(),
            Aggregation::Sum(col) => format!("SUM({})", col),
            Aggregation::Avg(col) => format!("AVG({})", col),
            Aggregation::Min(col) => format!("MIN({})", col),
            Aggregation::Max(col) => format!("MAX({})", col),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectItem {
    Wildcard,
    Field {
        name: String,
        #[serde(default)]
        alias: Option<String>,
    },
    Aggregate {
        function: Aggregation,
        #[serde(default)]
        alias: Option<String>,
    },
    Constant {
        value: Scalar,
        alias: String,
    },
}

impl SelectItem {
    pub fn field(name: impl Into<String>) -> Self {
        SelectItem::Field {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aggregate(function: Aggregation) -> Self {
        SelectItem::Aggregate {
            function,
            alias: None,
        }
    }

    pub fn constant(value: Scalar, alias: impl Into<String>) -> Self {
        SelectItem::Constant {
            value,
            alias: alias.into(),
        }
    }

    /// Name of the column this item produces (`None` for `*`).
    pub fn output_name(&self) -> Option<String> {
        match self {
            SelectItem::Wildcard => None,
            SelectItem::Field { name, alias } => Some(alias.clone().unwrap_or_else(|| name.clone())),
            SelectItem::Aggregate { function, alias } => {
                Some(alias.clone().unwrap_or_else(|| function.default_alias()))
            }
            SelectItem::Constant { alias, .. } => Some(alias.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    source: Option<String>,
    select: Vec<SelectItem>,
    condition: Option<Condition>,
    group_by: Vec<String>,
    order_by: Vec<SortKey>,
    limit: Option<u64>,
    parameters: BTreeMap<String, String>,
}

impl QuerySpec {
    pub fn builder() -> QuerySpecBuilder {
        QuerySpecBuilder::default()
    }

    /// Reopen this spec as a builder, e.g. to derive a resolved copy.
    pub fn to_builder(&self) -> QuerySpecBuilder {
        QuerySpecBuilder {
            spec: self.clone(),
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Constant-only queries with no `FROM` never need a source pipeline.
    pub fn is_no_source(&self) -> bool {
        self.source.is_none()
    }

    pub fn select(&self) -> &[SelectItem] {
        &self.select
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn order_by(&self) -> &[SortKey] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn has_aggregates(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .select
                .iter()
                .any(|s| matches!(s, SelectItem::Aggregate { .. }))
    }

    /// When the answer only depends on the first `n` source rows, return `n`.
    ///
    /// True for a bare `LIMIT n` with no filtering, grouping or ordering.
    pub fn row_prefix_limit(&self) -> Option<u64> {
        if self.condition.is_none() && !self.has_aggregates() && self.order_by.is_empty() {
            self.limit
        } else {
            None
        }
    }
}

impl fmt::Display for QuerySpec {
    /// SQL rendering, stable enough to be used in cache keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.select.is_empty() {
            f.write_str("*")?;
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match item {
                SelectItem::Wildcard => f.write_str("*")?,
                SelectItem::Field { name, alias } => {
                    f.write_str(name)?;
                    if let Some(a) = alias {
                        write!(f, " AS {}", a)?;
                    }
                }
                SelectItem::Aggregate { function, alias } => {
                    f.write_str(&function.default_alias())?;
                    if let Some(a) = alias {
                        write!(f, " AS {}", a)?;
                    }
                }
                SelectItem::Constant { value, alias } => write!(f, "{} AS {}", value, alias)?,
            }
        }
        if let Some(src) = &self.source {
            write!(f, " FROM {}", src)?;
        }
        if let Some(c) = &self.condition {
            write!(f, " WHERE {}", c)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.join(", "))?;
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|k| format!("{} {}", k.field, if k.ascending { "ASC" } else { "DESC" }))
                .collect();
            write!(f, " ORDER BY {}", keys.join(", "))?;
        }
        if let Some(n) = self.limit {
            write!(f, " LIMIT {}", n)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QuerySpecBuilder {
    spec: QuerySpec,
}

impl Default for QuerySpecBuilder {
    fn default() -> Self {
        Self {
            spec: QuerySpec {
                source: None,
                select: vec![],
                condition: None,
                group_by: vec![],
                order_by: vec![],
                limit: None,
                parameters: BTreeMap::new(),
            },
        }
    }
}

impl QuerySpecBuilder {
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.spec.source = Some(source.into());
        self
    }

    pub fn select(mut self, item: SelectItem) -> Self {
        self.spec.select.push(item);
        self
    }

    pub fn select_fields<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec
            .select
            .extend(names.into_iter().map(|n| SelectItem::field(n)));
        self
    }

    pub fn condition(mut self, condition: Option<Condition>) -> Self {
        self.spec.condition = condition;
        self
    }

    pub fn filter(self, condition: Condition) -> Self {
        self.condition(Some(condition))
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.spec.group_by.push(field.into());
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.spec.order_by.push(key);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.spec.limit = Some(n);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.parameters.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> QuerySpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    #[test]
    fn renders_full_query() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .select_fields(["region"])
            .select(SelectItem::aggregate(Aggregation::Sum("qty".into())))
            .filter(Condition::eq("status", Scalar::Str("open".into())))
            .group_by("region")
            .order_by(SortKey::desc("region"))
            .limit(5)
            .build();
        assert_eq!(
            q.to_string(),
            "SELECT region, SUM(qty) FROM orders WHERE status = 'open' GROUP BY region ORDER BY region DESC LIMIT 5"
        );
    }

    #[test]
    fn prefix_limit_only_for_bare_limits() {
        let bare = QuerySpec::builder().from_source("s").limit(3).build();
        assert_eq!(bare.row_prefix_limit(), Some(3));
        let sorted = bare.to_builder().order_by(SortKey::asc("a")).build();
        assert_eq!(sorted.row_prefix_limit(), None);
    }

    #[test]
    fn no_source_queries() {
        let q = QuerySpec::builder()
            .select(SelectItem::constant(Scalar::I64(1), "one"))
            .build();
        assert!(q.is_no_source());
        assert_eq!(q.to_string(), "SELECT 1 AS one");
    }
}
