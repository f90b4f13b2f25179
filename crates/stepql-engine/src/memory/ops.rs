//! Row-at-a-time transform steps and output-schema derivation.

use std::collections::HashMap;

use stepql_core::condition::Condition;
use stepql_core::pipeline::{AggregateDef, PipelineDef, StepKind};
use stepql_core::query::{Aggregation, SelectItem, SortKey};
use stepql_core::schema::{DataType, Field, Schema};
use stepql_core::types::{Row, Scalar};

use crate::error::EngineError;

/// Whether a step wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The step has produced everything it ever will.
    Done,
}

/// A transform step. `push` may emit any number of rows into `out`;
/// `finish` flushes whatever the step buffered.
pub trait StepOp: Send {
    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> Result<Flow, EngineError>;

    fn finish(&mut self, _out: &mut Vec<Row>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Output schema of every step, in definition order.
pub fn derive_schemas(def: &PipelineDef) -> Result<Vec<Schema>, EngineError> {
    def.validate()?;
    let mut out: Vec<Schema> = Vec::with_capacity(def.steps.len());
    for step in &def.steps {
        let schema = match &step.kind {
            StepKind::Table { fields, .. } | StepKind::Injector { fields } => {
                Schema::new(fields.clone())
            }
            StepKind::Sequence { field, .. } => {
                Schema::new(vec![Field::new(field.clone(), DataType::Int64, false)])
            }
            kind => {
                let input = out.last().ok_or_else(|| {
                    EngineError::InvalidDefinition(format!("step '{}' has no input", step.name))
                })?;
                transform_schema(kind, input)
                    .map_err(|e| EngineError::InvalidDefinition(format!("step '{}': {}", step.name, e)))?
            }
        };
        out.push(schema);
    }
    Ok(out)
}

fn transform_schema(kind: &StepKind, input: &Schema) -> Result<Schema, EngineError> {
    Ok(match kind {
        StepKind::Filter { condition } => {
            for f in condition.fields() {
                input.require(f)?;
            }
            input.clone()
        }
        StepKind::Sort { keys } => {
            for k in keys {
                input.require(&k.field)?;
            }
            input.clone()
        }
        StepKind::Limit { .. } | StepKind::Dummy => input.clone(),
        StepKind::Select { items } => {
            let mut fields = Vec::new();
            for item in items {
                match item {
                    SelectItem::Wildcard => fields.extend(input.fields.iter().cloned()),
                    SelectItem::Field { name, .. } => {
                        let src = &input.fields[input.require(name)?];
                        let out_name = item.output_name().unwrap_or_else(|| name.clone());
                        fields.push(Field::new(out_name, src.data_type, src.nullable));
                    }
                    SelectItem::Aggregate { function, alias } => {
                        // Aggregates were computed upstream under their output name
                        let computed = alias.clone().unwrap_or_else(|| function.default_alias());
                        let src = &input.fields[input.require(&computed)?];
                        fields.push(src.clone());
                    }
                    SelectItem::Constant { value, alias } => fields.push(Field::new(
                        alias.clone(),
                        value.data_type().unwrap_or(DataType::Utf8),
                        true,
                    )),
                }
            }
            Schema::new(fields)
        }
        StepKind::Aggregate {
            group_by,
            aggregates,
        } => {
            let mut fields = Vec::new();
            for g in group_by {
                fields.push(input.fields[input.require(g)?].clone());
            }
            for agg in aggregates {
                fields.push(Field::new(
                    agg.alias.clone(),
                    aggregate_type(&agg.function, input)?,
                    !matches!(agg.function, Aggregation::Count),
                ));
            }
            Schema::new(fields)
        }
        StepKind::Table { .. } | StepKind::Sequence { .. } | StepKind::Injector { .. } => {
            return Err(EngineError::InvalidDefinition(
                "source step in transform position".into(),
            ))
        }
    })
}

fn aggregate_type(function: &Aggregation, input: &Schema) -> Result<DataType, EngineError> {
    let field_type = |name: &str| -> Result<DataType, EngineError> {
        Ok(input.fields[input.require(name)?].data_type)
    };
    Ok(match function {
        Aggregation::Count => DataType::Int64,
        Aggregation::Avg(f) => {
            field_type(f)?;
            DataType::Float64
        }
        Aggregation::Sum(f) => match field_type(f)? {
            DataType::Int32 | DataType::Int64 => DataType::Int64,
            DataType::Float32 | DataType::Float64 => DataType::Float64,
            other => {
                return Err(EngineError::InvalidDefinition(format!(
                    "cannot SUM field '{}' of type {}",
                    f, other
                )))
            }
        },
        Aggregation::Min(f) | Aggregation::Max(f) => field_type(f)?,
    })
}

/// Build the operator for a transform step reading `input`.
pub fn build_op(kind: &StepKind, input: &Schema) -> Result<Box<dyn StepOp>, EngineError> {
    Ok(match kind {
        StepKind::Filter { condition } => Box::new(FilterOp {
            condition: condition.clone(),
            schema: input.clone(),
        }),
        StepKind::Select { items } => Box::new(SelectOp::new(items, input)?),
        StepKind::Aggregate {
            group_by,
            aggregates,
        } => Box::new(AggregateOp::new(group_by, aggregates, input)?),
        StepKind::Sort { keys } => Box::new(SortOp::new(keys, input)?),
        StepKind::Limit { count, offset } => Box::new(LimitOp {
            count: *count,
            offset: *offset,
            seen: 0,
            emitted: 0,
        }),
        StepKind::Dummy => Box::new(PassThrough),
        other => {
            return Err(EngineError::InvalidDefinition(format!(
                "{} is not a transform step",
                other.label()
            )))
        }
    })
}

struct PassThrough;

impl StepOp for PassThrough {
    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        out.push(row);
        Ok(Flow::Continue)
    }
}

struct FilterOp {
    condition: Condition,
    schema: Schema,
}

impl StepOp for FilterOp {
    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        if self.condition.evaluate(&self.schema, &row)? {
            out.push(row);
        }
        Ok(Flow::Continue)
    }
}

enum Projection {
    Column(usize),
    Columns(Vec<usize>),
    Constant(Scalar),
}

struct SelectOp {
    projections: Vec<Projection>,
}

impl SelectOp {
    fn new(items: &[SelectItem], input: &Schema) -> Result<Self, EngineError> {
        let mut projections = Vec::with_capacity(items.len());
        for item in items {
            projections.push(match item {
                SelectItem::Wildcard => Projection::Columns((0..input.len()).collect()),
                SelectItem::Field { name, .. } => Projection::Column(input.require(name)?),
                SelectItem::Aggregate { function, alias } => {
                    let computed = alias.clone().unwrap_or_else(|| function.default_alias());
                    Projection::Column(input.require(&computed)?)
                }
                SelectItem::Constant { value, .. } => Projection::Constant(value.clone()),
            });
        }
        Ok(Self { projections })
    }
}

impl StepOp for SelectOp {
    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        let mut values = Vec::with_capacity(self.projections.len());
        for p in &self.projections {
            match p {
                Projection::Column(i) => values.push(row.values[*i].clone()),
                Projection::Columns(idx) => {
                    values.extend(idx.iter().map(|i| row.values[*i].clone()))
                }
                Projection::Constant(v) => values.push(v.clone()),
            }
        }
        out.push(Row::new(values));
        Ok(Flow::Continue)
    }
}

#[derive(Debug, Clone)]
enum Acc {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Avg { sum: f64, n: u64 },
    Min(Option<Scalar>),
    Max(Option<Scalar>),
}

impl Acc {
    fn new(function: &Aggregation, input_type: Option<DataType>) -> Self {
        match function {
            Aggregation::Count => Acc::Count(0),
            Aggregation::Sum(_) => match input_type {
                Some(DataType::Float32) | Some(DataType::Float64) => Acc::SumFloat(None),
                _ => Acc::SumInt(None),
            },
            Aggregation::Avg(_) => Acc::Avg { sum: 0.0, n: 0 },
            Aggregation::Min(_) => Acc::Min(None),
            Aggregation::Max(_) => Acc::Max(None),
        }
    }

    fn update(&mut self, v: Option<&Scalar>) {
        match self {
            Acc::Count(n) => *n += 1,
            Acc::SumInt(s) => {
                if let Some(x) = v.and_then(|v| v.as_i64()) {
                    *s = Some(s.unwrap_or(0).wrapping_add(x));
                }
            }
            Acc::SumFloat(s) => {
                if let Some(x) = v.and_then(|v| v.as_f64()) {
                    *s = Some(s.unwrap_or(0.0) + x);
                }
            }
            Acc::Avg { sum, n } => {
                if let Some(x) = v.and_then(|v| v.as_f64()) {
                    *sum += x;
                    *n += 1;
                }
            }
            Acc::Min(cur) => {
                if let Some(x) = v.filter(|v| !v.is_null()) {
                    if cur.as_ref().map_or(true, |c| x.sort_cmp(c).is_lt()) {
                        *cur = Some(x.clone());
                    }
                }
            }
            Acc::Max(cur) => {
                if let Some(x) = v.filter(|v| !v.is_null()) {
                    if cur.as_ref().map_or(true, |c| x.sort_cmp(c).is_gt()) {
                        *cur = Some(x.clone());
                    }
                }
            }
        }
    }

    fn value(&self) -> Scalar {
        match self {
            Acc::Count(n) => Scalar::I64(*n),
            Acc::SumInt(s) => s.map(Scalar::I64).unwrap_or(Scalar::Null),
            Acc::SumFloat(s) => s.map(Scalar::F64).unwrap_or(Scalar::Null),
            Acc::Avg { sum, n } => {
                if *n == 0 {
                    Scalar::Null
                } else {
                    Scalar::F64(*sum / *n as f64)
                }
            }
            Acc::Min(v) | Acc::Max(v) => v.clone().unwrap_or(Scalar::Null),
        }
    }
}

/// Hash aggregation keeping groups in first-seen order.
struct AggregateOp {
    key_idx: Vec<usize>,
    /// Input column per aggregate (`None` for `COUNT(*)`).
    input_idx: Vec<Option<usize>>,
    template: Vec<Acc>,
    index: HashMap<String, usize>,
    groups: Vec<(Vec<Scalar>, Vec<Acc>)>,
}

impl AggregateOp {
    fn new(group_by: &[String], aggregates: &[AggregateDef], input: &Schema) -> Result<Self, EngineError> {
        let key_idx = group_by
            .iter()
            .map(|g| input.require(g))
            .collect::<Result<Vec<_>, _>>()?;
        let mut input_idx = Vec::with_capacity(aggregates.len());
        let mut template = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let idx = agg.function.field().map(|f| input.require(f)).transpose()?;
            let dt = idx.and_then(|i| input.field(i)).map(|f| f.data_type);
            input_idx.push(idx);
            template.push(Acc::new(&agg.function, dt));
        }
        Ok(Self {
            key_idx,
            input_idx,
            template,
            index: HashMap::new(),
            groups: Vec::new(),
        })
    }
}

impl StepOp for AggregateOp {
    fn push(&mut self, row: Row, _out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        let key: Vec<Scalar> = self.key_idx.iter().map(|i| row.values[*i].clone()).collect();
        let key_str = serde_json::to_string(&key).map_err(stepql_core::error::Error::from)?;
        let slot = match self.index.get(&key_str) {
            Some(slot) => *slot,
            None => {
                self.groups.push((key, self.template.clone()));
                self.index.insert(key_str, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let accs = &mut self.groups[slot].1;
        for (acc, idx) in accs.iter_mut().zip(&self.input_idx) {
            acc.update(idx.and_then(|i| row.values.get(i)));
        }
        Ok(Flow::Continue)
    }

    fn finish(&mut self, out: &mut Vec<Row>) -> Result<(), EngineError> {
        // A global aggregate over no rows still yields one row
        if self.groups.is_empty() && self.key_idx.is_empty() {
            self.groups.push((vec![], self.template.clone()));
        }
        for (key, accs) in self.groups.drain(..) {
            let mut values = key;
            values.extend(accs.iter().map(Acc::value));
            out.push(Row::new(values));
        }
        self.index.clear();
        Ok(())
    }
}

struct SortOp {
    keys: Vec<(usize, bool)>,
    buf: Vec<Row>,
}

impl SortOp {
    fn new(keys: &[SortKey], input: &Schema) -> Result<Self, EngineError> {
        let keys = keys
            .iter()
            .map(|k| Ok((input.require(&k.field)?, k.ascending)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self { keys, buf: Vec::new() })
    }
}

impl StepOp for SortOp {
    fn push(&mut self, row: Row, _out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        self.buf.push(row);
        Ok(Flow::Continue)
    }

    fn finish(&mut self, out: &mut Vec<Row>) -> Result<(), EngineError> {
        let keys = &self.keys;
        self.buf.sort_by(|a, b| {
            for (idx, asc) in keys {
                let ord = a.values[*idx].sort_cmp(&b.values[*idx]);
                let ord = if *asc { ord } else { ord.reverse() };
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        out.append(&mut self.buf);
        Ok(())
    }
}

struct LimitOp {
    count: u64,
    offset: u64,
    seen: u64,
    emitted: u64,
}

impl StepOp for LimitOp {
    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> Result<Flow, EngineError> {
        if self.emitted >= self.count {
            return Ok(Flow::Done);
        }
        self.seen += 1;
        if self.seen <= self.offset {
            return Ok(Flow::Continue);
        }
        out.push(row);
        self.emitted += 1;
        Ok(if self.emitted >= self.count {
            Flow::Done
        } else {
            Flow::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::pipeline::StepDef;

    fn input() -> Schema {
        Schema::new(vec![
            Field::new("region", DataType::Utf8, true),
            Field::new("qty", DataType::Int64, true),
        ])
    }

    fn rows() -> Vec<Row> {
        [("east", 3), ("west", 5), ("east", 4)]
            .iter()
            .map(|(r, q)| Row::new(vec![Scalar::Str((*r).into()), Scalar::I64(*q)]))
            .collect()
    }

    fn run(op: &mut dyn StepOp, rows: Vec<Row>) -> Vec<Row> {
        let mut out = vec![];
        for r in rows {
            op.push(r, &mut out).unwrap();
        }
        op.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn aggregate_groups_in_first_seen_order() {
        let kind = StepKind::Aggregate {
            group_by: vec!["region".into()],
            aggregates: vec![AggregateDef {
                function: Aggregation::Sum("qty".into()),
                alias: "total".into(),
            }],
        };
        let mut op = build_op(&kind, &input()).unwrap();
        let out = run(op.as_mut(), rows());
        assert_eq!(
            out,
            vec![
                Row::new(vec![Scalar::Str("east".into()), Scalar::I64(7)]),
                Row::new(vec![Scalar::Str("west".into()), Scalar::I64(5)]),
            ]
        );
    }

    #[test]
    fn global_count_over_nothing_is_zero() {
        let kind = StepKind::Aggregate {
            group_by: vec![],
            aggregates: vec![AggregateDef {
                function: Aggregation::Count,
                alias: "n".into(),
            }],
        };
        let mut op = build_op(&kind, &input()).unwrap();
        assert_eq!(run(op.as_mut(), vec![]), vec![Row::new(vec![Scalar::I64(0)])]);
    }

    #[test]
    fn sort_descending() {
        let kind = StepKind::Sort {
            keys: vec![SortKey::desc("qty")],
        };
        let mut op = build_op(&kind, &input()).unwrap();
        let qty: Vec<_> = run(op.as_mut(), rows())
            .into_iter()
            .map(|r| r.values[1].clone())
            .collect();
        assert_eq!(qty, vec![Scalar::I64(5), Scalar::I64(4), Scalar::I64(3)]);
    }

    #[test]
    fn limit_reports_done_on_last_row() {
        let mut op = build_op(&StepKind::Limit { count: 2, offset: 1 }, &input()).unwrap();
        let mut out = vec![];
        let mut flows = vec![];
        for r in rows() {
            flows.push(op.push(r, &mut out).unwrap());
        }
        assert_eq!(flows, vec![Flow::Continue, Flow::Continue, Flow::Done]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn derive_schemas_follows_the_chain() {
        let def = PipelineDef::new("p")
            .with_step(StepDef::new(
                "in",
                StepKind::Injector {
                    fields: input().fields,
                },
            ))
            .with_step(StepDef::new(
                "agg",
                StepKind::Aggregate {
                    group_by: vec!["region".into()],
                    aggregates: vec![AggregateDef {
                        function: Aggregation::Avg("qty".into()),
                        alias: "avg_qty".into(),
                    }],
                },
            ))
            .with_step(StepDef::new(
                "sel",
                StepKind::Select {
                    items: vec![SelectItem::field("avg_qty")],
                },
            ));
        let schemas = derive_schemas(&def).unwrap();
        assert_eq!(schemas[2].names(), vec!["avg_qty"]);
        assert_eq!(schemas[2].fields[0].data_type, DataType::Float64);
    }

    #[test]
    fn unknown_filter_field_is_rejected() {
        let def = PipelineDef::new("p")
            .with_step(StepDef::new(
                "in",
                StepKind::Injector {
                    fields: input().fields,
                },
            ))
            .with_step(StepDef::new(
                "f",
                StepKind::Filter {
                    condition: Condition::eq("nope", Scalar::I64(1)),
                },
            ));
        assert!(matches!(
            derive_schemas(&def),
            Err(EngineError::InvalidDefinition(_))
        ));
    }
}
