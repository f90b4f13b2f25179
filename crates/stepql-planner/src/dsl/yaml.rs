//! YAML → `PipelineDef` for linear pipelines.
//!
//! Example:
//! ```yaml
//! name: orders
//! parameters: { REGION: "" }
//! steps:
//!   - name: read
//!     type: table
//!     fields:
//!       - { name: region, data_type: Utf8 }
//!       - { name: qty, data_type: Int64 }
//!     rows: [["east", 1], ["west", 2]]
//!     query: "SELECT * FROM orders WHERE region = '${REGION}'"
//!     bindings: { REGION: region }
//!   - name: out
//!     type: dummy
//! ```
//!
//! A document may also hold several pipelines under a `pipelines:` key.

use serde::{Deserialize, Serialize};

use stepql_core::pipeline::PipelineDef;

use crate::error::PlanError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub pipelines: Vec<PipelineDef>,
}

/// Parse and validate a single pipeline.
pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<PipelineDef, PlanError> {
    let def: PipelineDef = serde_yaml::from_str(yaml_src)?;
    def.validate()?;
    Ok(def)
}

/// Parse and validate a `pipelines:` document.
pub fn parse_yaml_pipelines(yaml_src: &str) -> Result<Vec<PipelineDef>, PlanError> {
    let doc: PipelineDocument = serde_yaml::from_str(yaml_src)?;
    for def in &doc.pipelines {
        def.validate()?;
    }
    Ok(doc.pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::pipeline::StepKind;

    const ORDERS: &str = r#"
name: orders
parameters: { REGION: "" }
steps:
  - name: read
    type: table
    fields:
      - { name: region, data_type: Utf8 }
      - { name: qty, data_type: Int64, nullable: false }
    rows: [["east", 1], ["west", 2]]
    query: "SELECT * FROM orders WHERE region = '${REGION}'"
    bindings: { REGION: region }
  - name: top
    type: limit
    count: 1
  - name: out
    type: dummy
"#;

    #[test]
    fn parses_table_pipeline() {
        let def = parse_yaml_pipeline(ORDERS).unwrap();
        assert_eq!(def.name, "orders");
        assert_eq!(def.parameters.get("REGION").map(String::as_str), Some(""));
        assert_eq!(def.steps.len(), 3);
        match &def.steps[0].kind {
            StepKind::Table {
                fields,
                rows,
                bindings,
                ..
            } => {
                assert_eq!(fields.len(), 2);
                assert!(!fields[1].nullable);
                assert_eq!(rows.len(), 2);
                assert_eq!(bindings.get("REGION").map(String::as_str), Some("region"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(def.steps[1].kind, StepKind::Limit { count: 1, offset: 0 });
    }

    #[test]
    fn rejects_pipeline_without_source() {
        let src = "name: bad\nsteps:\n  - name: out\n    type: dummy\n";
        assert!(matches!(parse_yaml_pipeline(src), Err(PlanError::Core(_))));
    }

    #[test]
    fn parses_document_of_pipelines() {
        let src = r#"
pipelines:
  - name: numbers
    steps:
      - { name: gen, type: sequence, field: n, count: 10 }
  - name: intake
    steps:
      - name: in
        type: injector
        fields: [{ name: n, data_type: Int64 }]
"#;
        let defs = parse_yaml_pipelines(src).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].steps[0].kind.label(), "injector");
    }
}
