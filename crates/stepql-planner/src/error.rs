use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("invalid query: {0}")]
    Invalid(String),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] stepql_core::error::Error),
}
