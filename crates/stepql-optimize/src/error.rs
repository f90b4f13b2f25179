use stepql_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error("translation: {0}")]
    Translation(String),

    #[error("no running source pipeline for optimization '{0}'")]
    NoSourcePipeline(String),

    #[error("duplicate optimization '{name}' for source '{source_name}'")]
    Duplicate { source_name: String, name: String },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] stepql_core::error::Error),
}
