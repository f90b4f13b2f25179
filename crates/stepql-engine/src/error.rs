use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("step '{step}' not found in pipeline '{pipeline}'")]
    StepNotFound { pipeline: String, step: String },

    #[error("step '{0}' does not accept injected rows")]
    NotAnInjector(String),

    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("pipeline '{0}' was already started")]
    AlreadyStarted(String),

    #[error("step execution: {0}")]
    Step(String),

    #[error("worker thread: {0}")]
    Thread(String),

    #[error(transparent)]
    Core(#[from] stepql_core::error::Error),
}
