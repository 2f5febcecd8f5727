#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("unknown {kind} '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("plugin: {0}")]
    Plugin(#[from] bridge_api::ConfigError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("task: {0}")]
    Task(#[from] tokio::task::JoinError),
}
