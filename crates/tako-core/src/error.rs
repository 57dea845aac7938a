use thiserror::Error;

/// Error taxonomy shared across the runtime.
///
/// These are *kinds*, not exhaustive per-cause variants: each component adds
/// its own context via the `String`/source payload rather than growing new
/// variants per failure site.
#[derive(Debug, Error)]
pub enum TakoError {
    /// Missing workspace, locked instance, tracked secrets. Fatal at startup.
    #[error("precondition failed: {0}")]
    PreconditionFailure(String),

    /// No ready inference provider. Not fatal — callers fall back to a
    /// diagnostic status string or heuristics.
    #[error("no inference provider is ready: {0}")]
    ProviderUnavailable(String),

    /// A specific provider attempt failed or timed out.
    #[error("provider {provider} failed: {summary}")]
    ProviderExecutionError { provider: String, summary: String },

    /// Event log write, sensor fetch, subprocess spawn glitch — retried on
    /// the next cadence.
    #[error("transient I/O error: {0}")]
    TransientIOError(String),

    /// Malformed command or argument. Never raised past the input router;
    /// surfaced inline to the operator.
    #[error("invalid input: {0}")]
    OperatorInputError(String),

    /// Type2 daily budget consumed.
    #[error("type2 daily budget exhausted ({used}/{budget})")]
    BudgetExhausted { used: u32, budget: u32 },

    /// A bounded wait expired and the child was killed.
    #[error("subprocess timed out after {0:?}")]
    SubprocessTimeout(std::time::Duration),
}

pub type TakoResult<T> = Result<T, TakoError>;
