//! Inference bridge: provider discovery, subprocess execution
//! with per-provider fallback, and streaming with a watchdog heartbeat.

pub mod exec;
pub mod provider;
pub mod runtime;
pub mod settings;
pub mod stream;

pub use exec::{run, run_with_fallback};
pub use provider::{discover_provider, AuthKind, ProviderStatus, PROVIDER_PRIORITY};
pub use runtime::{discover_inference_runtime, format_runtime_lines, InferenceRuntime};
pub use settings::InferenceSettings;
pub use stream::{stream_with_fallback, StreamEventKind, StreamSink};
