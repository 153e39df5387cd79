//! Tracing subscriber setup
//!
//! [`init_tracing`] installs the process-wide subscriber once. The filter is
//! taken from `RUST_LOG` when set, otherwise from [`LoggingConfig::level`].

use keelson_domain::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// A global subscriber is already installed
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,

    /// The level directive in the config could not be parsed
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
}

pub type ObservabilityResult<T> = Result<T, ObservabilityError>;

impl From<ObservabilityError> for keelson_domain::KeelsonError {
    fn from(err: ObservabilityError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Build the filter: `RUST_LOG` first, then the configured level.
fn build_filter(config: &LoggingConfig) -> ObservabilityResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ObservabilityError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber.
///
/// # Errors
/// `AlreadyInitialized` when a subscriber is already set, `InvalidFilter`
/// for a malformed level directive.
pub fn init_tracing(config: &LoggingConfig) -> ObservabilityResult<()> {
    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|_| ObservabilityError::AlreadyInitialized)?;

    tracing::debug!(level = %config.level, format = ?config.format, "Tracing initialized");
    Ok(())
}
