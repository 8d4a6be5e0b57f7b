/*!
Observability for archive sessions.

This module provides:
- Logging setup for binaries and tests (`tracing-subscriber` with an env filter)
- Prometheus counters for sessions, objects and identity hits (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "metrics")]
use crate::codec::Direction;
use crate::{ArchiveError, Result};

/// Default filter directive when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "archive_core=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<ArchiveMetrics>> = OnceLock::new();

/// Counters describing archive activity
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct ArchiveMetrics {
    pub sessions_total: IntCounterVec,
    pub objects_written_total: IntCounter,
    pub objects_read_total: IntCounter,
    pub identity_hits_total: IntCounter,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl ArchiveMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let sessions_total = IntCounterVec::new(
            Opts::new("archive_sessions_total", "Archive sessions opened"),
            &["direction"],
        )
        .map_err(|e| ArchiveError::config(format!("Failed to create sessions_total metric: {e}")))?;

        let objects_written_total = IntCounter::new(
            "archive_objects_written_total",
            "Distinct objects written through pointers",
        )
        .map_err(|e| {
            ArchiveError::config(format!("Failed to create objects_written_total metric: {e}"))
        })?;

        let objects_read_total = IntCounter::new(
            "archive_objects_read_total",
            "Distinct objects created while reading pointers",
        )
        .map_err(|e| {
            ArchiveError::config(format!("Failed to create objects_read_total metric: {e}"))
        })?;

        let identity_hits_total = IntCounter::new(
            "archive_identity_hits_total",
            "Pointers resolved to an object already in the session",
        )
        .map_err(|e| {
            ArchiveError::config(format!("Failed to create identity_hits_total metric: {e}"))
        })?;

        registry
            .register(Box::new(sessions_total.clone()))
            .map_err(|e| ArchiveError::config(format!("Failed to register sessions_total: {e}")))?;
        registry
            .register(Box::new(objects_written_total.clone()))
            .map_err(|e| {
                ArchiveError::config(format!("Failed to register objects_written_total: {e}"))
            })?;
        registry
            .register(Box::new(objects_read_total.clone()))
            .map_err(|e| {
                ArchiveError::config(format!("Failed to register objects_read_total: {e}"))
            })?;
        registry
            .register(Box::new(identity_hits_total.clone()))
            .map_err(|e| {
                ArchiveError::config(format!("Failed to register identity_hits_total: {e}"))
            })?;

        Ok(Self {
            sessions_total,
            objects_written_total,
            objects_read_total,
            identity_hits_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the counters could not be created, in which case
    /// recording is silently skipped.
    pub fn global() -> Option<&'static ArchiveMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "archive metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_session(&self, direction: Direction) {
        let label = match direction {
            Direction::Write => "write",
            Direction::Read => "read",
        };
        self.sessions_total.with_label_values(&[label]).inc();
    }

    pub fn record_object(&self, direction: Direction) {
        match direction {
            Direction::Write => self.objects_written_total.inc(),
            Direction::Read => self.objects_read_total.inc(),
        }
    }

    pub fn record_identity_hit(&self) {
        self.identity_hits_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ArchiveError::config(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| ArchiveError::config(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Run `record` against the global metrics, if they are available
#[cfg(feature = "metrics")]
pub(crate) fn with_metrics(record: impl FnOnce(&ArchiveMetrics)) {
    if let Some(metrics) = ArchiveMetrics::global() {
        record(metrics);
    }
}

fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let directive = if verbose { "archive_core=debug" } else { DEFAULT_LOG_DIRECTIVE };
    let directive = directive
        .parse()
        .map_err(|e| ArchiveError::config(format!("Invalid log directive {directive}: {e}")))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Install a human-readable subscriber on stderr
///
/// # Arguments
/// * `verbose` - Raise the archive targets to `debug`
pub fn init_logging(verbose: bool) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    tracing_subscriber::registry()
        .with(env_filter(verbose)?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ArchiveError::config(format!("Failed to set global tracing subscriber: {e}")))
}

/// Install a JSON subscriber on stderr, for log shippers
pub fn init_json_logging() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(env_filter(false)?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ArchiveError::config(format!("Failed to set global tracing subscriber: {e}")))?;

    tracing::info!("archive logging initialized");
    Ok(())
}
