//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters the Basic scheme reports to the cache manager.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    verifications_total: IntCounter,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    in_flight: IntGauge,
    cached_users: IntGauge,
    decode_failures_total: IntCounterVec,
    verdicts_total: IntCounterVec,
}

/// Snapshot of the Basic scheme counters for statistics reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests handled by the authenticator.
    pub verifications_total: u64,
    /// Requests answered from a fresh cached verdict.
    pub cache_hits_total: u64,
    /// Requests that needed a helper round trip (submitted or coalesced).
    pub cache_misses_total: u64,
    /// Verifications currently awaiting a helper reply.
    pub in_flight: i64,
    /// Distinct usernames held in the user cache.
    pub cached_users: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let verifications_total = register(
            &registry,
            "basic_verifications_total",
            IntCounter::with_opts(Opts::new(
                "basic_verifications_total",
                "Authorization headers handled by the Basic authenticator",
            )),
        )?;
        let cache_hits_total = register(
            &registry,
            "basic_cache_hits_total",
            IntCounter::with_opts(Opts::new(
                "basic_cache_hits_total",
                "Requests answered from the user cache",
            )),
        )?;
        let cache_misses_total = register(
            &registry,
            "basic_cache_misses_total",
            IntCounter::with_opts(Opts::new(
                "basic_cache_misses_total",
                "Requests that waited on a helper verdict",
            )),
        )?;
        let in_flight = register(
            &registry,
            "basic_in_flight",
            IntGauge::with_opts(Opts::new(
                "basic_in_flight",
                "Verifications awaiting a helper reply",
            )),
        )?;
        let cached_users = register(
            &registry,
            "basic_cached_users",
            IntGauge::with_opts(Opts::new(
                "basic_cached_users",
                "Usernames held in the user cache",
            )),
        )?;
        let decode_failures_total = register(
            &registry,
            "basic_decode_failures_total",
            IntCounterVec::new(
                Opts::new(
                    "basic_decode_failures_total",
                    "Authorization headers rejected before verification",
                ),
                &["reason"],
            ),
        )?;
        let verdicts_total = register(
            &registry,
            "basic_verdicts_total",
            IntCounterVec::new(
                Opts::new("basic_verdicts_total", "Helper verdicts by outcome"),
                &["outcome"],
            ),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                verifications_total,
                cache_hits_total,
                cache_misses_total,
                in_flight,
                cached_users,
                decode_failures_total,
                verdicts_total,
            }),
        })
    }

    /// Count one `Proxy-Authorization` header handled, decodable or not.
    pub fn inc_verification(&self) {
        self.inner.verifications_total.inc();
    }

    /// Increment the cache hit counter.
    pub fn inc_cache_hit(&self) {
        self.inner.cache_hits_total.inc();
    }

    /// Increment the cache miss counter.
    pub fn inc_cache_miss(&self) {
        self.inner.cache_misses_total.inc();
    }

    /// Track a verification entering flight.
    pub fn inc_in_flight(&self) {
        self.inner.in_flight.inc();
    }

    /// Track a verification leaving flight.
    pub fn dec_in_flight(&self) {
        self.inner.in_flight.dec();
    }

    /// Set the cached user gauge.
    pub fn set_cached_users(&self, count: usize) {
        self.inner
            .cached_users
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Increment the decode failure counter for the given reason.
    pub fn inc_decode_failure(&self, reason: &str) {
        self.inner
            .decode_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Increment the verdict counter for the given outcome.
    pub fn inc_verdict(&self, outcome: &str) {
        self.inner.verdicts_total.with_label_values(&[outcome]).inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the scheme counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            verifications_total: self.inner.verifications_total.get(),
            cache_hits_total: self.inner.cache_hits_total.get(),
            cache_misses_total: self.inner.cache_misses_total.get(),
            in_flight: self.inner.in_flight.get(),
            cached_users: self.inner.cached_users.get(),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector =
        collector.map_err(|source| TelemetryError::MetricsCollector { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_verification();
        metrics.inc_cache_hit();
        metrics.inc_cache_hit();
        metrics.inc_cache_miss();
        metrics.inc_in_flight();
        metrics.inc_in_flight();
        metrics.dec_in_flight();
        metrics.set_cached_users(3);
        metrics.inc_decode_failure("no_password");
        metrics.inc_verdict("ok");

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                verifications_total: 1,
                cache_hits_total: 2,
                cache_misses_total: 1,
                in_flight: 1,
                cached_users: 3,
            }
        );

        let rendered = metrics.render()?;
        assert!(rendered.contains("basic_verifications_total"));
        assert!(rendered.contains("basic_decode_failures_total"));
        assert!(rendered.contains("reason=\"no_password\""));
        assert!(rendered.contains("basic_verdicts_total"));
        Ok(())
    }

    #[test]
    fn separate_registries_do_not_collide() -> anyhow::Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_cache_hit();
        assert_eq!(second.snapshot().cache_hits_total, 0);
        Ok(())
    }
}
