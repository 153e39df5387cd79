//! Feature flags with fallbacks for graceful degradation.
//!
//! Each named feature is either enabled (the default for unknown names) or
//! disabled, and may carry a [`Fallback`]. The rules of
//! [`GracefulDegradationRegistry::execute_with_degradation`]:
//!
//! | Feature  | Operation | Fallback        | Result                         |
//! |----------|-----------|-----------------|--------------------------------|
//! | disabled | not run   | none            | `FeatureDisabled`              |
//! | disabled | not run   | ok / err        | fallback value / `FallbackFailed` |
//! | enabled  | ok        | any             | operation value                |
//! | enabled  | err       | none            | `Operation(err)`               |
//! | enabled  | err       | ok              | fallback value                 |
//! | enabled  | err       | err             | `Operation(err)`               |
//!
//! A failing fallback never replaces the primary error.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use keelson_common::resilience::{BoxedError, ResilienceError, ResilienceResult};
use tracing::{debug, error, info, warn};

/// Future returned by a fallback producer
pub type FallbackFuture<T> = BoxFuture<'static, Result<T, BoxedError>>;

type Producer<T> = Arc<dyn Fn() -> FallbackFuture<T> + Send + Sync>;

/// Substitute result for a degraded feature.
pub enum Fallback<T> {
    /// Static value, cloned on every use
    Value(T),
    /// Computed on every use; may fail
    Producer(Producer<T>),
}

impl<T: Clone + Send + 'static> Fallback<T> {
    pub fn producer<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxedError>> + Send + 'static,
    {
        Self::Producer(Arc::new(move || Box::pin(producer())))
    }

    async fn produce(&self) -> Result<T, BoxedError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Producer(producer) => producer().await,
        }
    }
}

impl<T: Clone> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Producer(producer) => Self::Producer(Arc::clone(producer)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Feature flags and fallbacks for operations producing `T`.
pub struct GracefulDegradationRegistry<T> {
    features: DashMap<String, bool>,
    fallbacks: DashMap<String, Fallback<T>>,
}

impl<T> fmt::Debug for GracefulDegradationRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulDegradationRegistry")
            .field("features", &self.features.len())
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for GracefulDegradationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> GracefulDegradationRegistry<T> {
    pub fn new() -> Self {
        Self { features: DashMap::new(), fallbacks: DashMap::new() }
    }

    pub fn set_feature_status(&self, name: &str, enabled: bool) {
        let previous = self.features.insert(name.to_string(), enabled);
        if previous != Some(enabled) {
            info!(name, enabled, "Feature status changed");
        }
    }

    /// Unknown features are enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.features.get(name).map_or(true, |enabled| *enabled)
    }

    pub fn set_fallback(&self, name: &str, fallback: Fallback<T>) {
        self.fallbacks.insert(name.to_string(), fallback);
    }

    pub fn remove_fallback(&self, name: &str) -> bool {
        self.fallbacks.remove(name).is_some()
    }

    pub fn has_fallback(&self, name: &str) -> bool {
        self.fallbacks.contains_key(name)
    }

    /// Explicitly configured feature flags, sorted by name
    pub fn features(&self) -> BTreeMap<String, bool> {
        self.features.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
    }

    /// Runs `operation` for feature `name`, degrading to its fallback.
    ///
    /// See the module docs for the full outcome table.
    pub async fn execute_with_degradation<F, Fut, E>(
        &self,
        name: &str,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        // Clone out of the map so no shard lock is held across an await
        let fallback = self.fallbacks.get(name).map(|entry| entry.value().clone());

        if !self.is_enabled(name) {
            let Some(fallback) = fallback else {
                debug!(name, "Feature disabled without fallback");
                return Err(ResilienceError::FeatureDisabled { name: name.to_string() });
            };
            debug!(name, "Feature disabled, serving fallback");
            return fallback
                .produce()
                .await
                .map_err(|source| ResilienceError::FallbackFailed { name: name.to_string(), source });
        }

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(fallback) = fallback else {
            return Err(ResilienceError::Operation(error));
        };

        warn!(name, error = %error, "Operation failed, serving fallback");
        match fallback.produce().await {
            Ok(value) => Ok(value),
            Err(fallback_error) => {
                error!(
                    name,
                    error = %error,
                    fallback_error = %fallback_error,
                    "Fallback failed, returning original error"
                );
                Err(ResilienceError::Operation(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn failing() -> impl Future<Output = Result<String, io::Error>> {
        async { Err(io::Error::other("upstream down")) }
    }

    /// Validates that unknown features are enabled and run the operation.
    #[tokio::test]
    async fn test_unknown_feature_runs_operation() {
        let registry = GracefulDegradationRegistry::<String>::new();
        assert!(registry.is_enabled("recommendations"));

        let result = registry
            .execute_with_degradation("recommendations", || async {
                Ok::<_, io::Error>("live".to_string())
            })
            .await;
        assert_eq!(result.ok().as_deref(), Some("live"));
    }

    /// Validates that a disabled feature without a fallback fails with
    /// `FeatureDisabled` and never runs the operation.
    #[tokio::test]
    async fn test_disabled_without_fallback() {
        let registry = GracefulDegradationRegistry::<String>::new();
        registry.set_feature_status("search", false);
        let calls = AtomicU32::new(0);

        let result = registry
            .execute_with_degradation("search", || {
                calls.fetch_add(1, Ordering::SeqCst);
                failing()
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::FeatureDisabled { ref name }) if name == "search"));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "Disabled feature must not run");
    }

    /// Validates that a disabled feature serves its fallback.
    #[tokio::test]
    async fn test_disabled_serves_fallback() {
        let registry = GracefulDegradationRegistry::new();
        registry.set_feature_status("search", false);
        registry.set_fallback("search", Fallback::Value("cached".to_string()));

        let result = registry.execute_with_degradation("search", failing).await;
        assert_eq!(result.ok().as_deref(), Some("cached"));
    }

    /// Validates that a failing fallback on a disabled feature surfaces as
    /// `FallbackFailed`.
    #[tokio::test]
    async fn test_disabled_fallback_failure() {
        let registry = GracefulDegradationRegistry::<String>::new();
        registry.set_feature_status("search", false);
        registry.set_fallback(
            "search",
            Fallback::producer(|| async { Err::<String, BoxedError>("cache empty".into()) }),
        );

        let result = registry.execute_with_degradation("search", failing).await;
        match result {
            Err(ResilienceError::FallbackFailed { name, source }) => {
                assert_eq!(name, "search");
                assert_eq!(source.to_string(), "cache empty");
            }
            other => panic!("Expected FallbackFailed, got {other:?}"),
        }
    }

    /// Validates that an enabled feature falls back when the operation fails.
    #[tokio::test]
    async fn test_enabled_failure_uses_fallback() {
        let registry = GracefulDegradationRegistry::new();
        let produced = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&produced);
        registry.set_fallback(
            "feed",
            Fallback::producer(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("static feed".to_string())
                }
            }),
        );

        let result = registry.execute_with_degradation("feed", failing).await;
        assert_eq!(result.ok().as_deref(), Some("static feed"));
        assert_eq!(produced.load(Ordering::SeqCst), 1);
    }

    /// Validates that without a fallback the original error propagates.
    #[tokio::test]
    async fn test_enabled_failure_without_fallback() {
        let registry = GracefulDegradationRegistry::<String>::new();
        let result = registry.execute_with_degradation("feed", failing).await;

        match result {
            Err(ResilienceError::Operation(err)) => assert_eq!(err.to_string(), "upstream down"),
            other => panic!("Expected original error, got {other:?}"),
        }
    }

    /// Validates that a failing fallback never replaces the primary error.
    #[tokio::test]
    async fn test_primary_error_wins_over_fallback_error() {
        let registry = GracefulDegradationRegistry::<String>::new();
        registry.set_fallback(
            "feed",
            Fallback::producer(|| async { Err::<String, BoxedError>("fallback broke".into()) }),
        );

        let result = registry.execute_with_degradation("feed", failing).await;
        match result {
            Err(ResilienceError::Operation(err)) => assert_eq!(err.to_string(), "upstream down"),
            other => panic!("Expected primary error, got {other:?}"),
        }
    }

    #[test]
    fn test_feature_listing() {
        let registry = GracefulDegradationRegistry::<u32>::new();
        registry.set_feature_status("b", false);
        registry.set_feature_status("a", true);
        registry.set_fallback("a", Fallback::Value(1));

        let features: Vec<_> = registry.features().into_iter().collect();
        assert_eq!(features, vec![("a".to_string(), true), ("b".to_string(), false)]);
        assert!(registry.has_fallback("a"));
        assert!(registry.remove_fallback("a"));
        assert!(!registry.has_fallback("a"));
    }
}
