//! Fallback resolution for operations that ultimately fail
//!
//! A [`FallbackPolicy`] describes what to return instead of a terminal error.
//! The resolver also keeps a small TTL cache, filled from successful primary
//! calls whose policy is [`FallbackStrategy::CachedValue`], that the cached
//! strategy reads from.
//!
//! Policies are generic over the argument type `A` of the protected call
//! (`()` for argument-less operations) so an alternative service receives the
//! same arguments as the primary operation.

use crate::error::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default lifetime of cached fallback values
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Fallback function receiving the terminal error
pub type FallbackFn<T> =
    Arc<dyn Fn(&RecoveryError) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Alternative service invoked with the primary operation's arguments
pub type AlternativeFn<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Predicate deciding whether a fallback applies to an error
pub type FallbackCondition = Arc<dyn Fn(&RecoveryError) -> bool + Send + Sync>;

/// Fallback kinds, used as statistics keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackType {
    DefaultValue,
    CachedValue,
    CustomFunction,
    SkipOperation,
    AlternativeService,
}

impl fmt::Display for FallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackType::DefaultValue => "default_value",
            FallbackType::CachedValue => "cached_value",
            FallbackType::CustomFunction => "custom_function",
            FallbackType::SkipOperation => "skip_operation",
            FallbackType::AlternativeService => "alternative_service",
        };
        f.write_str(name)
    }
}

/// Substitute behavior, one variant per fallback kind
pub enum FallbackStrategy<T, A = ()> {
    /// Return a configured value
    DefaultValue(T),
    /// Return the last cached successful result for the key
    CachedValue,
    /// Compute a value from the error
    CustomFunction(FallbackFn<T>),
    /// Return a sentinel meaning "skipped"
    SkipOperation(T),
    /// Call another service with the original arguments
    AlternativeService(AlternativeFn<A, T>),
}

impl<T: Clone, A> Clone for FallbackStrategy<T, A> {
    fn clone(&self) -> Self {
        match self {
            Self::DefaultValue(value) => Self::DefaultValue(value.clone()),
            Self::CachedValue => Self::CachedValue,
            Self::CustomFunction(f) => Self::CustomFunction(f.clone()),
            Self::SkipOperation(value) => Self::SkipOperation(value.clone()),
            Self::AlternativeService(f) => Self::AlternativeService(f.clone()),
        }
    }
}

impl<T: fmt::Debug, A> fmt::Debug for FallbackStrategy<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultValue(value) => f.debug_tuple("DefaultValue").field(value).finish(),
            Self::CachedValue => write!(f, "CachedValue"),
            Self::CustomFunction(_) => write!(f, "CustomFunction(<function>)"),
            Self::SkipOperation(value) => f.debug_tuple("SkipOperation").field(value).finish(),
            Self::AlternativeService(_) => write!(f, "AlternativeService(<function>)"),
        }
    }
}

impl<T, A> FallbackStrategy<T, A> {
    /// Kind of this strategy
    pub fn fallback_type(&self) -> FallbackType {
        match self {
            Self::DefaultValue(_) => FallbackType::DefaultValue,
            Self::CachedValue => FallbackType::CachedValue,
            Self::CustomFunction(_) => FallbackType::CustomFunction,
            Self::SkipOperation(_) => FallbackType::SkipOperation,
            Self::AlternativeService(_) => FallbackType::AlternativeService,
        }
    }
}

/// Declarative fallback description
pub struct FallbackPolicy<T, A = ()> {
    /// What to return
    pub strategy: FallbackStrategy<T, A>,
    /// Only errors accepted by this predicate get a fallback
    pub condition: Option<FallbackCondition>,
    /// Cache lifetime for `CachedValue` entries
    pub cache_ttl: Option<Duration>,
}

impl<T: Clone, A> Clone for FallbackPolicy<T, A> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy.clone(),
            condition: self.condition.clone(),
            cache_ttl: self.cache_ttl,
        }
    }
}

impl<T: fmt::Debug, A> fmt::Debug for FallbackPolicy<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("strategy", &self.strategy)
            .field("condition", &self.condition.as_ref().map(|_| "<function>"))
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl<T, A> FallbackPolicy<T, A> {
    /// Policy from a strategy, no condition
    pub fn new(strategy: FallbackStrategy<T, A>) -> Self {
        Self {
            strategy,
            condition: None,
            cache_ttl: None,
        }
    }

    /// Return `value` on failure
    pub fn default_value(value: T) -> Self {
        Self::new(FallbackStrategy::DefaultValue(value))
    }

    /// Serve the cached result of the last successful call
    pub fn cached() -> Self {
        Self::new(FallbackStrategy::CachedValue)
    }

    /// Return `value` as a "skipped" marker
    pub fn skip(value: T) -> Self {
        Self::new(FallbackStrategy::SkipOperation(value))
    }

    /// Compute the fallback from the error
    pub fn custom<F, Fut>(function: F) -> Self
    where
        F: Fn(&RecoveryError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(FallbackStrategy::CustomFunction(Arc::new(
            move |error: &RecoveryError| function(error).boxed(),
        )))
    }

    /// Call an alternative service with the original arguments on failure
    pub fn alternative<F, Fut>(service: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(FallbackStrategy::AlternativeService(Arc::new(
            move |args: A| service(args).boxed(),
        )))
    }

    /// Only apply the fallback when `condition` accepts the error
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&RecoveryError) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Set cache lifetime
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Kind of this policy
    pub fn fallback_type(&self) -> FallbackType {
        self.strategy.fallback_type()
    }

    /// Check whether the fallback applies to `error`
    pub fn applies_to(&self, error: &RecoveryError) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition(error))
    }
}

/// Fallback statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackStats {
    /// Times the fallback path was entered
    pub total_fallbacks: u64,
    /// Times the fallback path produced a value
    pub successful_fallbacks: u64,
    /// Entries per fallback kind
    pub fallbacks_by_type: HashMap<FallbackType, u64>,
}

/// Cached successful result
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        let cached_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| cached_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            value,
            cached_at,
            expires_at,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Resolves terminal failures into substitute outcomes
pub struct FallbackResolver {
    cache: RwLock<HashMap<String, CacheEntry>>,
    stats: RwLock<FallbackStats>,
    default_cache_ttl: Duration,
}

impl Default for FallbackResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl FallbackResolver {
    /// Create new resolver
    pub fn new(default_cache_ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            stats: RwLock::new(FallbackStats::default()),
            default_cache_ttl,
        }
    }

    /// Run an argument-less `primary`, resolving its failure through `policy`
    pub async fn execute_with_fallback<F, Fut, T>(
        &self,
        key: &str,
        primary: F,
        policy: &FallbackPolicy<T>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
    {
        self.execute_with_fallback_args(key, &(), primary, policy).await
    }

    /// Run `primary`; an alternative service gets a clone of `args`
    pub async fn execute_with_fallback_args<F, Fut, T, A>(
        &self,
        key: &str,
        args: &A,
        primary: F,
        policy: &FallbackPolicy<T, A>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
        A: Clone,
    {
        match primary().await {
            Ok(value) => {
                if matches!(policy.strategy, FallbackStrategy::CachedValue) {
                    let ttl = policy.cache_ttl.unwrap_or(self.default_cache_ttl);
                    if let Err(e) = self.cache_value(key, &value, ttl).await {
                        warn!("Failed to cache result for '{}': {}", key, e);
                    }
                }
                Ok(value)
            }
            Err(error) => self.resolve_with_args(key, error, args, policy).await,
        }
    }

    /// Resolve a terminal error of an argument-less call through `policy`
    pub async fn resolve<T>(
        &self,
        key: &str,
        error: RecoveryError,
        policy: &FallbackPolicy<T>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Clone,
    {
        self.resolve_with_args(key, error, &(), policy).await
    }

    /// Resolve a terminal error through `policy`
    pub async fn resolve_with_args<T, A>(
        &self,
        key: &str,
        error: RecoveryError,
        args: &A,
        policy: &FallbackPolicy<T, A>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Clone,
        A: Clone,
    {
        if !policy.applies_to(&error) {
            debug!("Fallback for '{}' not applicable to error: {}", key, error);
            return Err(error);
        }

        let fallback_type = policy.fallback_type();
        {
            let mut stats = self.stats.write().await;
            stats.total_fallbacks += 1;
            *stats.fallbacks_by_type.entry(fallback_type).or_insert(0) += 1;
        }

        let outcome = match &policy.strategy {
            FallbackStrategy::DefaultValue(value) => Ok(value.clone()),
            FallbackStrategy::CachedValue => match self.cached_value::<T>(key).await {
                Some(value) => Ok(value),
                None => {
                    debug!("No cached fallback for '{}'", key);
                    Err(error)
                }
            },
            FallbackStrategy::CustomFunction(function) => function(&error).await,
            FallbackStrategy::SkipOperation(value) => Ok(value.clone()),
            FallbackStrategy::AlternativeService(service) => service(args.clone()).await,
        };

        match &outcome {
            Ok(_) => {
                self.stats.write().await.successful_fallbacks += 1;
                info!("Using {} fallback for '{}'", fallback_type, key);
            }
            Err(fallback_error) => {
                warn!(
                    "{} fallback for '{}' failed: {}",
                    fallback_type, key, fallback_error
                );
            }
        }

        outcome
    }

    /// Store a value for `key`
    pub async fn cache_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;

        self.cache
            .write()
            .await
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        debug!("Cached fallback value for '{}'", key);
        Ok(())
    }

    /// Non-expired cached value for `key`
    pub async fn cached_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = {
            let cache = self.cache.read().await;
            cache
                .get(key)
                .filter(|entry| !entry.is_expired(Utc::now()))
                .cloned()?
        };

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                debug!("Cache hit for '{}' (cached at {})", key, entry.cached_at);
                Some(value)
            }
            Err(e) => {
                warn!("Cached value for '{}' has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Drop the cached value for `key`
    pub async fn invalidate(&self, key: &str) -> bool {
        self.cache.write().await.remove(key).is_some()
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        let now = Utc::now();
        cache.retain(|_, entry| !entry.is_expired(now));

        let removed = before - cache.len();
        debug!("Cleaned up {} expired fallback cache entries", removed);
        removed
    }

    /// Number of cached entries, expired ones included
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Get fallback statistics
    pub async fn get_stats(&self) -> FallbackStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = FallbackStats::default();
    }
}
