//! Process-wide cache of backend handles, keyed by sampling configuration.
//!
//! Handles are created lazily on first request and never evicted; the key
//! space is the handful of sampling tuples the stages actually use.

use std::sync::Arc;

use copilot_shared::Result;
use dashmap::DashMap;
use tracing::debug;

use crate::{BackendProvider, GenerationBackend, OpenAiClient, OpenAiSettings, Sampling};

/// Builds a new handle for a sampling configuration.
pub type BackendFactory =
    Box<dyn Fn(Sampling) -> Result<Arc<dyn GenerationBackend>> + Send + Sync>;

/// Hashable form of [`Sampling`] (floats compared bitwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SamplingKey {
    temperature_bits: u32,
    max_output_tokens: Option<u32>,
}

impl From<Sampling> for SamplingKey {
    fn from(s: Sampling) -> Self {
        Self {
            temperature_bits: s.temperature.to_bits(),
            max_output_tokens: s.max_output_tokens,
        }
    }
}

/// Read-mostly keyed cache of backend handles, safe to share across concurrent runs.
pub struct ClientCache {
    factory: BackendFactory,
    handles: DashMap<SamplingKey, Arc<dyn GenerationBackend>>,
}

impl ClientCache {
    /// Cache over an arbitrary handle factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(Sampling) -> Result<Arc<dyn GenerationBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            handles: DashMap::new(),
        }
    }

    /// Cache of OpenAI-compatible clients sharing one set of connection settings.
    pub fn openai(settings: OpenAiSettings) -> Self {
        Self::new(move |sampling| {
            let client = OpenAiClient::new(settings.clone(), sampling)?;
            Ok(Arc::new(client) as Arc<dyn GenerationBackend>)
        })
    }

    /// Number of distinct handles created so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl BackendProvider for ClientCache {
    fn backend(&self, sampling: Sampling) -> Result<Arc<dyn GenerationBackend>> {
        let key = SamplingKey::from(sampling);
        if let Some(handle) = self.handles.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let handle = self
            .handles
            .entry(key)
            .or_try_insert_with(|| {
                debug!(
                    temperature = sampling.temperature,
                    max_output_tokens = ?sampling.max_output_tokens,
                    "creating backend handle"
                );
                (self.factory)(sampling)
            })?;
        Ok(Arc::clone(handle.value()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use copilot_shared::CopilotError;

    use super::*;
    use crate::Generation;

    struct Echo {
        sampling: Sampling,
    }

    #[async_trait]
    impl GenerationBackend for Echo {
        async fn invoke(&self, _system: &str, user: &str) -> Result<Generation> {
            Ok(Generation {
                text: format!("{user}@{}", self.sampling.temperature),
                ..Default::default()
            })
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    fn counting_cache(created: Arc<AtomicUsize>) -> ClientCache {
        ClientCache::new(move |sampling| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Echo { sampling }) as Arc<dyn GenerationBackend>)
        })
    }

    #[test]
    fn same_sampling_reuses_handle() {
        let created = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(created.clone());

        let a = cache.backend(Sampling::new(0.2, None)).unwrap();
        let b = cache.backend(Sampling::new(0.2, None)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_sampling_gets_distinct_handles() {
        let created = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(created.clone());

        cache.backend(Sampling::new(0.1, Some(1500))).unwrap();
        cache.backend(Sampling::new(0.3, Some(1500))).unwrap();
        cache.backend(Sampling::new(0.1, None)).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn factory_errors_are_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cache = ClientCache::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CopilotError::Backend("no credentials".into()))
        });

        assert!(cache.backend(Sampling::new(0.0, None)).is_err());
        assert!(cache.backend(Sampling::new(0.0, None)).is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cached_handle_keeps_its_sampling() {
        let cache = counting_cache(Arc::new(AtomicUsize::new(0)));
        let handle = cache.backend(Sampling::new(0.5, None)).unwrap();
        let out = handle.invoke("sys", "hi").await.unwrap();
        assert_eq!(out.text, "hi@0.5");
    }
}
