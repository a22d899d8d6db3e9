//! Engine registry: name -> constructor mapping plus a per-name cache of
//! live engine instances.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::asr::realtime::{RealtimeConfig, RealtimeEngine};
use crate::asr::remote_batch::{RemoteBatchConfig, RemoteBatchEngine};
use crate::asr::{self, AsrEngine};
use crate::error::EngineError;

/// Builds an engine from its caller-supplied settings mapping.
pub type EngineConstructor =
    Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn AsrEngine>, EngineError> + Send + Sync>;

/// Deserializes an engine's typed configuration, treating `null` as "all
/// defaults".
pub fn parse_engine_config<T: DeserializeOwned + Default>(
    config: serde_json::Value,
) -> Result<T, EngineError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config)
        .map_err(|e| EngineError::Configuration(format!("invalid engine configuration: {e}")))
}

/// Creates, caches and tears down engine instances.
///
/// Process-scoped: construct one registry at startup, register backends,
/// share it via `Arc`, drain it with [`EngineRegistry::cleanup_all`] at
/// shutdown. The cache holds exactly one live instance per name.
pub struct EngineRegistry {
    constructors: DashMap<String, EngineConstructor>,
    instances: DashMap<String, Arc<dyn AsrEngine>>,
    /// Per-name locks serializing first-use construction.
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            instances: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    /// Registry pre-populated with the shipped backends.
    pub fn with_builtin_engines() -> Self {
        let registry = Self::new();

        registry.register(
            asr::realtime::ENGINE_NAME,
            Arc::new(|config| {
                let config: RealtimeConfig = parse_engine_config(config)?;
                Ok(Arc::new(RealtimeEngine::new(config)) as Arc<dyn AsrEngine>)
            }),
        );

        registry.register(
            asr::remote_batch::ENGINE_NAME,
            Arc::new(|config| {
                let config: RemoteBatchConfig = parse_engine_config(config)?;
                Ok(Arc::new(RemoteBatchEngine::new(config)?) as Arc<dyn AsrEngine>)
            }),
        );

        #[cfg(feature = "local-whisper")]
        registry.register(
            asr::local_whisper::ENGINE_NAME,
            Arc::new(|config| {
                let config: asr::local_whisper::LocalWhisperConfig = parse_engine_config(config)?;
                Ok(Arc::new(asr::local_whisper::LocalWhisperEngine::new(config))
                    as Arc<dyn AsrEngine>)
            }),
        );

        registry
    }

    /// Registers a constructor under `name`. Last write wins.
    pub fn register(&self, name: &str, constructor: EngineConstructor) {
        self.constructors.insert(name.to_string(), constructor);
        info!(engine = %name, "Registered engine");
    }

    /// Constructs, initializes and caches an engine.
    ///
    /// Initialization failure propagates and nothing is cached, so a later
    /// attempt re-runs the constructor.
    pub async fn create(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn AsrEngine>, EngineError> {
        let constructor = self
            .constructors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::NotFound {
                name: name.to_string(),
                available: self.list_engines(),
            })?;

        info!(engine = %name, "Initializing engine");
        let engine = constructor(config)?;
        engine.initialize().await?;

        self.instances.insert(name.to_string(), Arc::clone(&engine));
        info!(engine = %name, "Engine created");
        Ok(engine)
    }

    /// Returns the cached instance, if one exists.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AsrEngine>> {
        self.instances.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the cached instance or creates one.
    ///
    /// The config argument only matters for the caller that actually
    /// constructs the instance (first-writer-wins). Concurrent first use
    /// of the same name constructs exactly once.
    pub async fn get_or_create(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn AsrEngine>, EngineError> {
        if let Some(engine) = self.get(name) {
            return Ok(engine);
        }

        let lock = self
            .creation_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished construction while we waited.
        if let Some(engine) = self.get(name) {
            return Ok(engine);
        }
        self.create(name, config).await
    }

    /// Names of all registered engines, sorted.
    pub fn list_engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Names of engines with a live cached instance.
    pub fn cached_engines(&self) -> Vec<String> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }

    /// Releases one cached engine. Cleanup errors are logged, not raised.
    pub async fn cleanup(&self, name: &str) {
        if let Some((_, engine)) = self.instances.remove(name) {
            if let Err(e) = engine.cleanup().await {
                warn!(engine = %name, error = %e, "Engine cleanup failed");
            }
            info!(engine = %name, "Engine cleaned up");
        }
    }

    /// Releases every cached engine; individual failures do not block the
    /// rest.
    pub async fn cleanup_all(&self) {
        let names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.cleanup(&name).await;
        }
        info!("All engines cleaned up");
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
