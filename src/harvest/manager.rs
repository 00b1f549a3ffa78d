//! Runs configured sites end to end
//!
//! The [`Harvester`] builds each site's adapter, fetcher and store from the
//! configuration, seeds tiers and locations, runs the orchestrator and records
//! the outcome. Every selected site yields a [`RunResult`], including sites
//! whose run failed before any profile was processed.

use super::orchestrator::Orchestrator;
use super::result::RunResult;
use crate::config::{Config, SiteConfig};
use crate::sites::AdapterRegistry;
use crate::storage::{SharedStore, SourceSpec, SqliteStore, StorageResult, Store};
use crate::transport::build_fetcher;
use crate::HarvestError;
use futures::future::join_all;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs one or more configured sites
pub struct Harvester {
    config: Config,
    config_hash: String,
    registry: AdapterRegistry,
    cancel: CancellationToken,
}

impl Harvester {
    /// Creates a harvester with the built-in adapters
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash of the config file, stored with every run
    pub fn new(config: Config, config_hash: impl Into<String>) -> Self {
        Self {
            config,
            config_hash: config_hash.into(),
            registry: AdapterRegistry::with_builtin(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the adapter registry
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops every run at its next profile boundary
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sites to run: the given keys in order, or every enabled site
    pub fn select_sites(&self, keys: &[String]) -> Result<Vec<&SiteConfig>, HarvestError> {
        if keys.is_empty() {
            return Ok(self.config.enabled_sites().collect());
        }
        keys.iter()
            .map(|key| {
                self.config
                    .site(key)
                    .ok_or_else(|| HarvestError::UnknownSite(key.clone()))
            })
            .collect()
    }

    /// Runs several sites, concurrently when `parallel` is set
    ///
    /// Concurrent runs share one connection so their batch transactions nest
    /// instead of contending for the database write lock.
    pub async fn run_many(&self, sites: &[&SiteConfig], parallel: bool) -> Vec<RunResult> {
        if parallel {
            let shared = match self.open_store() {
                Ok(store) => SharedStore::new(store),
                Err(e) => {
                    tracing::error!(error = %e, "Cannot open store");
                    let error = HarvestError::from(e);
                    return sites.iter().map(|site| failed(site, &error)).collect();
                }
            };
            return join_all(sites.iter().map(|site| {
                let mut store = shared.clone();
                async move { self.run_with_store(site, &mut store).await }
            }))
            .await;
        }

        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            if self.cancel.is_cancelled() {
                tracing::warn!(source = %site.short_name, "Skipping site after cancellation");
                continue;
            }
            results.push(self.run_site(site).await);
        }
        results
    }

    /// Runs one site on its own connection and records the result
    ///
    /// Never fails: a run-level error becomes a failed result with one
    /// error detail.
    pub async fn run_site(&self, site: &SiteConfig) -> RunResult {
        match self.open_store() {
            Ok(mut store) => self.run_with_store(site, &mut store).await,
            Err(e) => {
                tracing::error!(source = %site.short_name, error = %e, "Cannot open store");
                failed(site, &HarvestError::from(e))
            }
        }
    }

    /// Runs one site against `store` and records the result in run history
    pub async fn run_with_store(&self, site: &SiteConfig, store: &mut dyn Store) -> RunResult {
        let result = match self.harvest(site, store).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(source = %site.short_name, error = %e, "Harvest failed");
                failed(site, &e)
            }
        };

        if let Err(e) = store.record_run(&result, &self.config_hash) {
            tracing::warn!(source = %site.short_name, error = %e, "Failed to record run");
        }
        result
    }

    fn open_store(&self) -> StorageResult<SqliteStore> {
        SqliteStore::open(Path::new(&self.config.output.database_path))
    }

    async fn harvest(
        &self,
        site: &SiteConfig,
        store: &mut dyn Store,
    ) -> Result<RunResult, HarvestError> {
        let adapter = self
            .registry
            .adapter_for(site)
            .ok_or_else(|| HarvestError::AdapterMissing(site.key.clone()))?;
        let mut fetcher = build_fetcher(site, &self.config.harvest, &self.config.browser)?;

        seed_site(store, site)?;

        let harvest = &self.config.harvest;
        Orchestrator::new(site, adapter.as_ref(), fetcher.as_mut(), store)
            .known_towns(&self.config.locations.known_towns)
            .batch_size(harvest.batch_size)
            .max_error_details(harvest.max_error_details)
            .cancel_token(self.cancel.clone())
            .run()
            .await
    }
}

/// Upserts the site's configured tiers and creates missing seeded locations
fn seed_site(store: &mut dyn Store, site: &SiteConfig) -> StorageResult<()> {
    let source = store.get_or_create_source(&SourceSpec::from_site(site))?;

    for tier in &site.tiers {
        store.upsert_tier(source.id, tier)?;
    }

    for seed in &site.locations {
        match store.find_location(source.id, &seed.town, &seed.detail)? {
            Some(existing) if seed.default && !existing.is_default => {
                tracing::warn!(
                    source = %site.short_name,
                    town = %seed.town,
                    "Seeded default location already exists as a regular location"
                );
            }
            Some(_) => {}
            None => {
                store.create_location(source.id, &seed.town, &seed.detail, seed.default)?;
            }
        }
    }

    tracing::debug!(
        source = %site.short_name,
        tiers = site.tiers.len(),
        locations = site.locations.len(),
        "Seeded site"
    );
    Ok(())
}

fn failed(site: &SiteConfig, error: &HarvestError) -> RunResult {
    let mut result = RunResult::new(&site.short_name);
    result.fail(error);
    result
}
