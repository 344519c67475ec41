//! Name-keyed provider registry

use super::cli::CliProviderFactory;
use super::traits::{Provider, ProviderFactory, ProviderOptions};
use crate::config::{AgentLaunchConfig, RuntimeConfig};
use crate::error::{AgentError, Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the built-in command-line provider
pub const CLI_PROVIDER: &str = "cli";

/// A provider chosen for one project, ready to be started
pub struct ResolvedProvider {
    pub name: String,
    pub launch: AgentLaunchConfig,
    pub provider: Arc<dyn Provider>,
}

/// Registry of provider factories and their default launch configs
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    defaults: HashMap<String, AgentLaunchConfig>,
    default_provider: String,
    options: ProviderOptions,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>, options: ProviderOptions) -> Self {
        Self {
            factories: HashMap::new(),
            defaults: HashMap::new(),
            default_provider: default_provider.into(),
            options,
        }
    }

    /// Registry with the CLI factory plus every provider named in `config`
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let options = ProviderOptions {
            stop_grace: config.stop_grace(),
            stderr_lines: config.stderr_lines,
            ..Default::default()
        };
        let mut registry = Self::new(config.default_provider.clone(), options);
        registry.register(CLI_PROVIDER, Arc::new(CliProviderFactory));

        for (name, launch) in &config.providers {
            if !registry.factories.contains_key(name) {
                registry.register(name.clone(), Arc::new(CliProviderFactory));
            }
            registry.set_default_launch(name.clone(), launch.clone());
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ProviderFactory>) {
        let name = name.into();
        debug!("Registering provider: {}", name);
        self.factories.insert(name, factory);
    }

    pub fn set_default_launch(&mut self, name: impl Into<String>, launch: AgentLaunchConfig) {
        self.defaults.insert(name.into(), launch);
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pick and build the provider for a project.
    ///
    /// The project's own agent config wins; otherwise the registered
    /// default launch for the requested provider, then for the default
    /// provider.
    pub fn resolve(&self, requested: Option<&str>, project_dir: &Path) -> Result<ResolvedProvider> {
        let requested = requested.unwrap_or(&self.default_provider);

        let (name, launch) = match AgentLaunchConfig::load_for_project(project_dir)? {
            Some(launch) => {
                debug!("Using project agent config: {}", launch.executable);
                (requested.to_string(), launch)
            }
            None => match self.defaults.get(requested) {
                Some(launch) => (requested.to_string(), launch.clone()),
                None => {
                    let fallback = self.defaults.get(&self.default_provider).ok_or_else(|| {
                        Error::Agent(AgentError::ProviderNotFound(format!(
                            "no launch configuration for provider '{}'",
                            requested
                        )))
                    })?;
                    info!(
                        "No launch config for {}, falling back to default provider {}",
                        requested, self.default_provider
                    );
                    (self.default_provider.clone(), fallback.clone())
                }
            },
        };

        let factory = self
            .factories
            .get(&name)
            .ok_or_else(|| Error::Agent(AgentError::ProviderNotFound(name.clone())))?;
        let provider = factory.create(&name, launch.clone(), &self.options)?;

        Ok(ResolvedProvider {
            name,
            launch,
            provider,
        })
    }
}
