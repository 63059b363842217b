//! Application context: config, program registry and task manager wired together

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::manager::TaskManager;
use crate::program::ProgramRegistry;

/// Everything a command or the monitor needs
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub registry: Arc<ProgramRegistry>,
    pub manager: TaskManager,
}

impl AppContext {
    /// Build from config, probing `PATH` for programs
    pub fn build(config: Config) -> Result<Self> {
        let registry = ProgramRegistry::from_config(&config);
        Self::with_registry(config, registry)
    }

    /// Build with an explicit registry
    pub fn with_registry(config: Config, registry: ProgramRegistry) -> Result<Self> {
        let settings = config.manager_settings()?;
        std::fs::create_dir_all(&settings.launch.temp_dir)?;
        let registry = Arc::new(registry);
        let manager = TaskManager::new(registry.clone(), settings);
        info!(programs = registry.all().len(), "context ready");
        Ok(Self {
            config,
            registry,
            manager,
        })
    }

    /// Start the scheduler loops
    pub fn start(&self) {
        self.manager.start();
    }

    /// Stop the loops and terminate running programs
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
