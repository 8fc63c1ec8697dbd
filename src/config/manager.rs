use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use super::runtime::{ConfluenceSettings, MonitoringSettings, RiskSettings, RuntimeConfig, TradingSettings};

#[derive(Debug, Clone, Serialize)]
pub enum ConfigChangeEvent {
    RiskUpdated(RiskSettings),
    TradingUpdated(TradingSettings),
    ConfluenceUpdated(ConfluenceSettings),
    MonitoringUpdated(MonitoringSettings),
    FullConfigUpdated,
}

/// Holds the live config behind a lock and broadcasts validated changes so
/// components can react without a restart. Invalid updates are rejected and
/// leave the prior config untouched.
pub struct RuntimeConfigManager {
    config: Arc<RwLock<RuntimeConfig>>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl RuntimeConfigManager {
    pub fn new(initial: RuntimeConfig) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub async fn get_config(&self) -> RuntimeConfig {
        self.config.read().await.clone()
    }

    pub async fn update_risk(&self, settings: RiskSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.risk.clone();
        config.risk = settings.clone();
        if let Err(errors) = config.validate() {
            config.risk = previous;
            return Err(errors.join(", "));
        }
        info!(max_risk_per_trade = %settings.max_risk_per_trade, "risk settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::RiskUpdated(settings));
        Ok(())
    }

    pub async fn update_trading(&self, settings: TradingSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.trading.clone();
        config.trading = settings.clone();
        if let Err(errors) = config.validate() {
            config.trading = previous;
            return Err(errors.join(", "));
        }
        info!(pairs = ?settings.pairs, "trading settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::TradingUpdated(settings));
        Ok(())
    }

    pub async fn update_confluence(&self, settings: ConfluenceSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.ai.clone();
        config.ai = settings.clone();
        if let Err(errors) = config.validate() {
            config.ai = previous;
            return Err(errors.join(", "));
        }
        info!("confluence settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::ConfluenceUpdated(settings));
        Ok(())
    }

    pub async fn update_monitoring(&self, settings: MonitoringSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        config.monitoring = settings.clone();
        info!("monitoring settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::MonitoringUpdated(settings));
        Ok(())
    }

    pub async fn update_full(&self, new_config: RuntimeConfig) -> Result<(), String> {
        if let Err(errors) = new_config.validate() {
            return Err(errors.join(", "));
        }
        let mut config = self.config.write().await;
        *config = new_config;
        info!("full configuration replaced");
        let _ = self.change_tx.send(ConfigChangeEvent::FullConfigUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }

    pub fn config_arc(&self) -> Arc<RwLock<RuntimeConfig>> {
        Arc::clone(&self.config)
    }
}

impl Clone for RuntimeConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            change_tx: self.change_tx.clone(),
        }
    }
}
