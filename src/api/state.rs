use std::sync::Arc;

use crate::config::Config;
use crate::ledger::LogLedger;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<LogLedger>,
    /// Absent when no provider credential is configured
    pub orchestrator: Option<Arc<Orchestrator>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        ledger: LogLedger,
        orchestrator: Option<Arc<Orchestrator>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ledger: Arc::new(ledger),
            orchestrator,
            metrics,
        }
    }
}
