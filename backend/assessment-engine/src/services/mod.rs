use std::sync::Arc;

use crate::config::Config;
use crate::utils::time::{Clock, SystemClock};

pub mod session_service;
pub mod submission_client;
pub mod timer;
pub mod transport;

use submission_client::SubmissionClient;
use timer::{TimerFactory, TokioTimerFactory};
use transport::{HttpTransport, SubmissionTransport};

/// Configuration plus the collaborators every session is built from.
pub struct AppState {
    pub config: Config,
    pub transport: Arc<dyn SubmissionTransport>,
    pub timers: Arc<dyn TimerFactory>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Production wiring: HTTP grading service, Tokio timers, system clock.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.grading)?;
        tracing::info!("Grading service endpoint: {}", transport.endpoint());

        Ok(Self::with_collaborators(
            config,
            Arc::new(transport),
            Arc::new(TokioTimerFactory),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_collaborators(
        config: Config,
        transport: Arc<dyn SubmissionTransport>,
        timers: Arc<dyn TimerFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            timers,
            clock,
        }
    }

    pub fn submission_client(&self) -> SubmissionClient {
        SubmissionClient::from_config(Arc::clone(&self.transport), &self.config.submission)
    }
}
