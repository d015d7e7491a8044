//! Journeys compiled into the controller

use super::{Journey, JourneyContext, JourneyError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Sleeps, then logs a fixed message
#[derive(Debug, Clone)]
pub struct SleepJourney {
    pub delay: Duration,
    pub message: String,
}

impl SleepJourney {
    pub fn new(delay: Duration, message: impl Into<String>) -> Self {
        Self {
            delay,
            message: message.into(),
        }
    }
}

impl Default for SleepJourney {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), "hello")
    }
}

#[async_trait]
impl Journey for SleepJourney {
    async fn run(&self, ctx: &JourneyContext) -> Result<(), JourneyError> {
        tokio::time::sleep(self.delay).await;
        info!(
            runner_id = ctx.runner_id,
            journey = %ctx.journey,
            "{}", self.message
        );
        Ok(())
    }
}
