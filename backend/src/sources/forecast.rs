//! Forecast collaborator. Annotations are interpretive only.

use async_trait::async_trait;
use std::time::Duration;

use super::schedule::SourceError;
use crate::models::{RiskAnnotation, Route, ScheduleSailing};

#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn forecast_risk(
        &self,
        sailing: &ScheduleSailing,
        route: Option<&Route>,
    ) -> Result<Option<RiskAnnotation>, SourceError>;
}

/// No forecast provider configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoForecast;

#[async_trait]
impl ForecastSource for NoForecast {
    async fn forecast_risk(
        &self,
        _sailing: &ScheduleSailing,
        _route: Option<&Route>,
    ) -> Result<Option<RiskAnnotation>, SourceError> {
        Ok(None)
    }
}

/// Returns the same annotation for every sailing, optionally after a delay.
#[derive(Debug, Clone)]
pub struct FixedForecast {
    pub annotation: RiskAnnotation,
    pub delay: Option<Duration>,
}

impl FixedForecast {
    pub fn new(annotation: RiskAnnotation) -> Self {
        Self {
            annotation,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ForecastSource for FixedForecast {
    async fn forecast_risk(
        &self,
        _sailing: &ScheduleSailing,
        _route: Option<&Route>,
    ) -> Result<Option<RiskAnnotation>, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(self.annotation.clone()))
    }
}
