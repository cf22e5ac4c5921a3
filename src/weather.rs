//! Contract for the weather backend behind the `get_weather` tool.

use crate::error::WeatherError;
use async_trait::async_trait;
use serde_json::Value;

/// Resolves a city (optionally narrowed by ISO country code) and returns its current conditions.
#[async_trait]
pub trait WeatherLookup: Send + Sync {
    async fn current_conditions(
        &self,
        city: &str,
        country_code: Option<&str>,
    ) -> Result<Value, WeatherError>;
}
