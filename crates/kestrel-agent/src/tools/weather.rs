//! Weather tool — current conditions via wttr.in with an Open-Meteo
//! fallback.
//!
//! The location comes from the `location` argument or, when the model left
//! it out, from the raw user text the loop injects as `context_text`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{optional_string, Tool, ToolParams};
use crate::nlp;

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(8);

/// Fetches current weather for a location.
pub struct WeatherTool {
    client: reqwest::Client,
    wttr_base: String,
    geocode_base: String,
    forecast_base: String,
}

impl WeatherTool {
    pub fn new() -> Self {
        Self::with_endpoints(
            "https://wttr.in",
            "https://geocoding-api.open-meteo.com",
            "https://api.open-meteo.com",
        )
    }

    /// Endpoints are injectable so tests can point at a local server.
    pub fn with_endpoints(
        wttr_base: impl Into<String>,
        geocode_base: impl Into<String>,
        forecast_base: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            wttr_base: wttr_base.into(),
            geocode_base: geocode_base.into(),
            forecast_base: forecast_base.into(),
        }
    }

    async fn fetch_wttr(&self, location: &str) -> Option<String> {
        let slug = location.replace(' ', "+");
        let url = format!("{}/{}?format=%l:+%c+%t+%h+%w", self.wttr_base, slug);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let text = response.text().await.ok()?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.contains("Unknown location") {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    async fn fetch_open_meteo(&self, location: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct GeoResponse {
            results: Option<Vec<GeoResult>>,
        }
        #[derive(Deserialize)]
        struct GeoResult {
            name: String,
            latitude: f64,
            longitude: f64,
            country: Option<String>,
        }
        #[derive(Deserialize)]
        struct ForecastResponse {
            current_weather: Option<CurrentWeather>,
        }
        #[derive(Deserialize)]
        struct CurrentWeather {
            temperature: f64,
            windspeed: f64,
        }

        let geo_url = format!(
            "{}/v1/search?name={}&count=1&language=en&format=json",
            self.geocode_base,
            location.replace(' ', "+")
        );
        let geo: GeoResponse = self.client.get(&geo_url).send().await.ok()?.json().await.ok()?;
        let place = geo.results?.into_iter().next()?;

        let forecast_url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&current_weather=true",
            self.forecast_base, place.latitude, place.longitude
        );
        let forecast: ForecastResponse = self
            .client
            .get(&forecast_url)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        let current = forecast.current_weather?;

        let country = place.country.map(|c| format!(", {c}")).unwrap_or_default();
        Some(format!(
            "{}{}: {:.1}C, wind {:.1} km/h",
            place.name, country, current.temperature, current.windspeed
        ))
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get current weather for a location. Use for any question about \
         weather, temperature, or forecasts."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City or place name (e.g. \"Cilacap\", \"New York\")"
                },
                "context_text": {
                    "type": "string",
                    "description": "Original user text, used to infer the location when absent"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let location = optional_string(&params, "location")
            .filter(|l| !l.trim().is_empty())
            .or_else(|| {
                optional_string(&params, "context_text")
                    .and_then(|text| nlp::extract_weather_location(&text))
            });

        let Some(location) = location else {
            anyhow::bail!("No location given. Tell me which city to check.");
        };

        debug!(location = %location, "fetching weather");
        if let Some(report) = self.fetch_wttr(&location).await {
            return Ok(report);
        }
        if let Some(report) = self.fetch_open_meteo(&location).await {
            return Ok(report);
        }
        anyhow::bail!("Weather lookup failed for '{location}'")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn location_params(location: &str) -> ToolParams {
        let mut p = ToolParams::new();
        p.insert("location".into(), json!(location));
        p
    }

    #[tokio::test]
    async fn test_wttr_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Cilacap"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Cilacap: Cloudy +29C 74% 8km/h"))
            .mount(&server)
            .await;

        let tool = WeatherTool::with_endpoints(server.uri(), server.uri(), server.uri());
        let result = tool.execute(location_params("Cilacap")).await.unwrap();
        assert!(result.contains("Cilacap"));
        assert!(result.contains("+29C"));
    }

    #[tokio::test]
    async fn test_falls_back_to_open_meteo() {
        let server = MockServer::start().await;
        // wttr path fails.
        Mock::given(method("GET"))
            .and(path("/Bandung"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "Bandung"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"name": "Bandung", "latitude": -6.9, "longitude": 107.6, "country": "Indonesia"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current_weather": {"temperature": 24.5, "windspeed": 6.2}
            })))
            .mount(&server)
            .await;

        let tool = WeatherTool::with_endpoints(server.uri(), server.uri(), server.uri());
        let result = tool.execute(location_params("Bandung")).await.unwrap();
        assert!(result.contains("Bandung, Indonesia"));
        assert!(result.contains("24.5C"));
    }

    #[tokio::test]
    async fn test_location_inferred_from_context_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/Cilacap$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Cilacap: Sunny +31C"))
            .mount(&server)
            .await;

        let tool = WeatherTool::with_endpoints(server.uri(), server.uri(), server.uri());
        let mut params = ToolParams::new();
        params.insert(
            "context_text".into(),
            json!("berapa suhu di Cilacap sekarang"),
        );
        let result = tool.execute(params).await.unwrap();
        assert!(result.contains("Cilacap"));
    }

    #[tokio::test]
    async fn test_no_location_errors() {
        let tool = WeatherTool::new();
        let err = tool.execute(ToolParams::new()).await.unwrap_err();
        assert!(err.to_string().contains("No location"));
    }

    #[tokio::test]
    async fn test_both_sources_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tool = WeatherTool::with_endpoints(server.uri(), server.uri(), server.uri());
        let err = tool.execute(location_params("Nowhere")).await.unwrap_err();
        assert!(err.to_string().contains("Weather lookup failed"));
    }
}
