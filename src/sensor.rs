use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, error};

/// Address of the sauna sensor bridge on the local network.
pub const DEFAULT_SENSOR_URL: &str = "http://192.168.1.137";

/// One temperature sample as reported by the bridge. Missing or null
/// fields decode as zero.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "sensor", default, deserialize_with = "null_as_default")]
    pub sensor_id: i64,
    #[serde(rename = "temperature", default, deserialize_with = "null_as_default")]
    pub temperature_celsius: f64,
}

/// Full payload of a single fetch. Only the first reading is reported
/// back to chat, but all of them are kept here. A missing or null
/// `temperatures` list decodes as empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorReport {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sensor_count: i64,
    #[serde(rename = "temperatures", default, deserialize_with = "null_as_default")]
    pub readings: Vec<SensorReading>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Error fetching JSON: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Error reading response body: {0}")]
    ReadBody(#[source] reqwest::Error),

    #[error("Error: received empty JSON response")]
    EmptyBody,

    #[error("Error parsing JSON: {source}")]
    Malformed {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error: no temperature sensors available")]
    NoSensors,
}

impl SensorReport {
    /// Decode a raw response body, rejecting empty bodies and reports
    /// without any readings.
    pub fn from_body(body: &[u8]) -> Result<Self, FetchError> {
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        let report: SensorReport =
            serde_json::from_slice(body).map_err(|source| FetchError::Malformed {
                body: String::from_utf8_lossy(body).into_owned(),
                source,
            })?;

        if report.readings.is_empty() {
            return Err(FetchError::NoSensors);
        }

        Ok(report)
    }

    /// The reading that gets reported to chat.
    pub fn primary(&self) -> Option<&SensorReading> {
        self.readings.first()
    }
}

/// Anything that can produce a fresh sensor report on demand.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch_report(&self) -> Result<SensorReport, FetchError>;
}

/// Fetches reports from the HTTP sensor bridge. Stateless apart from the
/// connection pool; no retries.
pub struct SensorClient {
    client: reqwest::Client,
    url: String,
}

impl SensorClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorSource for SensorClient {
    async fn fetch_report(&self) -> Result<SensorReport, FetchError> {
        debug!("Fetching sensor report from {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            error!("Error fetching JSON from {}: {}", self.url, e);
            FetchError::Network(e)
        })?;

        let body = response.bytes().await.map_err(|e| {
            error!("Error reading response body: {}", e);
            FetchError::ReadBody(e)
        })?;

        SensorReport::from_body(&body).inspect_err(|e| match e {
            FetchError::EmptyBody => error!("Received empty JSON response"),
            FetchError::Malformed { body, source } => {
                error!("Error parsing JSON: {}, body: {}", source, body)
            }
            FetchError::NoSensors => error!("No temperature sensors in response"),
            FetchError::Network(_) | FetchError::ReadBody(_) => {}
        })
    }
}
