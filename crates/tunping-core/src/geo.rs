use crate::client::HttpProbe;
use crate::error::Result;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_GEOLOCATION_URL: &str = "https://ident.me/json";

/// Body returned by the ident.me JSON endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoLocation {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub cc: Option<String>,
}

/// Best-effort exit-country lookup through the probe client
#[derive(Debug, Clone)]
pub struct GeolocationProbe {
    url: String,
}

impl Default for GeolocationProbe {
    fn default() -> Self {
        Self::new(DEFAULT_GEOLOCATION_URL)
    }
}

impl GeolocationProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub async fn lookup(&self, probe: &dyn HttpProbe) -> Result<GeoLocation> {
        let body = probe.fetch(&self.url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Country code, or an empty string when anything goes wrong.
    pub async fn country(&self, probe: &dyn HttpProbe) -> String {
        match self.lookup(probe).await {
            Ok(location) => {
                debug!(ip = ?location.ip, cc = ?location.cc, "geolocation resolved");
                location.cc.unwrap_or_default()
            }
            Err(e) => {
                warn!("geolocation error: {}", e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::latency::ProbeSample;
    use async_trait::async_trait;

    struct Body(std::result::Result<&'static str, &'static str>);

    #[async_trait]
    impl HttpProbe for Body {
        async fn ping(&self, _url: &str) -> ProbeSample {
            unreachable!()
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            match self.0 {
                Ok(body) => Ok(body.as_bytes().to_vec()),
                Err(e) => Err(Error::Request(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn extracts_country_code() {
        let probe = Body(Ok(r#"{"ip":"203.0.113.9","cc":"NL"}"#));
        assert_eq!(GeolocationProbe::default().country(&probe).await, "NL");
    }

    #[tokio::test]
    async fn missing_fields_yield_empty_code() {
        let probe = Body(Ok(r#"{"ip":"203.0.113.9"}"#));
        assert_eq!(GeolocationProbe::default().country(&probe).await, "");
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let network = Body(Err("connection reset"));
        assert_eq!(GeolocationProbe::default().country(&network).await, "");

        let garbage = Body(Ok("<html>rate limited</html>"));
        assert_eq!(GeolocationProbe::default().country(&garbage).await, "");
        assert!(matches!(
            GeolocationProbe::default().lookup(&garbage).await,
            Err(Error::Serialization(_))
        ));
    }
}
