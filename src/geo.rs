use crate::config::Config;
use crate::http::build_client;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("georef request failed: {0}")]
    Request(String),
    #[error("georef response invalid: {0}")]
    Deserialize(String),
}

/// One (city, province) pair from the reference service. Canonical
/// orthography, accents included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityProvince {
    pub city: String,
    pub province: String,
}

/// Source of the geographic reference table. The table is fetched once per
/// run and treated as read-only ground truth; tests inject a fixture
/// implementation instead of the live service.
pub trait GeoSource {
    fn fetch(&self) -> impl Future<Output = Result<Vec<CityProvince>, GeoError>>;
}

/// Client for the datos.gob.ar georef municipalities endpoint.
#[derive(Debug, Clone)]
pub struct GeorefClient {
    url: String,
    http: Client,
}

impl GeorefClient {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.geo_url.clone(),
            http: build_client(config),
        }
    }
}

impl GeoSource for GeorefClient {
    async fn fetch(&self) -> Result<Vec<CityProvince>, GeoError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| GeoError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(GeoError::Request(format!("HTTP {}", response.status())));
        }

        let payload: GeorefResponse = response
            .json()
            .await
            .map_err(|err| GeoError::Deserialize(err.to_string()))?;

        Ok(payload.into_pairs())
    }
}

#[derive(Debug, Deserialize)]
struct GeorefResponse {
    #[serde(default)]
    municipios: Vec<Municipio>,
}

impl GeorefResponse {
    /// Entries without a city or province name are dropped from the
    /// reference table, not from any listing row.
    fn into_pairs(self) -> Vec<CityProvince> {
        self.municipios
            .into_iter()
            .filter_map(|m| {
                let city = m.nombre?;
                let province = m.provincia.and_then(|p| p.nombre)?;
                Some(CityProvince { city, province })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Municipio {
    #[serde(default)]
    nombre: Option<String>,
    #[serde(default)]
    provincia: Option<Provincia>,
}

#[derive(Debug, Deserialize)]
struct Provincia {
    #[serde(default)]
    nombre: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn municipios_payload_flattens_to_pairs() {
        let payload: GeorefResponse = serde_json::from_str(
            r#"{"municipios": [
                {"nombre": "Río Cuarto", "provincia": {"id": "14", "nombre": "Córdoba"}},
                {"nombre": "Rosario", "provincia": {"nombre": "Santa Fe"}},
                {"nombre": "Sin Provincia"}
            ]}"#,
        )
        .expect("georef payload");
        let pairs = payload.into_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].city, "Río Cuarto");
        assert_eq!(pairs[0].province, "Córdoba");
    }
}
