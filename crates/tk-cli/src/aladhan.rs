//! Daily prayer times from the Aladhan API.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;

use tk_engine::{CalculationMethod, Location};

#[derive(Debug, Deserialize)]
struct Envelope {
    code: u16,
    #[serde(default)]
    status: String,
    data: Option<Day>,
}

#[derive(Debug, Deserialize)]
struct Day {
    timings: BTreeMap<String, String>,
}

/// Request URL for `date` at `location`.
pub fn timings_url(domain: &str, location: &Location, method: CalculationMethod, date: NaiveDate) -> String {
    let date = date.format("%d-%m-%Y");
    match location {
        Location::Coordinates {
            latitude,
            longitude,
        } => format!(
            "https://{}/v1/timings/{}?latitude={}&longitude={}&method={}",
            domain, date, latitude, longitude, method.0
        ),
        Location::City { city, country } => format!(
            "https://{}/v1/timingsByCity/{}?city={}&country={}&method={}",
            domain,
            date,
            encode(city),
            encode(country),
            method.0
        ),
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub async fn fetch_timings(
    client: &reqwest::Client,
    url: &str,
) -> Result<BTreeMap<String, String>, String> {
    let envelope: Envelope = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Request failed: {}", e))?
        .json()
        .await
        .map_err(|e| format!("Unreadable response: {}", e))?;

    match envelope.data {
        Some(day) if envelope.code == 200 => Ok(day.timings),
        _ => Err(format!(
            "API answered {} {}",
            envelope.code, envelope.status
        )),
    }
}

/// Blocking client for the API.
pub struct AladhanSource {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    domain: String,
}

impl AladhanSource {
    pub fn new(domain: &str) -> Result<Self, String> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
        Ok(Self {
            runtime,
            client: reqwest::Client::new(),
            domain: domain.to_string(),
        })
    }

    pub fn fetch(
        &self,
        location: &Location,
        method: CalculationMethod,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, String>, String> {
        let url = timings_url(&self.domain, location, method, date);
        log::debug!("GET {}", url);
        self.runtime.block_on(fetch_timings(&self.client, &url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_url_carries_date_and_method() {
        let url = timings_url(
            "api.aladhan.com",
            &Location::Coordinates {
                latitude: 41.01,
                longitude: 28.97,
            },
            CalculationMethod::ISNA,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        );
        assert_eq!(
            url,
            "https://api.aladhan.com/v1/timings/14-03-2026?latitude=41.01&longitude=28.97&method=2"
        );
    }

    #[test]
    fn city_url_is_encoded() {
        let url = timings_url(
            "api.aladhan.com",
            &Location::City {
                city: "New York".into(),
                country: "US".into(),
            },
            CalculationMethod::MWL,
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        );
        assert!(url.ends_with("timingsByCity/02-01-2026?city=New+York&country=US&method=3"));
    }

    #[test]
    fn envelope_parses_timings() {
        let body = r#"{"code":200,"status":"OK","data":{"timings":{"Fajr":"05:01","Isha":"19:40"},"date":{}}}"#;
        let envelope: Envelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.unwrap().timings["Fajr"], "05:01");
    }
}
