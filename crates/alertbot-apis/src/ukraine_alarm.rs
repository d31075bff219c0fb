//! Ukraine Alarm API v3 adapter (`GET /api/v3/alerts`, `GET /api/v3/regions`).
//!
//! The alerts endpoint returns only regions that currently have alerts, so the
//! full region list comes from the regions endpoint. Conditional requests use
//! `If-Modified-Since` with the previous `Last-Modified` value and a `304`
//! means nothing changed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, ACCEPT, AUTHORIZATION, IF_MODIFIED_SINCE, LAST_MODIFIED, RETRY_AFTER},
    StatusCode,
};
use serde::Deserialize;
use tracing::{debug, warn};

use alertbot_core::{
    alerts::{
        source::{AlertSource, FetchOutcome},
        types::{AlertType, FreshnessToken, RegionAlertState, RegionInfo, Snapshot},
    },
    domain::RegionId,
    errors::Error,
    Result,
};

use crate::{http_client, status_error};

/// How the client reacts to `429 Too Many Requests`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Wait used when the response carries no usable `Retry-After`.
    pub default_wait: Duration,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_wait)
            .min(self.max_wait)
    }
}

#[derive(Clone, Debug)]
pub struct UkraineAlarmClient {
    http: reqwest::Client,
    url: String,
    regions_url: Option<String>,
    token: String,
    retry: RetryPolicy,
}

impl UkraineAlarmClient {
    /// `url` is the alerts endpoint; the regions endpoint is its sibling.
    pub fn new(token: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        Ok(Self {
            http: http_client(timeout)?,
            regions_url: sibling_regions_url(&url),
            url,
            token: token.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_regions_url(mut self, url: impl Into<String>) -> Self {
        self.regions_url = Some(url.into());
        self
    }

    /// GET with the auth header, retrying `429` per the policy. Any other
    /// status is returned to the caller as-is.
    async fn get(&self, url: &str, if_modified_since: Option<&str>) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .get(url)
                .header(AUTHORIZATION, &self.token)
                .header(ACCEPT, "application/json");
            if let Some(since) = if_modified_since {
                req = req.header(IF_MODIFIED_SINCE, since);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| Error::External(format!("alert api request error: {e}")))?;
            let status = resp.status();
            if status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(resp);
            }

            if attempt >= self.retry.max_retries {
                return Err(Error::Http {
                    status: status.as_u16(),
                    body: format!("rate limited after {attempt} retries"),
                });
            }
            attempt += 1;
            let wait = self.retry.delay(resp.headers());
            warn!(
                "Alert API rate limited, retry {attempt}/{} in {:?}",
                self.retry.max_retries, wait
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl AlertSource for UkraineAlarmClient {
    async fn fetch(&self, freshness: Option<&FreshnessToken>) -> Result<FetchOutcome> {
        let resp = self
            .get(&self.url, freshness.map(|t| t.0.as_str()))
            .await?;
        let status = resp.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("Alert source unmodified");
            return Ok(FetchOutcome::Unmodified);
        }
        if !status.is_success() {
            return Err(status_error(resp).await);
        }

        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| FreshnessToken(s.to_string()));

        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("alert api body error: {e}")))?;

        let mut snapshot = parse_snapshot(&body)?;
        snapshot.freshness = last_modified;
        Ok(FetchOutcome::Fresh(snapshot))
    }

    async fn regions(&self) -> Result<Vec<RegionInfo>> {
        let Some(url) = self.regions_url.as_deref() else {
            debug!("No regions endpoint configured, catalog stays empty");
            return Ok(Vec::new());
        };

        let resp = self.get(url, None).await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("regions api body error: {e}")))?;
        parse_regions(&body)
    }
}

/// `.../api/v3/alerts` becomes `.../api/v3/regions`.
fn sibling_regions_url(alerts_url: &str) -> Option<String> {
    alerts_url
        .trim_end_matches('/')
        .strip_suffix("/alerts")
        .map(|base| format!("{base}/regions"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegion {
    #[serde(default)]
    region_id: serde_json::Value,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    active_alerts: Vec<RawAlert>,
}

#[derive(Deserialize)]
struct RawAlert {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Parse the alerts body. A body that is not a JSON array fails the fetch;
/// individual bad entries are logged and dropped.
pub fn parse_snapshot(body: &str) -> Result<Snapshot> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let serde_json::Value::Array(entries) = value else {
        return Err(Error::External(
            "alert api body is not a JSON array".to_string(),
        ));
    };

    let mut snapshot = Snapshot::default();
    for (idx, entry) in entries.into_iter().enumerate() {
        let raw: RawRegion = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping alert entry #{idx}: {e}");
                continue;
            }
        };

        let Some(region_id) = region_id_of(&raw.region_id) else {
            warn!("Dropping alert entry #{idx}: missing regionId");
            continue;
        };

        let alerts = raw
            .active_alerts
            .iter()
            .filter_map(|a| a.kind.as_deref())
            .filter(|k| !k.trim().is_empty())
            .map(AlertType::from_source);

        let name = raw
            .region_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| region_id.to_string());

        snapshot
            .regions
            .entry(region_id.clone())
            .or_insert_with(|| RegionAlertState {
                region_id,
                region_name: name,
                active_alerts: Default::default(),
            })
            .active_alerts
            .extend(alerts);
    }

    Ok(snapshot)
}

#[derive(Deserialize)]
struct RawRegions {
    #[serde(default)]
    states: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawState {
    #[serde(default)]
    region_id: serde_json::Value,
    #[serde(default)]
    region_name: Option<String>,
}

/// Parse the regions body: the top-level `states` (oblasts and Kyiv city).
/// Entries without an id or a name are dropped.
pub fn parse_regions(body: &str) -> Result<Vec<RegionInfo>> {
    let raw: RawRegions = serde_json::from_str(body)?;

    let mut out = Vec::with_capacity(raw.states.len());
    for (idx, entry) in raw.states.into_iter().enumerate() {
        let Ok(state) = serde_json::from_value::<RawState>(entry) else {
            warn!("Dropping region entry #{idx}: not an object");
            continue;
        };
        let name = state
            .region_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        match (region_id_of(&state.region_id), name) {
            (Some(region_id), Some(region_name)) => out.push(RegionInfo {
                region_id,
                region_name,
            }),
            _ => warn!("Dropping region entry #{idx}: missing id or name"),
        }
    }
    Ok(out)
}

/// `"*"` is rejected because the store uses it for the all-regions row.
fn region_id_of(v: &serde_json::Value) -> Option<RegionId> {
    match v {
        serde_json::Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && s != "*").then(|| RegionId::from(s))
        }
        serde_json::Value::Number(n) => Some(RegionId(n.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> UkraineAlarmClient {
        UkraineAlarmClient::new(
            "test-token",
            format!("{}/api/v3/alerts", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_retries: 3,
            default_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(50),
        })
    }

    fn alerts_body() -> serde_json::Value {
        serde_json::json!([
            {
                "regionId": "14",
                "regionName": "Київська область",
                "regionType": "State",
                "activeAlerts": [{"regionId": "14", "type": "AIR", "lastUpdate": "2026-01-01T10:00:00Z"}]
            },
            {
                "regionId": "27",
                "regionName": "Львівська область",
                "activeAlerts": [{"type": "ARTILLERY"}, {"type": "SOMETHING_NEW"}]
            }
        ])
    }

    #[tokio::test]
    async fn fresh_snapshot_carries_last_modified() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .and(header("Authorization", "test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(alerts_body())
                    .insert_header("Last-Modified", "Wed, 01 Jan 2026 10:00:00 GMT"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_client(&server).fetch(None).await.unwrap();
        let FetchOutcome::Fresh(snapshot) = outcome else {
            panic!("expected fresh snapshot");
        };

        assert_eq!(
            snapshot.freshness,
            Some(FreshnessToken("Wed, 01 Jan 2026 10:00:00 GMT".into()))
        );
        let kyiv = snapshot.get(&RegionId::from("14")).unwrap();
        assert_eq!(kyiv.region_name, "Київська область");
        assert!(kyiv.active_alerts.contains(&AlertType::AirRaid));
        let lviv = snapshot.get(&RegionId::from("27")).unwrap();
        assert!(lviv.active_alerts.contains(&AlertType::Artillery));
        assert!(lviv
            .active_alerts
            .contains(&AlertType::Unknown("SOMETHING_NEW".into())));
    }

    #[tokio::test]
    async fn not_modified_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .and(header("If-Modified-Since", "Wed, 01 Jan 2026 10:00:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let token = FreshnessToken("Wed, 01 Jan 2026 10:00:00 GMT".into());
        let outcome = test_client(&server).fetch(Some(&token)).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Unmodified));
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(alerts_body()))
            .mount(&server)
            .await;

        let outcome = test_client(&server).fetch(None).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Fresh(s) if s.regions.len() == 2));
    }

    #[tokio::test]
    async fn rate_limit_retries_are_bounded() {
        let server = MockServer::start().await;

        // One initial attempt plus three retries.
        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&server)
            .await;

        let err = test_client(&server).fetch(None).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 429, .. }), "got: {err}");
    }

    #[tokio::test]
    async fn server_error_fails_the_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server).fetch(None).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn malformed_body_fails_the_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(test_client(&server).fetch(None).await.is_err());
    }

    #[test]
    fn bad_entries_are_dropped() {
        let body = r#"[
            {"regionId": "", "regionName": "Blank", "activeAlerts": [{"type": "AIR"}]},
            {"regionName": "No id", "activeAlerts": [{"type": "AIR"}]},
            {"regionId": {"nested": true}, "activeAlerts": []},
            {"regionId": " * ", "regionName": "Wildcard", "activeAlerts": [{"type": "AIR"}]},
            "not an object",
            {"regionId": "9", "regionName": "  Дніпропетровська область ", "activeAlerts": [{"type": "AIR"}]},
            {"regionId": 31, "activeAlerts": [{"type": "AIR"}, {"lastUpdate": "x"}]}
        ]"#;

        let snapshot = parse_snapshot(body).unwrap();
        assert_eq!(snapshot.regions.len(), 2);
        assert_eq!(
            snapshot.get(&RegionId::from("9")).unwrap().region_name,
            "Дніпропетровська область"
        );
        let numeric = snapshot.get(&RegionId::from("31")).unwrap();
        assert_eq!(numeric.region_name, "31");
        assert_eq!(numeric.active_alerts.len(), 1);
    }

    fn regions_body() -> serde_json::Value {
        serde_json::json!({
            "states": [
                {
                    "regionId": "14",
                    "regionName": "Київська область",
                    "regionType": "State",
                    "regionChildIds": [{"regionId": "59", "regionName": "Бучанський район"}]
                },
                {"regionId": "27", "regionName": " Львівська область ", "regionType": "State"},
                {"regionId": "*", "regionName": "Bogus"},
                {"regionId": "40"},
                7
            ]
        })
    }

    #[tokio::test]
    async fn region_catalog_lists_quiet_states() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/regions"))
            .and(header("Authorization", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(regions_body()))
            .expect(1)
            .mount(&server)
            .await;

        let regions = test_client(&server).regions().await.unwrap();
        assert_eq!(
            regions,
            vec![
                RegionInfo {
                    region_id: RegionId::from("14"),
                    region_name: "Київська область".into(),
                },
                RegionInfo {
                    region_id: RegionId::from("27"),
                    region_name: "Львівська область".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn region_catalog_failure_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/regions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = test_client(&server).regions().await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 401, .. }));
    }

    #[test]
    fn regions_url_is_derived_from_alerts_url() {
        assert_eq!(
            sibling_regions_url("https://api.ukrainealarm.com/api/v3/alerts/").as_deref(),
            Some("https://api.ukrainealarm.com/api/v3/regions")
        );
        assert_eq!(sibling_regions_url("http://localhost/feed.json"), None);
    }

    #[test]
    fn body_must_be_an_array() {
        assert!(parse_snapshot(r#"{"regionId": "1"}"#).is_err());
        assert!(parse_snapshot("[]").unwrap().regions.is_empty());
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy::default();
        let mut headers = HeaderMap::new();
        assert_eq!(policy.delay(&headers), Duration::from_secs(5));

        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(policy.delay(&headers), Duration::from_secs(7));

        headers.insert(RETRY_AFTER, "3600".parse().unwrap());
        assert_eq!(policy.delay(&headers), Duration::from_secs(60));

        headers.insert(RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(policy.delay(&headers), Duration::from_secs(5));
    }
}
