//! HTTP fetching with bounded retry and a hard per-attempt deadline.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use marketlore_shared::{CrawlConfig, MarketloreError, Result, RetryPolicy};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("marketlore/", env!("CARGO_PKG_VERSION"));

/// Query parameters whose values never appear in logs or errors.
const SECRET_PARAMS: &[&str] = &["access_token", "api_key", "apikey", "key", "token", "client_secret"];

/// Shared HTTP client for every crawler variant.
///
/// Each request runs under the crawl [`RetryPolicy`]: non-2xx statuses,
/// transport errors and timeouts are retried, and every attempt is cancelled
/// after `timeout`. URLs in logs and errors pass through [`redact_url`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| {
                MarketloreError::SourceFetch(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            retry: config.retry_policy(),
            timeout: config.request_timeout,
        })
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let shown = redact_url(url);
        self.retry
            .run(&shown, || {
                debug!(url = %shown, "fetching");
                self.attempt(url, &shown)
            })
            .await
    }

    /// GET `url` and deserialize the JSON body. Malformed JSON is a parse
    /// error and is not retried.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| MarketloreError::parse(format!("{}: invalid JSON: {e}", redact_url(url))))
    }

    async fn attempt(&self, url: &str, shown: &str) -> Result<String> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| MarketloreError::SourceFetch(format!("{shown}: {}", e.without_url())))?;

            let status = response.status();
            if !status.is_success() {
                return Err(MarketloreError::SourceFetch(format!("{shown}: HTTP {status}")));
            }

            response.text().await.map_err(|e| {
                MarketloreError::SourceFetch(format!("{shown}: body read failed: {}", e.without_url()))
            })
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(MarketloreError::SourceFetch(format!(
                "{shown}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// `url` with the values of credential-bearing query parameters masked.
///
/// Unparseable input is reduced to everything before the query string.
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.split('?').next().unwrap_or_default().to_string();
    };
    if parsed.query().is_none() {
        return parsed.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let masked = SECRET_PARAMS.iter().any(|s| k.eq_ignore_ascii_case(s));
            let value = if masked { "REDACTED".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(attempts: u32) -> CrawlConfig {
        CrawlConfig {
            max_attempts: attempts,
            retry_delay: Duration::from_millis(5),
            request_timeout: Duration::from_millis(200),
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn redaction_masks_credentials_only() {
        let shown = redact_url("https://graph.example.com/v19.0/178?fields=id,caption&access_token=secret-abc");
        assert!(!shown.contains("secret-abc"));
        assert!(shown.contains("access_token=REDACTED"));
        assert!(shown.contains("fields=id%2Ccaption"));

        assert_eq!(redact_url("https://example.com/feed"), "https://example.com/feed");
        assert_eq!(redact_url("not a url?token=abc"), "not a url");
    }

    #[tokio::test]
    async fn retries_exactly_max_attempts_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(3)).unwrap();
        let err = fetcher
            .get_text(&format!("{}/feed", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketloreError::SourceFetch(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(3)).unwrap();
        let body = fetcher
            .get_text(&format!("{}/feed", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(2)).unwrap();
        let err = fetcher.get_text(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(3)).unwrap();
        let err = fetcher
            .get_json::<serde_json::Value>(&server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketloreError::Parse { .. }));
    }
}
