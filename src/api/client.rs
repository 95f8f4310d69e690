//! HTTP client for the SellPoint REST API
//!
//! Wraps reqwest::Client with base URL handling and optional bearer token
//! injection.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Method, RequestBuilder, Response};
use url::Url;

use crate::config::Config;

/// Client for the `/chat` routes of the SellPoint API.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    access_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid api_url {:?}", config.api_url))?;
        if base.cannot_be_a_base() {
            bail!("api_url {:?} cannot be used as a base URL", config.api_url);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Build `<base>/<segments...>` with each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("api_url cannot be used as a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET request.
    pub async fn get(&self, url: Url) -> Result<Response> {
        tracing::debug!("GET {}", url);
        let resp = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    /// POST request without a body.
    pub async fn post_empty(&self, url: Url) -> Result<Response> {
        tracing::debug!("POST {}", url);
        let resp = self
            .request(Method::POST, url.clone())
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    /// PATCH request with a JSON body.
    pub async fn patch(&self, url: Url, body: &serde_json::Value) -> Result<Response> {
        tracing::debug!("PATCH {}", url);
        let resp = self
            .request(Method::PATCH, url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    /// DELETE request.
    pub async fn delete(&self, url: Url) -> Result<Response> {
        tracing::debug!("DELETE {}", url);
        let resp = self
            .request(Method::DELETE, url.clone())
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;

        check_response(resp, url.as_str()).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Check access_token in the config ('sellpoint-chat configure --token').",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> ApiClient {
        let config = Config {
            api_url: api_url.to_string(),
            ..Config::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_url_appends_segments() {
        let api = client("http://localhost:4000/api");
        let url = api.url(&["chat", "c1", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/api/chat/c1/messages");

        // Trailing slash on the base does not produce an empty segment.
        let api = client("http://localhost:4000/api/");
        let url = api.url(&["chat", "conversations"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/api/chat/conversations");
    }

    #[test]
    fn test_url_escapes_ids() {
        let api = client("https://sellpoint.example");
        let url = api.url(&["chat", "message", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "https://sellpoint.example/chat/message/a%2Fb%20c");
    }

    #[test]
    fn test_rejects_bad_base() {
        let config = Config {
            api_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(ApiClient::new(&config).is_err());

        let config = Config {
            api_url: "mailto:someone@example.com".to_string(),
            ..Config::default()
        };
        assert!(ApiClient::new(&config).is_err());
    }
}
