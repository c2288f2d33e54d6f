use crate::ByteStream;
use crate::traffic_log;
use anyhow::Context;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::instrument;

#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("API token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Self::with_headers(base_url, headers)
    }

    pub fn with_headers(base_url: &str, headers: HeaderMap) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Client {
            client,
            base_url: Self::normalize_base(base_url)?,
        })
    }

    // A base without a trailing slash would have its last segment replaced by `join`.
    fn normalize_base(base_url: &str) -> anyhow::Result<Url> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base).with_context(|| format!("Invalid base URL: {}", base_url))
    }

    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> anyhow::Result<reqwest::Response> {
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                traffic_log::log_error(endpoint, &e.to_string());
                return Err(e.into());
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            traffic_log::log_error(endpoint, &format!("{}: {}", status, error_body));
            return Err(anyhow::anyhow!(
                "Request to {} failed with status {}: {}",
                endpoint,
                status,
                error_body
            ));
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> anyhow::Result<T> {
        let text = response.text().await?;
        traffic_log::log_response_text(endpoint, &text);
        serde_json::from_str::<T>(&text)
            .with_context(|| format!("Unexpected response shape from {}", endpoint))
    }

    #[instrument(level = "trace", skip(self, query))]
    pub async fn get<T, Q>(&self, path: &str, query: &Q) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let response = self.send(path, self.client.get(url).query(query)).await?;
        Self::decode(path, response).await
    }

    #[instrument(level = "trace", skip(self, request))]
    pub async fn post<S, T>(&self, path: &str, request: &S) -> anyhow::Result<T>
    where
        S: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        traffic_log::log_request(path, &request);
        let url = self.url(path)?;
        let response = self.send(path, self.client.post(url).json(request)).await?;
        Self::decode(path, response).await
    }

    /// POST whose response body is an acknowledgement we do not interpret.
    #[instrument(level = "trace", skip(self, request))]
    pub async fn post_ack<S>(&self, path: &str, request: &S) -> anyhow::Result<()>
    where
        S: Serialize + ?Sized,
    {
        traffic_log::log_request(path, &request);
        let url = self.url(path)?;
        self.send(path, self.client.post(url).json(request)).await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self, form))]
    pub async fn post_multipart<T>(&self, path: &str, form: reqwest::multipart::Form) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        let response = self.send(path, self.client.post(url).multipart(form)).await?;
        Self::decode(path, response).await
    }

    /// POST and hand back the long-lived response body as raw chunks.
    /// Framing is left to the consumer; chunk boundaries carry no meaning.
    #[instrument(level = "trace", skip(self, request))]
    pub async fn post_stream<S>(&self, path: &str, request: &S) -> anyhow::Result<ByteStream>
    where
        S: Serialize + ?Sized,
    {
        traffic_log::log_stream_start(path, &request);
        let url = self.url(path)?;
        let response = self.send(path, self.client.post(url).json(request)).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok(Box::pin(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_keeps_base_path() {
        let client = Client::new("http://localhost:8000/api", None).unwrap();
        assert_eq!(
            client.url("conversations/3/messages").unwrap().as_str(),
            "http://localhost:8000/api/conversations/3/messages"
        );
    }

    #[test]
    fn test_url_join_strips_leading_slash() {
        let client = Client::new("http://localhost:8000/api/", None).unwrap();
        assert_eq!(
            client.url("/transcribe").unwrap().as_str(),
            "http://localhost:8000/api/transcribe"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(Client::new("not a url", None).is_err());
    }

    #[test]
    fn test_token_with_newline_rejected() {
        assert!(Client::new("http://localhost/", Some("abc\ndef")).is_err());
    }

    #[test]
    fn test_client_with_token() {
        assert!(Client::new("http://localhost/", Some("secret")).is_ok());
    }
}
