//! Execution of tunneled requests on the endpoint side.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{
    Client,
    Method,
    Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};

use super::{SKIPPED_REQUEST_HEADERS, collect_headers, is_skipped};
use crate::message::{ForwardedRequest, ForwardedResponse, HeaderMultimap};

/// Executes a tunneled request and produces its response.
///
/// Implementations never fail: problems reaching the target become a
/// response with an error status so the caller always gets an answer.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn execute(&self, request: ForwardedRequest) -> ForwardedResponse;
}

/// Replays requests against a fixed base URL with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpDownstream {
    client: Client,
    base_url: String,
}

impl HttpDownstream {
    /// Forward to `base_url` with a default client.
    ///
    /// # Errors
    ///
    /// Returns a [`reqwest::Error`] if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(Client::builder().build()?, base_url))
    }

    /// Forward to `base_url` through an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str { &self.base_url }

    /// Absolute URL for `request`: base, path and `?query` when present.
    #[must_use]
    pub fn target_url(&self, request: &ForwardedRequest) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            request.path_and_query()
        )
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn execute(&self, request: ForwardedRequest) -> ForwardedResponse {
        let id = request.id.clone();
        let target = self.target_url(&request);
        let (method, url) = match (
            Method::from_bytes(request.method.as_bytes()),
            Url::parse(&target),
        ) {
            (Ok(method), Ok(url)) => (method, url),
            (method, url) => {
                warn!(
                    "cannot build downstream request: id={id}, method_ok={}, url={target}, \
                     url_ok={}",
                    method.is_ok(),
                    url.is_ok()
                );
                return ForwardedResponse::error(id, 500, "Failed to create request");
            }
        };

        let response = match self
            .client
            .request(method, url)
            .headers(outbound_headers(&request.headers))
            .body(request.body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("downstream request failed: id={id}, url={target}, error={err}");
                return ForwardedResponse::error(id, 502, "Failed to execute request");
            }
        };

        let status_code = response.status().as_u16();
        let headers = collect_headers(response.headers());
        match response.bytes().await {
            Ok(body) => {
                debug!("downstream answered: id={id}, status={status_code}, bytes={}", body.len());
                ForwardedResponse {
                    id,
                    status_code,
                    headers,
                    body: body.to_vec(),
                }
            }
            Err(err) => {
                warn!("downstream body unreadable: id={id}, error={err}");
                ForwardedResponse::error(id, 500, "Failed to read response body")
            }
        }
    }
}

fn outbound_headers(headers: &HeaderMultimap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, values) in headers {
        if is_skipped(&SKIPPED_REQUEST_HEADERS, name) {
            continue;
        }
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("skipping invalid header name: name={name}");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    out.append(header.clone(), value);
                }
                Err(_) => debug!("skipping invalid header value: name={name}"),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::fragment::MessageId;

    fn request(method: &str, path: &str, query: &str) -> ForwardedRequest {
        ForwardedRequest {
            id: MessageId::new("d-1"),
            method: method.into(),
            path: path.into(),
            query: query.into(),
            ..ForwardedRequest::default()
        }
    }

    #[rstest]
    #[case("http://target:8080", "/a", "", "http://target:8080/a")]
    #[case("http://target:8080/", "/a", "x=1&y=2", "http://target:8080/a?x=1&y=2")]
    fn target_url_joins_base_path_and_query(
        #[case] base: &str,
        #[case] path: &str,
        #[case] query: &str,
        #[case] expected: &str,
    ) {
        let downstream = HttpDownstream::with_client(Client::new(), base);
        assert_eq!(downstream.target_url(&request("GET", path, query)), expected);
    }

    #[test]
    fn connection_headers_are_not_forwarded() {
        let mut headers = HeaderMultimap::new();
        headers.insert("Host".into(), vec!["gateway:80".into()]);
        headers.insert("Content-Length".into(), vec!["5".into()]);
        headers.insert("X-Trace".into(), vec!["a".into(), "b".into()]);
        let out = outbound_headers(&headers);
        assert!(out.get("host").is_none());
        assert!(out.get("content-length").is_none());
        let traces: Vec<_> = out.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["a", "b"]);
    }

    #[tokio::test]
    async fn invalid_method_is_a_local_500() {
        let downstream = HttpDownstream::with_client(Client::new(), "http://127.0.0.1:9");
        let response = downstream.execute(request("BAD METHOD", "/", "")).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body, b"Failed to create request");
        assert_eq!(response.id, MessageId::new("d-1"));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_502() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let downstream = HttpDownstream::with_client(Client::new(), format!("http://{addr}"));
        let response = downstream.execute(request("GET", "/", "")).await;
        assert_eq!(response.status_code, 502);
        assert_eq!(response.body, b"Failed to execute request");
        assert_eq!(
            response.headers.get("Content-Type"),
            Some(&vec!["text/plain".to_owned()])
        );
    }
}
