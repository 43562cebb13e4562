//! SPARQL protocol over HTTP with reqwest

use super::digest::DigestChallenge;
use super::results::{SparqlResults, RESULTS_JSON};
use super::SparqlTransport;
use crate::error::{CraftsError, CraftsResult};
use crate::model::{AuthInfo, Connection, HttpMethod};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;
use tracing::warn;

/// Longest store error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> CraftsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CraftsError::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }

    fn params<'a>(conn: &'a Connection, text: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = Vec::with_capacity(3);
        if let Some(graph) = &conn.graph {
            params.push(("default-graph-uri", graph.as_str()));
        }
        params.push((conn.param.as_str(), text));
        params.push(("format", RESULTS_JSON));
        params
    }

    /// Request for `text` plus the request-URI used by digest auth
    fn build(&self, conn: &Connection, text: &str) -> CraftsResult<(RequestBuilder, String)> {
        let mut url = Url::parse(&conn.uri).map_err(|e| CraftsError::Transport {
            endpoint: conn.id.clone(),
            message: format!("invalid endpoint URI: {}", e),
        })?;
        let params = Self::params(conn, text);

        let builder = match conn.method {
            HttpMethod::Get => {
                url.query_pairs_mut().extend_pairs(params);
                let digest_uri = request_uri(&url);
                (self.client.get(url), digest_uri)
            }
            HttpMethod::Post => {
                let body = params
                    .into_iter()
                    .map(|(k, v)| {
                        format!(
                            "{}={}",
                            utf8_percent_encode(k, NON_ALPHANUMERIC),
                            utf8_percent_encode(v, NON_ALPHANUMERIC)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                let digest_uri = request_uri(&url);
                let req = self
                    .client
                    .post(url)
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body);
                (req, digest_uri)
            }
        };
        let (req, uri) = builder;
        Ok((req.header(ACCEPT, RESULTS_JSON), uri))
    }

    async fn send(&self, conn: &Connection, text: &str) -> CraftsResult<Response> {
        let (req, uri) = self.build(conn, text)?;
        let resp = match &conn.auth {
            None => dispatch(conn, req).await?,
            Some(AuthInfo::Basic { user, password }) => dispatch(conn, req.basic_auth(user, Some(password))).await?,
            Some(AuthInfo::Digest { user, password }) => {
                let first = dispatch(conn, req).await?;
                if first.status() != StatusCode::UNAUTHORIZED {
                    first
                } else {
                    let challenge = first
                        .headers()
                        .get_all(WWW_AUTHENTICATE)
                        .iter()
                        .filter_map(|h| h.to_str().ok())
                        .find_map(DigestChallenge::parse);
                    match challenge {
                        Some(challenge) => {
                            let method = match conn.method {
                                HttpMethod::Get => "GET",
                                HttpMethod::Post => "POST",
                            };
                            let (retry, _) = self.build(conn, text)?;
                            let header = challenge.authorization(user, password, method, &uri);
                            dispatch(conn, retry.header(AUTHORIZATION, header)).await?
                        }
                        None => {
                            warn!(endpoint = %conn.id, "401 without a digest challenge");
                            first
                        }
                    }
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let mut message = resp.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(CraftsError::Endpoint {
                endpoint: conn.id.clone(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

async fn dispatch(conn: &Connection, req: RequestBuilder) -> CraftsResult<Response> {
    req.send().await.map_err(|e| CraftsError::Transport {
        endpoint: conn.id.clone(),
        message: e.to_string(),
    })
}

fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

#[async_trait]
impl SparqlTransport for HttpTransport {
    async fn select(&self, conn: &Connection, query: &str) -> CraftsResult<SparqlResults> {
        let resp = self.send(conn, query).await?;
        let body = resp.bytes().await.map_err(|e| CraftsError::Transport {
            endpoint: conn.id.clone(),
            message: e.to_string(),
        })?;
        SparqlResults::parse(&conn.id, &body)
    }

    async fn update(&self, conn: &Connection, update: &str) -> CraftsResult<()> {
        self.send(conn, update).await.map(|_| ())
    }
}
