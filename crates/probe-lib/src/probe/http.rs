//! HTTP GET probe

use super::{async_trait, HeaderList, HttpProber, ProbeError, ProbeOutcome};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use std::time::Duration;
use url::Url;

/// Response bodies beyond this many bytes are cut from the probe output
const MAX_OUTPUT_BYTES: usize = 10 * 1024;

const DEFAULT_USER_AGENT: &str = concat!("probe-agent/", env!("CARGO_PKG_VERSION"));

/// Issues a GET request; any status in `200..400` is healthy.
///
/// Server certificates are not verified.
#[derive(Debug, Clone)]
pub struct ReqwestHttpProber {
    client: reqwest::Client,
}

impl ReqwestHttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    fn header_map(headers: &HeaderList) -> Result<HeaderMap, ProbeError> {
        let mut map = HeaderMap::new();
        for (name, values) in headers {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ProbeError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            for value in values {
                let value =
                    HeaderValue::from_str(value).map_err(|e| ProbeError::InvalidHeader {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?;
                map.append(header.clone(), value);
            }
        }

        if !map.contains_key(USER_AGENT) {
            map.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        Ok(map)
    }
}

#[async_trait]
impl HttpProber for ReqwestHttpProber {
    async fn probe(
        &self,
        url: &Url,
        headers: &HeaderList,
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        let headers = Self::header_map(headers)?;

        let response = match self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            // Unreachable endpoints are unhealthy, not errors
            Err(e) => return Ok(ProbeOutcome::failure(e.to_string())),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Ok(ProbeOutcome::failure(e.to_string())),
        };
        let output = String::from_utf8_lossy(&body[..body.len().min(MAX_OUTPUT_BYTES)]).into_owned();

        if (200..400).contains(&status.as_u16()) {
            Ok(ProbeOutcome::success(output))
        } else {
            Ok(ProbeOutcome::failure(format!(
                "HTTP probe failed with statuscode: {}",
                status.as_u16()
            )))
        }
    }
}
