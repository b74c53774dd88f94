use crate::error::{Context, ProbeError, Result};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// `wget --spider` style reachability check: `HEAD`, falling back to `GET` for servers
/// that refuse `HEAD`. Any 2xx final status counts as reachable.
#[derive(Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(concat!("readiness-gate/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .context("failed to build HTTP probe client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn check(&self, url: &Url) -> std::result::Result<(), ProbeError> {
        let mut status = self.send(Method::HEAD, url).await?;
        if matches!(
            status,
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            tracing::debug!(url = %url, status = status.as_u16(), "HEAD refused, retrying with GET");
            status = self.send(Method::GET, url).await?;
        }

        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::http(
                url.as_str(),
                format!("unexpected status {status}"),
            ))
        }
    }

    async fn send(&self, method: Method, url: &Url) -> std::result::Result<StatusCode, ProbeError> {
        self.client
            .request(method, url.clone())
            .send()
            .await
            .map(|response| response.status())
            .map_err(|err| ProbeError::http(url.as_str(), describe(&err)))
    }
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
