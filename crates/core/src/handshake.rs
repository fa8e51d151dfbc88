//! Handshake and Agent Provisioning
//!
//! Before a transport can join, the client needs a connection descriptor and
//! a running agent. The default [`HttpHandshake`] obtains both from the
//! RTVI HTTP endpoints; callers can substitute any [`Handshake`]
//! implementation, e.g. [`StaticHandshake`] for a pre-provisioned room.

use crate::{client::ClientOptions, config::ClientConfig, transport::ConnectionDescriptor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What the authentication endpoint returned.
///
/// Either value may be missing; a missing or empty value means the server
/// could not allocate a session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthBundle {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthBundle {
    pub fn into_descriptor(self) -> Option<ConnectionDescriptor> {
        match (self.room, self.token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Some(ConnectionDescriptor { url, token })
            }
            _ => None,
        }
    }
}

/// Defines the contract for obtaining a connection descriptor and starting the agent.
///
/// This abstraction lets the session client swap the default HTTP exchange
/// for a custom routine without changing how it connects afterwards.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Authenticates the session.
    ///
    /// Returning a bundle without a usable room/token is not an error here;
    /// the client reports it as a capacity condition.
    async fn authenticate(&self) -> Result<AuthBundle>;

    /// Starts the remote agent for the room in `descriptor` with `config`.
    async fn provision(&self, descriptor: &ConnectionDescriptor, config: &ClientConfig)
    -> Result<()>;
}

/// The default handshake: `POST {base_url}/authenticate` then `POST {base_url}/start_bot`.
#[derive(Debug, Clone)]
pub struct HttpHandshake {
    client: reqwest::Client,
    base_url: String,
    headers: BTreeMap<String, String>,
    params: Map<String, Value>,
}

#[derive(Serialize)]
struct StartBotRequest<'a> {
    room: &'a str,
    config: &'a ClientConfig,
    #[serde(flatten)]
    params: &'a Map<String, Value>,
}

impl HttpHandshake {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: BTreeMap::new(),
            params: Map::new(),
        }
    }

    /// Uses the base URL, start headers and start params of `options`.
    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(options.base_url.clone())
            .with_headers(options.start_headers.clone())
            .with_params(options.start_params.clone())
    }

    /// Extra headers sent with both requests.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Extra top-level body fields sent with both requests.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, endpoint);
        self.headers
            .iter()
            .fold(self.client.post(url), |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            })
    }
}

#[async_trait]
impl Handshake for HttpHandshake {
    async fn authenticate(&self) -> Result<AuthBundle> {
        let mut request = self.post("authenticate");
        if !self.params.is_empty() {
            request = request.json(&self.params);
        }
        let response = request
            .send()
            .await
            .context("authentication request failed")?;

        let status = response.status();
        if !status.is_success() {
            // A refused authentication is how the server signals it is busy.
            warn!(%status, "Authentication was refused.");
            return Ok(AuthBundle::default());
        }
        match response.json::<AuthBundle>().await {
            Ok(bundle) => {
                debug!(has_room = bundle.room.is_some(), "Authentication response received.");
                Ok(bundle)
            }
            Err(e) => {
                warn!(error = %e, "Authentication response was not a room/token bundle.");
                Ok(AuthBundle::default())
            }
        }
    }

    async fn provision(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &ClientConfig,
    ) -> Result<()> {
        let body = StartBotRequest {
            room: &descriptor.url,
            config,
            params: &self.params,
        };
        self.post("start_bot")
            .json(&body)
            .send()
            .await
            .context("start_bot request failed")?
            .error_for_status()
            .context("start_bot was rejected")?;
        info!(room = %descriptor.url, "Bot provisioned.");
        Ok(())
    }
}

/// A handshake for sessions whose room, token and agent already exist.
///
/// `authenticate` returns the fixed descriptor; `provision` does nothing.
#[derive(Debug, Clone)]
pub struct StaticHandshake {
    descriptor: ConnectionDescriptor,
}

impl StaticHandshake {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Handshake for StaticHandshake {
    async fn authenticate(&self) -> Result<AuthBundle> {
        Ok(AuthBundle {
            room: Some(self.descriptor.url.clone()),
            token: Some(self.descriptor.token.clone()),
        })
    }

    async fn provision(&self, descriptor: &ConnectionDescriptor, _config: &ClientConfig) -> Result<()> {
        debug!(room = %descriptor.url, "Using pre-provisioned bot.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_requires_room_and_token() {
        let full = AuthBundle {
            room: Some("https://rooms/abc".into()),
            token: Some("t".into()),
        };
        assert_eq!(
            full.into_descriptor(),
            Some(ConnectionDescriptor {
                url: "https://rooms/abc".into(),
                token: "t".into()
            })
        );

        let no_token = AuthBundle {
            room: Some("https://rooms/abc".into()),
            token: None,
        };
        assert!(no_token.into_descriptor().is_none());

        let empty_room = AuthBundle {
            room: Some(String::new()),
            token: Some("t".into()),
        };
        assert!(empty_room.into_descriptor().is_none());
    }

    #[test]
    fn test_bundle_deserializes_partial_responses() {
        let bundle: AuthBundle = serde_json::from_str(r#"{"room":"r"}"#).unwrap();
        assert_eq!(bundle.room.as_deref(), Some("r"));
        assert!(bundle.token.is_none());

        let bundle: AuthBundle = serde_json::from_str("{}").unwrap();
        assert_eq!(bundle, AuthBundle::default());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let handshake = HttpHandshake::new("http://localhost:7860/");
        assert_eq!(handshake.base_url(), "http://localhost:7860");
    }

    #[tokio::test]
    async fn test_static_handshake_returns_fixed_descriptor() {
        let descriptor = ConnectionDescriptor {
            url: "wss://agent/room".into(),
            token: "abc".into(),
        };
        let handshake = StaticHandshake::new(descriptor.clone());

        let bundle = handshake.authenticate().await.unwrap();
        assert_eq!(bundle.into_descriptor(), Some(descriptor.clone()));
        assert!(handshake.provision(&descriptor, &ClientConfig::new()).await.is_ok());
    }
}
