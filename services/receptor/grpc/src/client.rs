//! Collector client for the `StreamReport` client-streaming call.

use crate::error::TransportError;
use crate::proto::receptor_v1::ReportChunk;
use std::path::PathBuf;
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{IntoStreamingRequest, Response, Status};
use tracing::{debug, info};

/// Fully-qualified method path of the streaming report call
pub const STREAM_REPORT_PATH: &str = "/receptor_v1.Receptor/StreamReport";

/// TLS settings for the collector connection
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Use TLS
    pub enabled: bool,
    /// PEM bundle of trusted roots
    pub ca_file: Option<PathBuf>,
    /// Server name to verify, defaults to the host
    pub domain: Option<String>,
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collector host
    pub host: String,
    /// Collector port
    pub port: u16,
    /// Bearer token sent with every call
    pub access_token: Option<String>,
    /// Per-call deadline
    pub timeout: Duration,
    /// Connection establishment deadline
    pub connect_timeout: Duration,
    /// TLS settings
    pub tls: TlsSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            access_token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tls: TlsSettings::default(),
        }
    }
}

impl ClientConfig {
    fn uri(&self) -> String {
        let scheme = if self.tls.enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Client for the collector's `Receptor` service
#[derive(Debug, Clone)]
pub struct ReceptorClient {
    inner: tonic::client::Grpc<Channel>,
    authorization: Option<MetadataValue<Ascii>>,
}

impl ReceptorClient {
    /// Connect to the collector described by `config`
    pub async fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let uri = config.uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| TransportError::Open(format!("invalid collector address {}: {}", uri, e)))?
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout);
        let endpoint = apply_tls(endpoint, config).await?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Open(format!("failed to connect to {}: {}", uri, e)))?;
        info!("Connected to collector at {}", uri);

        let authorization = match &config.access_token {
            Some(token) if !token.is_empty() => Some(
                format!("Bearer {}", token)
                    .parse::<MetadataValue<Ascii>>()
                    .map_err(|e| TransportError::Open(format!("access token is not a valid header value: {}", e)))?,
            ),
            _ => None,
        };

        Ok(Self::from_channel(channel, authorization))
    }

    /// Wrap an existing channel
    pub fn from_channel(channel: Channel, authorization: Option<MetadataValue<Ascii>>) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
            authorization,
        }
    }

    /// Run `StreamReport`: send every unit of `request`, then wait for the acknowledgement
    pub async fn stream_report(
        &mut self,
        request: impl IntoStreamingRequest<Message = ReportChunk>,
    ) -> Result<Response<()>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))?;

        let mut request = request.into_streaming_request();
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert("authorization", value.clone());
        }

        debug!("Starting {}", STREAM_REPORT_PATH);
        let codec = tonic::codec::ProstCodec::<ReportChunk, ()>::default();
        let path = PathAndQuery::from_static(STREAM_REPORT_PATH);
        self.inner.client_streaming(request, path, codec).await
    }
}

#[cfg(feature = "tls")]
async fn apply_tls(endpoint: Endpoint, config: &ClientConfig) -> Result<Endpoint, TransportError> {
    use tonic::transport::{Certificate, ClientTlsConfig};

    if !config.tls.enabled {
        return Ok(endpoint);
    }
    let mut tls = ClientTlsConfig::new().domain_name(config.tls.domain.clone().unwrap_or_else(|| config.host.clone()));
    if let Some(ca_file) = &config.tls.ca_file {
        let pem = tokio::fs::read(ca_file)
            .await
            .map_err(|e| TransportError::Open(format!("failed to read CA file {}: {}", ca_file.display(), e)))?;
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }
    endpoint
        .tls_config(tls)
        .map_err(|e| TransportError::Open(format!("invalid TLS configuration: {}", e)))
}

#[cfg(not(feature = "tls"))]
async fn apply_tls(endpoint: Endpoint, config: &ClientConfig) -> Result<Endpoint, TransportError> {
    if config.tls.enabled {
        return Err(TransportError::Open(
            "TLS requested but receptor was built without the `tls` feature".to_string(),
        ));
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_scheme_follows_tls() {
        let mut config = ClientConfig::default();
        assert_eq!(config.uri(), "http://localhost:8888");
        config.tls.enabled = true;
        config.host = "collector.internal".to_string();
        config.port = 443;
        assert_eq!(config.uri(), "https://collector.internal:443");
    }

    #[tokio::test]
    async fn test_invalid_host_is_open_error() {
        let config = ClientConfig {
            host: "bad host".to_string(),
            ..ClientConfig::default()
        };
        let err = ReceptorClient::connect(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::Open(_)));
    }

    #[cfg(not(feature = "tls"))]
    #[tokio::test]
    async fn test_tls_without_feature_rejected() {
        let mut config = ClientConfig::default();
        config.tls.enabled = true;
        let err = ReceptorClient::connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("tls"));
    }
}
