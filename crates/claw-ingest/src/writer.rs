//! Pushes encoded write requests to the remote-write endpoint.

use bytes::Bytes;
use claw_remote_write::{WriteRequest, codec};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::client::ResilientClient;
use crate::error::{IngestError, IngestResult};

/// Media type of a remote-write body.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
/// Remote-write protocol version sent with every push.
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";
/// Header carrying the remote-write protocol version.
pub const REMOTE_WRITE_VERSION_HEADER: HeaderName =
    HeaderName::from_static("x-prometheus-remote-write-version");
/// Header carrying the tenant identifier.
pub const TENANT_HEADER: HeaderName = HeaderName::from_static("x-scope-orgid");

/// Sends write requests for one tenant to one endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWriter {
    client: ResilientClient,
    url: String,
    tenant_id: String,
    headers: HeaderMap,
}

/// Summary of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    /// Status returned by the backend.
    pub status: u16,
    /// Size of the compressed payload.
    pub payload_bytes: usize,
}

impl RemoteWriter {
    /// Creates a writer.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Config` if the tenant is not a valid header value.
    pub fn new(
        client: ResilientClient,
        url: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> IngestResult<Self> {
        let tenant_id = tenant_id.into();
        let tenant = HeaderValue::from_str(&tenant_id)
            .map_err(|_| IngestError::Config(format!("tenant id '{tenant_id}' is not a valid header value")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("snappy"));
        headers.insert(REMOTE_WRITE_VERSION_HEADER, HeaderValue::from_static(REMOTE_WRITE_VERSION));
        headers.insert(TENANT_HEADER, tenant);

        Ok(Self {
            client,
            url: url.into(),
            tenant_id,
            headers,
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tenant the writer pushes for.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Headers attached to every push.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Encodes and pushes a request, retrying per the client policy.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Encode` if the request is not schema-valid and
    /// `IngestError::Upstream` if the backend never accepted it.
    pub async fn push(&self, request: &WriteRequest) -> IngestResult<PushReceipt> {
        let payload = codec::encode(request)?;
        let payload_bytes = payload.len();

        let response = self
            .client
            .post(&self.url, self.headers.clone(), Bytes::from(payload))
            .await?;

        debug!(
            client = %self.client.name(),
            url = %self.url,
            tenant = %self.tenant_id,
            series = request.timeseries.len(),
            payload_bytes,
            status = response.status,
            "pushed write request"
        );

        Ok(PushReceipt {
            status: response.status,
            payload_bytes,
        })
    }
}
