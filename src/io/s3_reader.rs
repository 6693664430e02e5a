use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, trace};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Range reader bound to one S3 object version.
///
/// Opening issues a HEAD request for the object's size and ETag; every later
/// range read is conditional on that ETag, so a dataset rewritten under an
/// open session fails with [`IoError::Modified`] instead of mixing bytes from
/// two versions.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    etag: Option<String>,
    identifier: String,
}

impl S3RangeReader {
    /// Open `key` in `bucket`. Fails with [`IoError::NotFound`] for a missing
    /// object.
    pub async fn open(
        client: Client,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, IoError> {
        let bucket = bucket.into();
        let key = key.into();
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(e, &identifier))?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;
        let etag = head.e_tag().map(str::to_string);
        debug!(object = %identifier, size, etag = etag.as_deref(), "opened remote object");

        Ok(Self {
            client,
            bucket,
            key,
            size,
            etag,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// ETag reported when the object was opened.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}

/// Map an SDK failure onto [`IoError`] by HTTP status.
fn classify<E>(err: SdkError<E, HttpResponse>, identifier: &str) -> IoError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    match status {
        Some(404) => IoError::NotFound(identifier.to_string()),
        Some(412) => IoError::Modified(identifier.to_string()),
        _ => {
            let message = err.to_string();
            if message.contains("NoSuchKey") || message.contains("NotFound") {
                IoError::NotFound(identifier.to_string())
            } else if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
                IoError::Connection(message)
            } else {
                IoError::S3(message)
            }
        }
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        trace!(object = %self.identifier, %range, "range read");

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .set_if_match(self.etag.clone())
            .send()
            .await
            .map_err(|e| classify(e, &self.identifier))?;

        resp.body
            .collect()
            .await
            .map(|body| body.into_bytes())
            .map_err(|e| IoError::Connection(e.to_string()))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Build an S3 client for `region`.
///
/// A custom `endpoint` selects an S3-compatible service such as MinIO and
/// switches the client to path-style addressing:
///
/// ```ignore
/// let minio = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// let aws = create_s3_client(None, "eu-west-1").await;
/// ```
pub async fn create_s3_client(endpoint: Option<&str>, region: &str) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(endpoint) = endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint.is_some())
        .build();
    Client::from_conf(s3_config)
}
