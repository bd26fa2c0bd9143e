use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;

use super::blocking::{block_on, block_on_with_timeout};
use super::object_store::ArtifactStore;

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// S3-backed artifact store. The bucket is the container.
#[derive(Clone)]
pub struct S3ArtifactStore {
    s3_client: aws_sdk_s3::Client,
}

impl S3ArtifactStore {
    pub fn new(s3_client: aws_sdk_s3::Client) -> Self {
        Self { s3_client }
    }
}

impl ArtifactStore for S3ArtifactStore {
    fn write_object(
        &self,
        container: &str,
        key: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(), String> {
        let bucket = container.to_string();
        let object_key = key.to_string();
        let body_bytes = body.to_vec();
        let client = self.s3_client.clone();

        block_on_with_timeout("s3 put_object", timeout, async move {
            client
                .put_object()
                .bucket(bucket)
                .key(object_key)
                .content_type(ARCHIVE_CONTENT_TYPE)
                .body(ByteStream::from(body_bytes))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write object to s3: {error}"))
        })?
    }

    fn object_size(
        &self,
        container: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, String> {
        let bucket = container.to_string();
        let object_key = key.to_string();
        let client = self.s3_client.clone();

        block_on_with_timeout("s3 head_object", timeout, async move {
            let response = client
                .head_object()
                .bucket(bucket)
                .key(object_key)
                .send()
                .await;
            match response {
                Ok(output) => Ok(Some(
                    output
                        .content_length()
                        .and_then(|length| u64::try_from(length).ok())
                        .unwrap_or(0),
                )),
                Err(error)
                    if error
                        .as_service_error()
                        .map(|service_error| service_error.is_not_found())
                        .unwrap_or(false) =>
                {
                    Ok(None)
                }
                Err(error) => Err(format!("failed to read object metadata from s3: {error}")),
            }
        })?
    }

    fn delete_object(&self, container: &str, key: &str) -> Result<(), String> {
        let bucket = container.to_string();
        let object_key = key.to_string();
        let client = self.s3_client.clone();

        block_on(async move {
            client
                .delete_object()
                .bucket(bucket)
                .key(object_key)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete object from s3: {error}"))
        })?
    }
}
