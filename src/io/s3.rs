//! Object storage over S3-compatible HTTP endpoints.
//!
//! Objects are addressed as `s3://<bucket>/<key>` and fetched with plain
//! Range requests, so only objects readable without request signing
//! (public buckets, presigned gateways, local S3 emulators) are reachable.

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{HttpOptions, HttpRangeReader, ReadAt};

const DEFAULT_REGION: &str = "us-east-1";

/// Bucket and key parsed from an `s3://` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse the part of a location after the `s3://` scheme.
    pub fn parse(rest: &str) -> Result<Self> {
        let Some((bucket, key)) = rest.split_once('/') else {
            bail!("S3 location must look like s3://<bucket>/<key>, got s3://{rest}");
        };
        if bucket.is_empty() || key.is_empty() {
            bail!("S3 location must name both a bucket and a key, got s3://{rest}");
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Object URL for the given endpoint.
    ///
    /// Without an explicit endpoint the AWS virtual-hosted style is used;
    /// with one, path style (`<endpoint>/<bucket>/<key>`).
    pub fn url(&self, endpoint: Option<&str>, region: Option<&str>) -> String {
        match endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                self.key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket,
                region.unwrap_or(DEFAULT_REGION),
                self.key
            ),
        }
    }
}

/// Range reader for an object in S3-compatible storage.
pub struct S3RangeReader {
    location: S3Location,
    http: HttpRangeReader,
}

impl S3RangeReader {
    pub async fn new(
        location: S3Location,
        endpoint: Option<&str>,
        region: Option<&str>,
        options: HttpOptions,
    ) -> Result<Self> {
        let url = location.url(endpoint, region);
        let http = HttpRangeReader::with_options(url, options).await.map_err(|e| {
            e.context(format!(
                "failed to open s3://{}/{}",
                location.bucket, location.key
            ))
        })?;
        Ok(Self { location, http })
    }

    pub fn location(&self) -> &S3Location {
        &self.location
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.http.transferred_bytes()
    }
}

#[async_trait]
impl ReadAt for S3RangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.http.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.http.size()
    }

    fn transferred_bytes(&self) -> Option<u64> {
        Some(self.http.transferred_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_nested_key() {
        let loc = S3Location::parse("my-bucket/path/to/archive.zip").unwrap();
        assert_eq!(loc.bucket, "my-bucket");
        assert_eq!(loc.key, "path/to/archive.zip");
    }

    #[test]
    fn rejects_missing_key() {
        assert!(S3Location::parse("bucket").is_err());
        assert!(S3Location::parse("bucket/").is_err());
        assert!(S3Location::parse("/key").is_err());
    }

    #[test]
    fn builds_urls() {
        let loc = S3Location::parse("b/k.zip").unwrap();
        assert_eq!(
            loc.url(None, Some("eu-west-1")),
            "https://b.s3.eu-west-1.amazonaws.com/k.zip"
        );
        assert_eq!(loc.url(None, None), "https://b.s3.us-east-1.amazonaws.com/k.zip");
        assert_eq!(
            loc.url(Some("http://localhost:9000/"), None),
            "http://localhost:9000/b/k.zip"
        );
    }
}
