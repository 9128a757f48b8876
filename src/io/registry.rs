//! Scheme based selection of a [`ReadAt`] backend for a location URI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::debug;

use super::{HttpOptions, HttpRangeReader, LocalFileReader, ReadAt, S3Location, S3RangeReader};
use crate::error::Error;

/// Opens a source for locations carrying one particular scheme.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// `location` is the full URI, scheme included.
    async fn open(&self, location: &str) -> Result<Arc<dyn ReadAt>>;
}

/// Explicit table of scheme prefixes and the factories serving them.
///
/// Built once at startup; lookups take the first scheme that prefixes the
/// location.
#[derive(Default)]
pub struct SourceRegistry {
    factories: Vec<(String, Box<dyn SourceFactory>)>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving `file://`, `http://`, `https://` and `s3://`.
    pub fn with_defaults(
        http: HttpOptions,
        s3_endpoint: Option<String>,
        s3_region: Option<String>,
    ) -> Self {
        let mut registry = Self::new();
        let entries: [(&str, Box<dyn SourceFactory>); 4] = [
            ("file://", Box::new(LocalFactory)),
            ("http://", Box::new(HttpFactory { options: http })),
            ("https://", Box::new(HttpFactory { options: http })),
            (
                "s3://",
                Box::new(S3Factory {
                    endpoint: s3_endpoint,
                    region: s3_region,
                    options: http,
                }),
            ),
        ];
        for (scheme, factory) in entries {
            registry.factories.push((scheme.to_string(), factory));
        }
        registry
    }

    /// Add a factory for `scheme` (e.g. `"gs://"`).
    pub fn register(&mut self, scheme: &str, factory: Box<dyn SourceFactory>) -> Result<()> {
        if scheme.is_empty() {
            bail!("scheme must not be empty");
        }
        if self.factories.iter().any(|(s, _)| s == scheme) {
            bail!("a source is already registered for scheme {scheme}");
        }
        self.factories.push((scheme.to_string(), factory));
        Ok(())
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(s, _)| s.as_str())
    }

    /// Open the backend whose scheme prefixes `location`.
    pub async fn resolve(&self, location: &str) -> crate::Result<Arc<dyn ReadAt>> {
        let Some((scheme, factory)) = self
            .factories
            .iter()
            .find(|(scheme, _)| location.starts_with(scheme.as_str()))
        else {
            return Err(Error::NotFound(format!(
                "no source registered for location {location}"
            )));
        };
        debug!("opening {} with the {} backend", location, scheme);
        factory.open(location).await.map_err(Error::Source)
    }
}

struct LocalFactory;

#[async_trait]
impl SourceFactory for LocalFactory {
    async fn open(&self, location: &str) -> Result<Arc<dyn ReadAt>> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        Ok(Arc::new(LocalFileReader::new(Path::new(path))?))
    }
}

struct HttpFactory {
    options: HttpOptions,
}

#[async_trait]
impl SourceFactory for HttpFactory {
    async fn open(&self, location: &str) -> Result<Arc<dyn ReadAt>> {
        let reader = HttpRangeReader::with_options(location.to_string(), self.options).await?;
        Ok(Arc::new(reader))
    }
}

struct S3Factory {
    endpoint: Option<String>,
    region: Option<String>,
    options: HttpOptions,
}

#[async_trait]
impl SourceFactory for S3Factory {
    async fn open(&self, location: &str) -> Result<Arc<dyn ReadAt>> {
        let rest = location.strip_prefix("s3://").unwrap_or(location);
        let reader = S3RangeReader::new(
            S3Location::parse(rest)?,
            self.endpoint.as_deref(),
            self.region.as_deref(),
            self.options,
        )
        .await?;
        Ok(Arc::new(reader))
    }
}
