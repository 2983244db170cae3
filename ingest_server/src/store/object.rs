//! Blob storage over `object_store` (S3, local filesystem, in-memory).

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};

use super::BlobStore;

/// Parsed store URL.
///
/// ```text
/// s3://cicd-logs/prod?region=us-east-1
/// file:///var/lib/cicd-ingest/logs
/// memory://
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub scheme: String,
    /// Bucket name; `None` for `file://` and `memory://`.
    pub bucket: Option<String>,
    /// Key prefix inside the bucket, or the directory for `file://`.
    pub prefix: String,
    pub region: Option<String>,
}

impl StoreSpec {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("invalid store url {raw}"))?;
        let scheme = url.scheme().to_string();
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.to_string());
        let prefix = url.path().trim_matches('/').to_string();
        let region = url
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }
}

pub struct ObjectBlobStore {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ObjectBlobStore {
    pub fn from_url(raw: &str) -> anyhow::Result<Self> {
        let spec = StoreSpec::parse(raw)?;
        Self::from_spec(&spec)
    }

    pub fn from_spec(spec: &StoreSpec) -> anyhow::Result<Self> {
        match spec.scheme.as_str() {
            "memory" => Ok(Self {
                inner: Arc::new(object_store::memory::InMemory::new()),
                bucket: spec.bucket.clone().unwrap_or_else(|| "memory".to_string()),
                prefix: spec.prefix.clone(),
            }),
            "file" => {
                let root = match &spec.bucket {
                    Some(host) => format!("/{host}/{}", spec.prefix),
                    None => format!("/{}", spec.prefix),
                };
                std::fs::create_dir_all(&root)
                    .with_context(|| format!("failed to create store directory {root}"))?;
                let local = object_store::local::LocalFileSystem::new_with_prefix(&root)
                    .with_context(|| format!("failed to open local store at {root}"))?;
                Ok(Self {
                    inner: Arc::new(local),
                    bucket: root,
                    prefix: String::new(),
                })
            }
            "s3" => {
                let bucket = spec
                    .bucket
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("s3 store url must name a bucket"))?;
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(&bucket)
                    .with_allow_http(false);
                if let Some(region) = &spec.region {
                    builder = builder.with_region(region);
                }
                let s3 = builder.build().context("failed to create S3 client")?;
                Ok(Self {
                    inner: Arc::new(s3),
                    bucket,
                    prefix: spec.prefix.clone(),
                })
            }
            other => anyhow::bail!("unsupported store scheme: {other}"),
        }
    }

    /// In-memory store for tests.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
            bucket: "memory".to_string(),
            prefix: String::new(),
        }
    }

    fn key(&self, path: &str) -> ObjectPath {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, path))
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> anyhow::Result<()> {
        let key = self.key(path);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        match self
            .inner
            .put_opts(&key, PutPayload::from_bytes(bytes.clone()), opts)
            .await
        {
            Ok(_) => return Ok(()),
            Err(object_store::Error::NotImplemented { .. })
            | Err(object_store::Error::NotSupported { .. }) => {
                tracing::debug!(key = %key, "Backend ignores object attributes, storing without content type");
            }
            Err(e) => return Err(e).with_context(|| format!("failed to put {key}")),
        }

        self.inner
            .put(&key, PutPayload::from_bytes(bytes))
            .await
            .with_context(|| format!("failed to put {key}"))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> anyhow::Result<Bytes> {
        let key = self.key(path);
        let result = self
            .inner
            .get(&key)
            .await
            .with_context(|| format!("failed to get {key}"))?;
        let bytes = result
            .bytes()
            .await
            .with_context(|| format!("failed to read {key}"))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_spec() {
        let spec = StoreSpec::parse("s3://cicd-logs/prod/ingest?region=us-east-1").unwrap();
        assert_eq!(spec.scheme, "s3");
        assert_eq!(spec.bucket.as_deref(), Some("cicd-logs"));
        assert_eq!(spec.prefix, "prod/ingest");
        assert_eq!(spec.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_parse_file_spec() {
        let spec = StoreSpec::parse("file:///tmp/cicd-ingest/logs").unwrap();
        assert_eq!(spec.scheme, "file");
        assert_eq!(spec.bucket, None);
        assert_eq!(spec.prefix, "tmp/cicd-ingest/logs");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(ObjectBlobStore::from_url("ftp://host/path").is_err());
    }

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = ObjectBlobStore::memory();
        store
            .put("a/b.log", Bytes::from_static(b"hello"), "text/plain")
            .await
            .expect("put");
        let bytes = store.get("a/b.log").await.expect("get");
        assert_eq!(&bytes[..], b"hello");
        assert!(store.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("file://{}", dir.path().display());
        let store = ObjectBlobStore::from_url(&url).expect("file store");
        store
            .put("logs/1", Bytes::from_static(b"line"), "text/plain")
            .await
            .expect("put");
        assert!(dir.path().join("logs/1").exists());
        assert_eq!(&store.get("logs/1").await.expect("get")[..], b"line");
    }
}
