//! URI-keyed object storage abstraction.
//!
//! One small interface over the places a query or result object can live:
//! the local filesystem, S3, Google Cloud Storage, and read-only HTTPS.
//! Provider adapters sit behind the [`ObjectStore`] trait; the
//! [`ObjectStoreRouter`] picks the adapter from the URI scheme and creates
//! SDK clients lazily so that purely local operations never touch a
//! credential chain.

use crate::constants::{ELB_GCS_PREFIX, ELB_HTTPS_PREFIX, ELB_HTTP_PREFIX, ELB_S3_PREFIX};
use crate::error::Error;
use async_trait::async_trait;
use futures_util::StreamExt;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::debug;

/// Storage backend addressed by a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Local,
    S3,
    Gcs,
    Https,
}

/// Classify a URI by its scheme prefix; anything without a recognized
/// prefix is a local path.
#[must_use]
pub fn scheme_of(uri: &str) -> Scheme {
    if uri.starts_with(ELB_S3_PREFIX) {
        Scheme::S3
    } else if uri.starts_with(ELB_GCS_PREFIX) {
        Scheme::Gcs
    } else if uri.starts_with(ELB_HTTP_PREFIX) || uri.starts_with(ELB_HTTPS_PREFIX) {
        Scheme::Https
    } else {
        Scheme::Local
    }
}

/// Split `s3://bucket/key` or `gs://bucket/key` into (bucket, key).
pub fn split_bucket_key(uri: &str) -> Result<(&str, &str), Error> {
    let rest = uri
        .strip_prefix(ELB_S3_PREFIX)
        .or_else(|| uri.strip_prefix(ELB_GCS_PREFIX))
        .ok_or_else(|| Error::input(format!("'{uri}' is not an object-store URI")))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::input(format!("'{uri}' is missing an object key")))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::input(format!("'{uri}' is not a valid object URI")));
    }
    Ok((bucket, key))
}

/// Minimal object-store operations needed by the orchestrator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object at `uri` to the local file `dest`.
    async fn download(&self, uri: &str, dest: &Path) -> Result<(), Error>;

    /// Upload the local file `src` to `uri`.
    async fn upload(&self, src: &Path, uri: &str) -> Result<(), Error>;

    /// Write a small object in one shot.
    async fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), Error>;

    /// Read a small object in one shot.
    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error>;

    /// Existence check without reading the object body.
    async fn exists(&self, uri: &str) -> Result<bool, Error>;

    /// Remove the object; missing objects are not an error.
    async fn delete(&self, uri: &str) -> Result<(), Error>;
}

/// Local filesystem adapter; URIs are plain paths.
pub struct LocalStore;

#[async_trait]
impl ObjectStore for LocalStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<(), Error> {
        tokio::fs::copy(uri, dest).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(uri)
            } else {
                Error::Io(e)
            }
        })?;
        Ok(())
    }

    async fn upload(&self, src: &Path, uri: &str) -> Result<(), Error> {
        if let Some(parent) = PathBuf::from(uri).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, uri).await?;
        Ok(())
    }

    async fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), Error> {
        if let Some(parent) = PathBuf::from(uri).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(uri, bytes).await?;
        Ok(())
    }

    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error> {
        tokio::fs::read(uri).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(uri)
            } else {
                Error::Io(e)
            }
        })
    }

    async fn exists(&self, uri: &str) -> Result<bool, Error> {
        Ok(tokio::fs::try_exists(uri).await.unwrap_or(false))
    }

    async fn delete(&self, uri: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(uri).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// S3 adapter over the AWS SDK.
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

fn classify_s3_error<E, R>(uri: &str, err: &aws_sdk_s3::error::SdkError<E, R>) -> Error
where
    E: std::error::Error + aws_sdk_s3::error::ProvideErrorMetadata,
{
    use aws_sdk_s3::error::SdkError;
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            Error::transient(format!("S3 request for {uri} failed to complete"))
        }
        SdkError::ServiceError(_) => {
            let code = aws_sdk_s3::error::ProvideErrorMetadata::code(err).unwrap_or_default();
            match code {
                "NoSuchKey" | "NoSuchBucket" | "NotFound" => Error::not_found(uri),
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
                    Error::permission(format!("not authorized to access {uri}"))
                }
                "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" => {
                    Error::transient(format!("S3 reported '{code}' for {uri}"))
                }
                other => Error::cluster(format!("S3 error '{other}' for {uri}")),
            }
        }
        other => Error::cluster(format!("S3 request for {uri} failed: {other}")),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download(&self, uri: &str, dest: &Path) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        let mut object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_s3_error(uri, &e))?;
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| Error::transient(format!("reading {uri}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, uri: &str) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        let body = aws_sdk_s3::primitives::ByteStream::from_path(src)
            .await
            .map_err(|e| Error::input(format!("cannot read {}: {e}", src.display())))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_s3_error(uri, &e))?;
        Ok(())
    }

    async fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| classify_s3_error(uri, &e))?;
        Ok(())
    }

    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_s3_error(uri, &e))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| Error::transient(format!("reading {uri}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn exists(&self, uri: &str) -> Result<bool, Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(ref e)
                if e.as_service_error()
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found) =>
            {
                Ok(false)
            }
            Err(e) => Err(classify_s3_error(uri, &e)),
        }
    }

    async fn delete(&self, uri: &str) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_s3_error(uri, &e))?;
        Ok(())
    }
}

/// Google Cloud Storage adapter.
pub struct GcsStore {
    client: google_cloud_storage::client::Client,
}

impl GcsStore {
    #[must_use]
    pub fn new(client: google_cloud_storage::client::Client) -> Self {
        Self { client }
    }
}

fn classify_gcs_error(uri: &str, err: &google_cloud_storage::http::Error) -> Error {
    use google_cloud_storage::http::Error as GcsError;
    match err {
        GcsError::Response(r) => match r.code {
            404 => Error::not_found(uri),
            401 | 403 => Error::permission(format!("not authorized to access {uri}")),
            429 | 500..=599 => Error::transient(format!("GCS reported {} for {uri}", r.code)),
            code => Error::cluster(format!("GCS error {code} for {uri}: {}", r.message)),
        },
        other => Error::transient(format!("GCS request for {uri} failed: {other}")),
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        let mut stream = self
            .client
            .download_streamed_object(
                &GetObjectRequest {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| classify_gcs_error(uri, &e))?;
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transient(format!("reading {uri}: {e}")))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, uri: &str) -> Result<(), Error> {
        let data = tokio::fs::read(src).await?;
        self.put_bytes(uri, &data).await
    }

    async fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        let upload_type = UploadType::Simple(Media::new(key.to_string()));
        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: bucket.to_string(),
                    ..Default::default()
                },
                bytes.to_vec(),
                &upload_type,
            )
            .await
            .map_err(|e| classify_gcs_error(uri, &e))?;
        Ok(())
    }

    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        self.client
            .download_object(
                &GetObjectRequest {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| classify_gcs_error(uri, &e))
    }

    async fn exists(&self, uri: &str) -> Result<bool, Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        match self
            .client
            .get_object(&GetObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(google_cloud_storage::http::Error::Response(r)) if r.code == 404 => Ok(false),
            Err(e) => Err(classify_gcs_error(uri, &e)),
        }
    }

    async fn delete(&self, uri: &str) -> Result<(), Error> {
        let (bucket, key) = split_bucket_key(uri)?;
        match self
            .client
            .delete_object(&DeleteObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(()) => Ok(()),
            Err(google_cloud_storage::http::Error::Response(r)) if r.code == 404 => Ok(()),
            Err(e) => Err(classify_gcs_error(uri, &e)),
        }
    }
}

/// Read-only adapter for `http://` and `https://` query inputs.
pub struct HttpsStore {
    client: reqwest::Client,
}

impl HttpsStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for HttpsStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<(), Error> {
        let mut response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| Error::transient(format!("fetching {uri}: {e}")))?;
        match response.status().as_u16() {
            200..=299 => {}
            404 => return Err(Error::not_found(uri)),
            401 | 403 => return Err(Error::permission(format!("not authorized to fetch {uri}"))),
            code => return Err(Error::transient(format!("HTTP {code} fetching {uri}"))),
        }
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::transient(format!("reading {uri}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, _src: &Path, uri: &str) -> Result<(), Error> {
        Err(Error::input(format!("cannot write to HTTP URI {uri}")))
    }

    async fn put_bytes(&self, uri: &str, _bytes: &[u8]) -> Result<(), Error> {
        Err(Error::input(format!("cannot write to HTTP URI {uri}")))
    }

    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| Error::transient(format!("fetching {uri}: {e}")))?;
        if response.status().as_u16() == 404 {
            return Err(Error::not_found(uri));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transient(format!("reading {uri}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, uri: &str) -> Result<bool, Error> {
        let response = self
            .client
            .head(uri)
            .send()
            .await
            .map_err(|e| Error::transient(format!("fetching {uri}: {e}")))?;
        Ok(response.status().is_success())
    }

    async fn delete(&self, uri: &str) -> Result<(), Error> {
        Err(Error::input(format!("cannot delete HTTP URI {uri}")))
    }
}

/// Routes operations to the adapter matching the URI scheme. SDK clients
/// are created on first use and reused afterwards.
#[derive(Default)]
pub struct ObjectStoreRouter {
    local: LocalStore,
    https: OnceCell<HttpsStore>,
    s3: OnceCell<S3Store>,
    gcs: OnceCell<GcsStore>,
}

impl LocalStore {
    const fn new() -> Self {
        Self
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStoreRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the adapter for `uri`, initializing SDK clients on demand.
    pub async fn store_for(&self, uri: &str) -> Result<&dyn ObjectStore, Error> {
        match scheme_of(uri) {
            Scheme::Local => Ok(&self.local),
            Scheme::Https => Ok(self.https.get_or_init(|| async { HttpsStore::new() }).await),
            Scheme::S3 => {
                let store = self
                    .s3
                    .get_or_init(|| async {
                        debug!("initializing S3 client");
                        let config =
                            aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                        S3Store::new(aws_sdk_s3::Client::new(&config))
                    })
                    .await;
                Ok(store)
            }
            Scheme::Gcs => {
                let store = self
                    .gcs
                    .get_or_try_init(|| async {
                        debug!("initializing GCS client");
                        let config = google_cloud_storage::client::ClientConfig::default()
                            .with_auth()
                            .await
                            .map_err(|e| {
                                Error::permission(format!("GCS authentication failed: {e}"))
                            })?;
                        Ok::<_, Error>(GcsStore::new(google_cloud_storage::client::Client::new(
                            config,
                        )))
                    })
                    .await?;
                Ok(store)
            }
        }
    }
}
