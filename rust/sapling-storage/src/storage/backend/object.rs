use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;

use crate::{SaplingStorageError, StorageBackend};

/// Errors produced while talking to a remote object store
#[derive(Error, Debug)]
pub enum ObjectStorageError {
    /// The endpoint could not be reached
    #[error("Failed to connect to object store: {0}")]
    ConnectionFailed(String),

    /// The object store answered with an unexpected status
    #[error("Object store request failed: {0}")]
    RequestFailed(String),
}

impl From<ObjectStorageError> for SaplingStorageError {
    fn from(error: ObjectStorageError) -> Self {
        SaplingStorageError::StorageBackend(error.to_string())
    }
}

impl From<reqwest::Error> for ObjectStorageError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            ObjectStorageError::ConnectionFailed(error.to_string())
        } else {
            ObjectStorageError::RequestFailed(error.to_string())
        }
    }
}

/// Where and how to reach an S3-style object store
#[derive(Clone, Debug)]
pub struct ObjectStorageConfig {
    /// Base URL of the service
    pub endpoint: String,
    /// Bucket (or container) holding the objects
    pub bucket: Option<String>,
    /// Path prefix prepended to every object name
    pub key_prefix: Option<String>,
    /// Optional bearer token sent with each request
    pub bearer_token: Option<String>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: None,
            key_prefix: None,
            bearer_token: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// A [StorageBackend] over plain HTTP `PUT`/`GET` against an object store.
/// Object names are the URL-safe base64 form of the key; a `404` reads as
/// an absent value.
#[derive(Clone)]
pub struct ObjectStorageBackend<Key, Value> {
    config: ObjectStorageConfig,
    client: reqwest::Client,
    key_type: PhantomData<Key>,
    value_type: PhantomData<Value>,
}

impl<Key, Value> ObjectStorageBackend<Key, Value>
where
    Key: AsRef<[u8]>,
{
    /// Build a client for the configured object store
    pub fn new(config: ObjectStorageConfig) -> Result<Self, ObjectStorageError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| ObjectStorageError::ConnectionFailed(error.to_string()))?;

        Ok(Self {
            config,
            client,
            key_type: PhantomData,
            value_type: PhantomData,
        })
    }

    /// The URL an object with the given key lives at
    pub fn object_url(&self, key: &Key) -> String {
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key.as_ref());
        let mut url = self.config.endpoint.trim_end_matches('/').to_string();

        for segment in [&self.config.bucket, &self.config.key_prefix]
            .into_iter()
            .flatten()
        {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }

        url.push('/');
        url.push_str(&name);
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl<Key, Value> StorageBackend for ObjectStorageBackend<Key, Value>
where
    Key: AsRef<[u8]> + Clone + Send + Sync,
    Value: AsRef<[u8]> + From<Vec<u8>> + Clone + Send + Sync,
{
    type Key = Key;
    type Value = Value;
    type Error = ObjectStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let request = self
            .client
            .put(self.object_url(&key))
            .body(value.as_ref().to_vec());
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(ObjectStorageError::RequestFailed(format!(
                "PUT answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        let request = self.client.get(self.object_url(key));
        let response = self.authorize(request).send().await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                Ok(Some(Value::from(bytes.to_vec())))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(ObjectStorageError::RequestFailed(format!(
                "GET answered {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use mockito::{Server, ServerGuard};

    use super::{ObjectStorageBackend, ObjectStorageConfig, ObjectStorageError};
    use crate::StorageBackend;

    async fn make_backend(
        bearer_token: Option<&str>,
    ) -> Result<(ObjectStorageBackend<Vec<u8>, Vec<u8>>, ServerGuard)> {
        let server = Server::new_async().await;
        let backend = ObjectStorageBackend::new(ObjectStorageConfig {
            endpoint: server.url(),
            bucket: Some("sapling".into()),
            bearer_token: bearer_token.map(str::to_string),
            ..Default::default()
        })?;
        Ok((backend, server))
    }

    #[tokio::test]
    async fn it_writes_and_reads_an_object() -> Result<()> {
        let (mut backend, mut server) = make_backend(None).await?;

        let put = server
            .mock("PUT", "/sapling/AQID")
            .with_status(200)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/sapling/AQID")
            .with_status(200)
            .with_body([4u8, 5, 6])
            .create_async()
            .await;

        backend.set(vec![1, 2, 3], vec![4, 5, 6]).await?;
        assert_eq!(backend.get(&vec![1, 2, 3]).await?, Some(vec![4, 5, 6]));

        put.assert_async().await;
        get.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn it_reads_a_missing_object_as_none() -> Result<()> {
        let (backend, mut server) = make_backend(None).await?;
        let get = server
            .mock("GET", "/sapling/CgsM")
            .with_status(404)
            .create_async()
            .await;

        assert_eq!(backend.get(&vec![10, 11, 12]).await?, None);
        get.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn it_reports_unexpected_statuses() -> Result<()> {
        let (mut backend, mut server) = make_backend(None).await?;
        server
            .mock("GET", "/sapling/FBUW")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;
        server
            .mock("PUT", "/sapling/FBUW")
            .with_status(503)
            .create_async()
            .await;

        assert!(matches!(
            backend.get(&vec![20, 21, 22]).await,
            Err(ObjectStorageError::RequestFailed(_))
        ));
        assert!(matches!(
            backend.set(vec![20, 21, 22], vec![1]).await,
            Err(ObjectStorageError::RequestFailed(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn it_sends_the_bearer_token() -> Result<()> {
        let (mut backend, mut server) = make_backend(Some("secret-token")).await?;
        let put = server
            .mock("PUT", "/sapling/AQID")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .create_async()
            .await;

        backend.set(vec![1, 2, 3], vec![4, 5, 6]).await?;
        put.assert_async().await;

        Ok(())
    }

    #[test]
    fn it_places_objects_under_bucket_and_prefix() -> Result<()> {
        let backend = ObjectStorageBackend::<Vec<u8>, Vec<u8>>::new(ObjectStorageConfig {
            endpoint: "https://objects.example.com/".into(),
            bucket: Some("sapling".into()),
            key_prefix: Some("/resource-a/".into()),
            ..Default::default()
        })?;

        assert_eq!(
            backend.object_url(&vec![0xff, 0xfe, 0x00]),
            "https://objects.example.com/sapling/resource-a/__4A"
        );

        Ok(())
    }

    #[test]
    fn it_omits_missing_path_segments() -> Result<()> {
        let backend = ObjectStorageBackend::<Vec<u8>, Vec<u8>>::new(ObjectStorageConfig {
            endpoint: "http://localhost:9000".into(),
            ..Default::default()
        })?;

        assert_eq!(backend.object_url(&vec![1, 2, 3]), "http://localhost:9000/AQID");

        Ok(())
    }
}
