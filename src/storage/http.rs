use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use tokio_util::io::ReaderStream;
use url::Url;

use super::{ObjectBody, ObjectStore, check_key, join_key};
use crate::error::StorageError;

/// Uploads objects to a remote store with streaming `PUT` requests
///
/// `endpoint` joined with the key is the upload target; `public_base_url`
/// joined with the key is where the object becomes readable. The store is
/// expected to make an object visible only once its upload completes.
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    public_base_url: Url,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: Url,
        public_base_url: Url,
        token: Option<String>,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(concat!("zipgather/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            public_base_url,
            token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, key: &str, body: ObjectBody) -> Result<Url, StorageError> {
        check_key(key)?;
        let target = join_key(&self.endpoint, key)?;
        let public_url = join_key(&self.public_base_url, key)?;

        let request = self
            .client
            .put(target)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(Body::wrap_stream(ReaderStream::new(body)));
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                status: status.as_u16(),
            });
        }
        Ok(public_url)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        let target = join_key(&self.endpoint, key)?;
        let response = self.authorize(self.client.delete(target)).send().await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StorageError::Status {
                status: status.as_u16(),
            })
        }
    }
}
