//! Domain CRUD endpoints as seen by the coordinator.

use async_trait::async_trait;
use gated_executor::{ApiRequest, ApiResponse, Transport, TransportError};
use local_store::{EntityKind, Fields};
use serde_json::Value;
use std::sync::Arc;

/// An entity as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub server_id: i64,
    pub fields: Fields,
}

impl RemoteEntity {
    pub fn new(server_id: i64, fields: Fields) -> Self {
        Self { server_id, fields }
    }

    /// Decode `{"id": 42, ...fields}`.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        let Value::Object(mut fields) = value else {
            return Err(TransportError::Decode("entity is not an object".to_string()));
        };
        let server_id = fields
            .remove("id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| TransportError::Decode("entity has no numeric id".to_string()))?;
        Ok(Self { server_id, fields })
    }
}

/// Create, update, delete and list entities on the server.
///
/// Every call carries the token the executor acquired for the attempt.
#[async_trait]
pub trait EntityRemote: Send + Sync {
    async fn create(
        &self,
        token: &str,
        kind: EntityKind,
        fields: &Fields,
    ) -> Result<RemoteEntity, TransportError>;

    async fn update(
        &self,
        token: &str,
        kind: EntityKind,
        server_id: i64,
        fields: &Fields,
    ) -> Result<(), TransportError>;

    async fn delete(&self, token: &str, kind: EntityKind, server_id: i64)
        -> Result<(), TransportError>;

    async fn fetch(&self, token: &str, kind: EntityKind) -> Result<Vec<RemoteEntity>, TransportError>;
}

/// [`EntityRemote`] over a JSON [`Transport`].
///
/// Collections live at `v1/<collection>` and items at
/// `v1/<collection>/<id>`.
#[derive(Clone)]
pub struct HttpEntityRemote {
    transport: Arc<dyn Transport>,
}

impl HttpEntityRemote {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn collection(kind: EntityKind) -> String {
        format!("v1/{}", kind.collection())
    }

    fn item(kind: EntityKind, server_id: i64) -> String {
        format!("v1/{}/{}", kind.collection(), server_id)
    }
}

#[async_trait]
impl EntityRemote for HttpEntityRemote {
    async fn create(
        &self,
        token: &str,
        kind: EntityKind,
        fields: &Fields,
    ) -> Result<RemoteEntity, TransportError> {
        let request = ApiRequest::post(Self::collection(kind), Value::Object(fields.clone()));
        let response = self.transport.send(token, request).await?;
        RemoteEntity::from_value(response.body)
    }

    async fn update(
        &self,
        token: &str,
        kind: EntityKind,
        server_id: i64,
        fields: &Fields,
    ) -> Result<(), TransportError> {
        let request = ApiRequest::put(Self::item(kind, server_id), Value::Object(fields.clone()));
        self.transport.send(token, request).await?;
        Ok(())
    }

    async fn delete(
        &self,
        token: &str,
        kind: EntityKind,
        server_id: i64,
    ) -> Result<(), TransportError> {
        let request = ApiRequest::delete(Self::item(kind, server_id));
        self.transport.send(token, request).await?;
        Ok(())
    }

    async fn fetch(&self, token: &str, kind: EntityKind) -> Result<Vec<RemoteEntity>, TransportError> {
        let request = ApiRequest::get(Self::collection(kind));
        let response = self.transport.send(token, request).await?;
        decode_batch(response)
    }
}

/// Accept either a bare array or `{"items": [...]}`.
fn decode_batch(response: ApiResponse) -> Result<Vec<RemoteEntity>, TransportError> {
    let items = match response.body {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(TransportError::Decode("batch has no items array".to_string())),
        },
        Value::Null => Vec::new(),
        _ => return Err(TransportError::Decode("batch is not an array".to_string())),
    };
    items.into_iter().map(RemoteEntity::from_value).collect()
}
