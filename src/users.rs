//! User administration surface (back-office only).

use serde_json::Value;
use std::sync::Arc;

use crate::api::{build_query, ApiClient, ApiError};

pub struct UserAdmin {
    api: Arc<ApiClient>,
}

impl UserAdmin {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// `GET /Users` with optional query options (search, role, pagination).
    pub async fn list_users(&self, options: Option<&Value>) -> Result<Value, ApiError> {
        self.api.get(&build_query("/Users", options)).await
    }

    /// `GET /Users/:id`.
    pub async fn get_user(&self, id: &str) -> Result<Value, ApiError> {
        self.api.get(&format!("/Users/{id}")).await
    }

    /// `POST /Users`.
    pub async fn create_user(&self, payload: Value) -> Result<Value, ApiError> {
        self.api.post("/Users", payload).await
    }

    /// `PUT /Users/:id`.
    pub async fn update_user(&self, id: &str, payload: Value) -> Result<Value, ApiError> {
        self.api.put(&format!("/Users/{id}"), payload).await
    }

    /// `DELETE /Users/:id`.
    pub async fn delete_user(&self, id: &str) -> Result<Value, ApiError> {
        self.api.delete(&format!("/Users/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;
    use crate::auth::AuthSession;
    use crate::storage::MemoryStorage;
    use crate::testutil::{http_response, serve_responses};
    use std::time::Duration;

    #[tokio::test]
    async fn test_user_crud_paths() {
        let base = serve_responses(vec![
            http_response("200 OK", "{\"users\":[{\"id\":\"u1\"}]}"),
            http_response("201 Created", "{\"id\":\"u2\"}"),
            http_response("204 No Content", ""),
        ])
        .await;

        let storage = Arc::new(MemoryStorage::new());
        let auth = Arc::new(AuthSession::new(storage));
        let admin = UserAdmin::new(Arc::new(
            ApiClient::new(
                &base,
                auth,
                ApiConfig {
                    timeout: Duration::from_secs(2),
                    max_retries: 0,
                    retry_delay: Duration::from_millis(10),
                },
            )
            .unwrap(),
        ));

        let listed = admin
            .list_users(Some(&serde_json::json!({ "role": "staff" })))
            .await
            .unwrap();
        assert_eq!(listed["users"][0]["id"], "u1");

        let created = admin
            .create_user(serde_json::json!({ "name": "Nikos" }))
            .await
            .unwrap();
        assert_eq!(created["id"], "u2");

        // 204 responses come back as null
        let deleted = admin.delete_user("u2").await.unwrap();
        assert!(deleted.is_null());
    }
}
