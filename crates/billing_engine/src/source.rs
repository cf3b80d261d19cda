use async_trait::async_trait;
use billing_core::ListPage;
use serde::de::DeserializeOwned;

use crate::{ApiError, ApiGateway, TaskStatus};

/// Paginated list endpoint, as seen by a table binder.
#[async_trait]
pub trait ListSource<T>: Send + Sync {
    async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ListPage<T>, ApiError>;
}

/// Status endpoint for asynchronous server jobs.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError>;
}

#[async_trait]
impl<T> ListSource<T> for ApiGateway
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ListPage<T>, ApiError> {
        self.get_json(endpoint, params).await
    }
}

#[async_trait]
impl TaskStatusSource for ApiGateway {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError> {
        let segment = urlencoding::encode(task_id);
        let path = self.settings().task_status_path.replace("{id}", &segment);
        self.get_json(&path, &[]).await
    }
}
