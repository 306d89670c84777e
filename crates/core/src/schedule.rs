//! Client for the external scheduling backend.
//!
//! The backend is a thin REST layer over the user's linked calendar and
//! task accounts. Hearth only consumes it: create/list/delete for calendar
//! events and create/list/update/delete for tasks. Create operations are
//! not idempotent on the backend side (a repeated create makes a duplicate),
//! so nothing in this module retries a failed request.

use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// A failure talking to the scheduling backend.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("scheduling backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scheduling backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Fields for a new calendar event.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub summary: String,
    /// ISO 8601 date string.
    pub start: String,
    /// ISO 8601 date string.
    pub end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// Fields for a new task.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "needsAction")]
    NeedsAction,
    #[serde(rename = "completed")]
    Completed,
}

/// A partial update for an existing task. Fields left as `None` are omitted
/// from the outbound request so the backend preserves their current values.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The interesting part of a created record returned by the backend.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CreatedRecord {
    pub id: Option<String>,
}

/// The operations the voice agent's tools perform against the backend.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait SchedulerApi: Send + Sync {
    async fn create_event(&self, draft: EventDraft) -> Result<CreatedRecord, ScheduleError>;
    async fn list_events(&self) -> Result<serde_json::Value, ScheduleError>;
    async fn delete_event(
        &self,
        event_id: String,
        account_id: Option<String>,
    ) -> Result<(), ScheduleError>;
    async fn create_task(&self, draft: TaskDraft) -> Result<CreatedRecord, ScheduleError>;
    async fn list_tasks(&self) -> Result<serde_json::Value, ScheduleError>;
    async fn update_task(&self, patch: TaskPatch) -> Result<(), ScheduleError>;
    async fn delete_task(
        &self,
        task_id: String,
        task_list_id: Option<String>,
        account_id: Option<String>,
    ) -> Result<(), ScheduleError>;
}

/// `reqwest`-backed implementation hitting the hub's REST routes.
pub struct HttpScheduler {
    http: reqwest::Client,
    base_url: String,
}

impl HttpScheduler {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ScheduleError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ScheduleError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait::async_trait]
impl SchedulerApi for HttpScheduler {
    async fn create_event(&self, draft: EventDraft) -> Result<CreatedRecord, ScheduleError> {
        let response = self
            .http
            .post(self.url("/api/calendar/create"))
            .json(&draft)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_events(&self) -> Result<serde_json::Value, ScheduleError> {
        let response = self.http.get(self.url("/api/calendar/events")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_event(
        &self,
        event_id: String,
        account_id: Option<String>,
    ) -> Result<(), ScheduleError> {
        let mut query = vec![("eventId", event_id)];
        if let Some(account_id) = account_id {
            query.push(("accountId", account_id));
        }
        let response = self
            .http
            .delete(self.url("/api/calendar/delete"))
            .query(&query)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_task(&self, draft: TaskDraft) -> Result<CreatedRecord, ScheduleError> {
        let response = self
            .http
            .post(self.url("/api/tasks/create"))
            .json(&draft)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_tasks(&self) -> Result<serde_json::Value, ScheduleError> {
        let response = self.http.get(self.url("/api/tasks/list")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_task(&self, patch: TaskPatch) -> Result<(), ScheduleError> {
        let response = self
            .http
            .patch(self.url("/api/tasks/update"))
            .json(&patch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_task(
        &self,
        task_id: String,
        task_list_id: Option<String>,
        account_id: Option<String>,
    ) -> Result<(), ScheduleError> {
        let mut query = vec![("taskId", task_id)];
        if let Some(task_list_id) = task_list_id {
            query.push(("taskListId", task_list_id));
        }
        if let Some(account_id) = account_id {
            query.push(("accountId", account_id));
        }
        let response = self
            .http
            .delete(self.url("/api/tasks/delete"))
            .query(&query)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
