//! Tool registry for the voice agent.
//!
//! Declares the capabilities the remote agent may invoke and dispatches
//! incoming tool calls to the matching scheduling-backend operation. Every
//! declared capability has exactly one handler, and every dispatched call
//! resolves to exactly one [`ToolResult`] correlated by call id. Handler
//! failures become failure text in the result; they never escape the
//! dispatcher and never terminate the session.

use crate::{
    notify::{ChangeKind, ChangeNotification, ChangeNotifier},
    schedule::{EventDraft, SchedulerApi, TaskDraft, TaskPatch, TaskStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

// --- Declarations ---

/// Schema of one accepted argument.
#[derive(Serialize, Debug, Clone)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<&'static str>>,
}

impl Property {
    fn string() -> Self {
        Self {
            kind: "STRING",
            description: None,
            values: None,
        }
    }

    fn described(description: &'static str) -> Self {
        Self {
            description: Some(description),
            ..Self::string()
        }
    }

    fn one_of(values: Vec<&'static str>) -> Self {
        Self {
            values: Some(values),
            ..Self::string()
        }
    }
}

/// Object schema of a capability's arguments.
#[derive(Serialize, Debug, Clone)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: BTreeMap<&'static str, Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<&'static str>,
}

impl Schema {
    fn object(properties: Vec<(&'static str, Property)>, required: Vec<&'static str>) -> Self {
        Self {
            kind: "OBJECT",
            properties: properties.into_iter().collect(),
            required,
        }
    }
}

/// One capability as advertised to the remote agent in the setup message.
#[derive(Serialize, Debug, Clone)]
pub struct FunctionDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Schema,
}

/// The full, static set of capability declarations. Every name returned
/// here has a matching arm in [`ToolRegistry::execute`].
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "add_event",
            description: "Add a new calendar event.",
            parameters: Schema::object(
                vec![
                    ("title", Property::string()),
                    ("start", Property::described("ISO 8601 date string")),
                    ("end", Property::described("ISO 8601 date string")),
                    ("description", Property::string()),
                    ("location", Property::string()),
                ],
                vec!["title", "start"],
            ),
        },
        FunctionDeclaration {
            name: "add_task",
            description: "Add a new todo task.",
            parameters: Schema::object(
                vec![("title", Property::string()), ("notes", Property::string())],
                vec!["title"],
            ),
        },
        FunctionDeclaration {
            name: "get_events",
            description:
                "Get all upcoming calendar events to answer questions about the user's schedule.",
            parameters: Schema::object(vec![], vec![]),
        },
        FunctionDeclaration {
            name: "get_tasks",
            description: "Get the list of all todo tasks.",
            parameters: Schema::object(vec![], vec![]),
        },
        FunctionDeclaration {
            name: "update_task",
            description: "Update an existing task status, title, or notes.",
            parameters: Schema::object(
                vec![
                    ("taskId", Property::string()),
                    ("taskListId", Property::string()),
                    ("accountId", Property::string()),
                    ("status", Property::one_of(vec!["needsAction", "completed"])),
                    ("title", Property::string()),
                    ("notes", Property::string()),
                ],
                vec!["taskId"],
            ),
        },
        FunctionDeclaration {
            name: "delete_task",
            description: "Delete a task by ID.",
            parameters: Schema::object(
                vec![
                    ("taskId", Property::string()),
                    ("taskListId", Property::string()),
                    ("accountId", Property::string()),
                ],
                vec!["taskId"],
            ),
        },
        FunctionDeclaration {
            name: "delete_event",
            description: "Delete a calendar event by ID.",
            parameters: Schema::object(
                vec![
                    ("eventId", Property::string()),
                    ("accountId", Property::string()),
                ],
                vec!["eventId"],
            ),
        },
    ]
}

// --- Calls and results ---

/// A tool invocation received from the remote agent.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,
}

/// The single response to a [`ToolCall`], correlated by call id.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub response: ToolResponse,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub result: Value,
}

// --- Dispatch ---

/// Maps capability names to scheduling-backend actions.
pub struct ToolRegistry {
    scheduler: Arc<dyn SchedulerApi>,
    notifier: ChangeNotifier,
}

impl ToolRegistry {
    pub fn new(scheduler: Arc<dyn SchedulerApi>, notifier: ChangeNotifier) -> Self {
        Self { scheduler, notifier }
    }

    /// Runs the handler for `call` to completion and returns its result.
    /// This is infallible by contract: any handler failure is folded into
    /// failure text so the result always reaches the remote agent.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        info!(capability = %call.name, call_id = %call.id, "Dispatching tool call");
        let result = match self.execute(&call).await {
            Ok(value) => value,
            Err(message) => {
                warn!(capability = %call.name, %message, "Tool call failed");
                Value::String(message)
            }
        };
        ToolResult {
            id: call.id,
            name: call.name,
            response: ToolResponse { result },
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value, String> {
        match call.name.as_str() {
            "add_event" => self.add_event(&call.args).await,
            "add_task" => self.add_task(&call.args).await,
            "get_events" => self.get_events().await,
            "get_tasks" => self.get_tasks().await,
            "update_task" => self.update_task(&call.args).await,
            "delete_task" => self.delete_task(&call.args).await,
            "delete_event" => self.delete_event(&call.args).await,
            other => Err(format!("Unknown capability: {other}")),
        }
    }

    fn notify(&self, kind: ChangeKind, id: Option<String>) {
        self.notifier.publish(ChangeNotification { kind, id });
    }

    async fn add_event(&self, args: &serde_json::Map<String, Value>) -> Result<Value, String> {
        let title = require_str(args, "title")?;
        let start = require_str(args, "start")?;
        // A missing end means a point-in-time event: end defaults to start.
        let end = opt_str(args, "end").unwrap_or_else(|| start.clone());
        let draft = EventDraft {
            summary: title,
            start,
            end,
            description: opt_str(args, "description"),
            location: opt_str(args, "location"),
            account_id: opt_str(args, "accountId"),
        };
        match self.scheduler.create_event(draft).await {
            Ok(created) => {
                self.notify(ChangeKind::Calendar, created.id);
                Ok(Value::String("Event added successfully".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Event creation failed");
                Err("Failed to add event".to_string())
            }
        }
    }

    async fn add_task(&self, args: &serde_json::Map<String, Value>) -> Result<Value, String> {
        let draft = TaskDraft {
            title: require_str(args, "title")?,
            notes: opt_str(args, "notes"),
        };
        match self.scheduler.create_task(draft).await {
            Ok(created) => {
                self.notify(ChangeKind::Task, created.id);
                Ok(Value::String("Task added successfully".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Task creation failed");
                Err("Failed to add task".to_string())
            }
        }
    }

    async fn get_events(&self) -> Result<Value, String> {
        match self.scheduler.list_events().await {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!(error = %e, "Event listing failed");
                Err("Failed to fetch events".to_string())
            }
        }
    }

    async fn get_tasks(&self) -> Result<Value, String> {
        match self.scheduler.list_tasks().await {
            Ok(tasks) => Ok(tasks),
            Err(e) => {
                warn!(error = %e, "Task listing failed");
                Err("Failed to fetch tasks".to_string())
            }
        }
    }

    async fn update_task(&self, args: &serde_json::Map<String, Value>) -> Result<Value, String> {
        let task_id = require_str(args, "taskId")?;
        let status = match opt_str(args, "status") {
            Some(s) => Some(parse_status(&s)?),
            None => None,
        };
        let patch = TaskPatch {
            task_id: task_id.clone(),
            task_list_id: opt_str(args, "taskListId"),
            account_id: opt_str(args, "accountId"),
            status,
            title: opt_str(args, "title"),
            notes: opt_str(args, "notes"),
        };
        match self.scheduler.update_task(patch).await {
            Ok(()) => {
                self.notify(ChangeKind::Task, Some(task_id));
                Ok(Value::String("Task updated successfully".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Task update failed");
                Err("Failed to update task".to_string())
            }
        }
    }

    async fn delete_task(&self, args: &serde_json::Map<String, Value>) -> Result<Value, String> {
        let task_id = require_str(args, "taskId")?;
        let outcome = self
            .scheduler
            .delete_task(
                task_id,
                opt_str(args, "taskListId"),
                opt_str(args, "accountId"),
            )
            .await;
        match outcome {
            Ok(()) => {
                self.notify(ChangeKind::Task, None);
                Ok(Value::String("Task deleted successfully".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Task deletion failed");
                Err("Failed to delete task".to_string())
            }
        }
    }

    async fn delete_event(&self, args: &serde_json::Map<String, Value>) -> Result<Value, String> {
        let event_id = require_str(args, "eventId")?;
        let outcome = self
            .scheduler
            .delete_event(event_id, opt_str(args, "accountId"))
            .await;
        match outcome {
            Ok(()) => {
                self.notify(ChangeKind::Calendar, None);
                Ok(Value::String("Event deleted successfully".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Event deletion failed");
                Err("Failed to delete event".to_string())
            }
        }
    }
}

fn require_str(args: &serde_json::Map<String, Value>, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("Missing required argument `{key}`"))
}

fn opt_str(args: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    match raw {
        "needsAction" => Ok(TaskStatus::NeedsAction),
        "completed" => Ok(TaskStatus::Completed),
        other => Err(format!("Invalid status `{other}`")),
    }
}
