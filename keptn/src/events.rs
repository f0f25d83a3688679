//! Keptn flavoured CloudEvents.
//!
//! Keptn uses CloudEvents 1.0 with a handful of extension attributes
//! (`shkeptncontext`, `triggeredid`, `shkeptnspecversion`) and a JSON `data`
//! payload that always carries project, stage and service.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";
pub const KEPTN_SPEC_VERSION: &str = "0.2.0";
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";

const EVENT_TYPE_PREFIX: &str = "sh.keptn.event.";

#[derive(thiserror::Error, Debug)]
pub enum EventError {
    #[error("could not parse event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    Invalid(String),
    #[error("event data is missing the {0} field")]
    MissingField(&'static str),
}

/// Phases of a Keptn task, as encoded in the last segment of the event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPhase {
    Triggered,
    Started,
    Finished,
}

impl TaskPhase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Triggered => "triggered",
            TaskPhase::Started => "started",
            TaskPhase::Finished => "finished",
        }
    }
}

/// Builds e.g. `sh.keptn.event.monaco.triggered`.
pub fn task_event_type(task: &str, phase: TaskPhase) -> String {
    format!("{EVENT_TYPE_PREFIX}{task}.{}", phase.as_str())
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Succeeded,
    Errored,
    Unknown,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Pass,
    Warning,
    Fail,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventData {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub service: String,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<HashMap<String, String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptncontext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggeredid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptnspecversion: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CloudEvent {
    /// Decodes an event delivered over HTTP, in structured mode (the whole
    /// event is the JSON body) or binary mode (attributes in `ce-*` headers).
    pub fn from_http(headers: &http::HeaderMap, body: &[u8]) -> Result<Self, EventError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        let content_type = header(http::header::CONTENT_TYPE.as_str()).unwrap_or_default();

        let event = if !content_type.starts_with(STRUCTURED_CONTENT_TYPE)
            && headers.contains_key("ce-specversion")
        {
            let data = if body.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(body)?
            };

            CloudEvent {
                specversion: header("ce-specversion").unwrap_or_default(),
                id: header("ce-id").unwrap_or_default(),
                source: header("ce-source").unwrap_or_default(),
                r#type: header("ce-type").unwrap_or_default(),
                datacontenttype: Some(content_type).filter(|ct| !ct.is_empty()),
                time: header("ce-time"),
                shkeptncontext: header("ce-shkeptncontext"),
                triggeredid: header("ce-triggeredid"),
                shkeptnspecversion: header("ce-shkeptnspecversion"),
                data,
            }
        } else {
            return Self::from_json(body);
        };

        event.validate()?;
        Ok(event)
    }

    /// Decodes a structured-mode event, e.g. one stored in a file.
    pub fn from_json(body: &[u8]) -> Result<Self, EventError> {
        let event: CloudEvent = serde_json::from_slice(body)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.specversion != CLOUD_EVENTS_SPEC_VERSION {
            return Err(EventError::Invalid(format!(
                "unsupported specversion '{}'",
                self.specversion
            )));
        }

        for (name, value) in [("id", &self.id), ("source", &self.source), ("type", &self.r#type)] {
            if value.is_empty() {
                return Err(EventError::Invalid(format!("missing attribute '{name}'")));
            }
        }

        Ok(())
    }

    /// Builds the `started`/`finished` answer to a triggered event.
    pub fn reply_to(
        triggered: &CloudEvent,
        r#type: String,
        source: &str,
        data: &EventData,
    ) -> Result<Self, EventError> {
        Ok(CloudEvent {
            specversion: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            r#type,
            datacontenttype: Some(JSON_CONTENT_TYPE.to_string()),
            time: Some(chrono::Utc::now().to_rfc3339()),
            shkeptncontext: triggered.shkeptncontext.clone(),
            triggeredid: Some(triggered.id.clone()),
            shkeptnspecversion: Some(KEPTN_SPEC_VERSION.to_string()),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn event_data(&self) -> Result<EventData, EventError> {
        Ok(EventData::deserialize(&self.data)?)
    }
}

/// The fields of a triggering event that the monaco pipeline works with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeptnEvent {
    /// Keptn context; falls back to the event id when the extension is absent.
    pub context: String,
    pub event: String,
    pub source: String,
    pub project: String,
    pub stage: String,
    pub service: String,
    pub deployment: String,
    pub test_strategy: String,
    pub labels: HashMap<String, String>,
}

impl KeptnEvent {
    pub fn from_cloud_event(event: &CloudEvent) -> Result<Self, EventError> {
        let data = event.event_data()?;

        if data.project.is_empty() {
            return Err(EventError::MissingField("project"));
        }
        if data.stage.is_empty() {
            return Err(EventError::MissingField("stage"));
        }
        if data.service.is_empty() {
            return Err(EventError::MissingField("service"));
        }

        let nested = |outer: &str, inner: &str| {
            event
                .data
                .get(outer)
                .and_then(|value| value.get(inner))
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let context = event
            .shkeptncontext
            .clone()
            .filter(|ctx| !ctx.is_empty())
            .unwrap_or_else(|| event.id.clone());

        Ok(KeptnEvent {
            context,
            event: event.r#type.clone(),
            source: event.source.clone(),
            deployment: nested("deployment", "deploymentstrategy"),
            test_strategy: nested("test", "teststrategy"),
            project: data.project,
            stage: data.stage,
            service: data.service,
            labels: data.labels,
        })
    }
}
