//! # Wire envelope and structured message records.
//!
//! [`BusMessage`] is the transport envelope; its `content` field carries a
//! UTF-8 JSON [`Directive`]. Unknown directive types and parse failures are
//! ignored by routers, so the swarm tolerates foreign traffic on shared
//! channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport envelope for bus traffic.
///
/// `to` is `#channel` for fan-out or `@agentId` for direct delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    /// Envelope type. The swarm only emits `"message"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender agent id.
    pub from: String,
    /// Target: `#channel` or `@agentId`.
    pub to: String,
    /// Payload, a UTF-8 JSON [`Directive`] for swarm traffic.
    pub content: String,
    /// Send timestamp.
    pub ts: DateTime<Utc>,
}

impl BusMessage {
    /// Creates a `"message"`-typed envelope stamped with the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: "message".to_string(),
            from: from.into(),
            to: to.into(),
            content: content.into(),
            ts: Utc::now(),
        }
    }

    /// Returns the channel name when the target is `#channel`.
    pub fn channel(&self) -> Option<&str> {
        self.to.strip_prefix('#')
    }

    /// Returns the agent id when the target is `@agentId`.
    pub fn direct(&self) -> Option<&str> {
        self.to.strip_prefix('@')
    }
}

/// Minimal description of a unit of work.
///
/// A task without a role matches only daemons whose role is `general`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBrief {
    /// Role the task is intended for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Component or area the task touches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Prompt handed to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Caller-assigned task id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl TaskBrief {
    /// Creates a task targeted at `role`.
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Self::default()
        }
    }

    /// Whether a daemon with `daemon_role` may claim this task.
    ///
    /// `general` daemons claim anything; everyone else needs an exact role
    /// match.
    pub fn matches_role(&self, daemon_role: &str) -> bool {
        daemon_role == "general" || self.role.as_deref() == Some(daemon_role)
    }
}

/// Structured records carried in [`BusMessage::content`].
///
/// The discriminator is the JSON `type` field; field names are camelCase on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Directive {
    /// A task is open for claiming.
    #[serde(rename = "TASK_AVAILABLE")]
    TaskAvailable {
        /// The announced task.
        task: TaskBrief,
    },

    /// Direct assignment of a task to one agent.
    #[serde(rename = "ASSIGN", rename_all = "camelCase")]
    Assign {
        /// Target agent id; everyone else ignores the directive.
        agent_id: String,
        /// The assigned task.
        task: TaskBrief,
    },

    /// An idle daemon volunteers for an announced task.
    #[serde(rename = "CLAIM", rename_all = "camelCase")]
    Claim {
        /// Claiming agent id.
        agent_id: String,
        /// Component from the announcement, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<String>,
        /// Role of the claiming daemon.
        role: String,
    },

    /// An executor finished cleanly.
    #[serde(rename = "TASK_DONE", rename_all = "camelCase")]
    TaskDone {
        /// Reporting agent id.
        agent_id: String,
        /// The completed task.
        task: TaskBrief,
        /// Always `true` for this variant; kept on the wire for consumers.
        success: bool,
    },

    /// An executor exited with a failure.
    #[serde(rename = "TASK_FAIL", rename_all = "camelCase")]
    TaskFail {
        /// Reporting agent id.
        agent_id: String,
        /// The failed task.
        task: TaskBrief,
        /// Failure description.
        error: String,
    },
}

impl Directive {
    /// Parses a directive from envelope content.
    ///
    /// Returns `None` for unknown types and malformed JSON; routers treat
    /// both as silence.
    pub fn parse(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }

    /// Encodes the directive as envelope content.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_round_trips_with_camel_case_fields() {
        let d = Directive::Assign {
            agent_id: "a1b2c3d4".into(),
            task: TaskBrief {
                role: Some("builder".into()),
                component: Some("api".into()),
                prompt: Some("wire the login route".into()),
                id: None,
            },
        };
        let json = d.encode().unwrap();
        assert!(json.contains("\"type\":\"ASSIGN\""));
        assert!(json.contains("\"agentId\":\"a1b2c3d4\""));
        assert_eq!(Directive::parse(&json), Some(d));
    }

    #[test]
    fn unknown_type_and_garbage_are_ignored() {
        assert_eq!(Directive::parse("{\"type\":\"GOSSIP\",\"x\":1}"), None);
        assert_eq!(Directive::parse("not json at all"), None);
        assert_eq!(Directive::parse(""), None);
    }

    #[test]
    fn task_available_tolerates_missing_optionals() {
        let d = Directive::parse("{\"type\":\"TASK_AVAILABLE\",\"task\":{\"role\":\"builder\"}}")
            .unwrap();
        match d {
            Directive::TaskAvailable { task } => {
                assert_eq!(task.role.as_deref(), Some("builder"));
                assert_eq!(task.prompt, None);
            }
            other => panic!("unexpected directive: {other:?}"),
        }
    }

    #[test]
    fn role_matching() {
        let builder_task = TaskBrief::for_role("builder");
        assert!(builder_task.matches_role("builder"));
        assert!(builder_task.matches_role("general"));
        assert!(!builder_task.matches_role("reviewer"));

        let untargeted = TaskBrief::default();
        assert!(untargeted.matches_role("general"));
        assert!(!untargeted.matches_role("builder"));
    }
}
