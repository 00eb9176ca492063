use crate::{AgentId, CohortError, CohortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Version stamped on every message this crate produces.
pub const PROTOCOL_VERSION: &str = "v1";

/// The closed set of message kinds, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// An agent began work.
    AgentStarted,
    /// An agent finished all of its phases.
    AgentCompleted,
    /// An agent stopped with an error.
    AgentFailed,
    /// A phase began.
    PhaseStarted,
    /// A phase finished.
    PhaseCompleted,
    /// A phase failed.
    PhaseFailed,
    /// A value was written to the shared store.
    DataAvailable,
    /// An agent asks for assistance.
    HelpNeeded,
    /// Free-form progress report.
    StatusUpdate,
    /// Liveness signal.
    Heartbeat,
}

impl MessageType {
    /// Every supported kind, in declaration order.
    pub fn all() -> [MessageType; 10] {
        [
            MessageType::AgentStarted,
            MessageType::AgentCompleted,
            MessageType::AgentFailed,
            MessageType::PhaseStarted,
            MessageType::PhaseCompleted,
            MessageType::PhaseFailed,
            MessageType::DataAvailable,
            MessageType::HelpNeeded,
            MessageType::StatusUpdate,
            MessageType::Heartbeat,
        ]
    }

    /// Wire name of the kind (`PhaseCompleted`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::AgentStarted => "AgentStarted",
            MessageType::AgentCompleted => "AgentCompleted",
            MessageType::AgentFailed => "AgentFailed",
            MessageType::PhaseStarted => "PhaseStarted",
            MessageType::PhaseCompleted => "PhaseCompleted",
            MessageType::PhaseFailed => "PhaseFailed",
            MessageType::DataAvailable => "DataAvailable",
            MessageType::HelpNeeded => "HelpNeeded",
            MessageType::StatusUpdate => "StatusUpdate",
            MessageType::Heartbeat => "Heartbeat",
        }
    }

    /// Payload fields that must be present when building from untyped JSON.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            MessageType::AgentStarted => &["agent_name"],
            MessageType::AgentCompleted => &["status"],
            MessageType::AgentFailed => &["error"],
            MessageType::PhaseStarted => &["phase_name"],
            MessageType::PhaseCompleted => &["phase_name", "success"],
            MessageType::PhaseFailed => &["phase_name", "error"],
            MessageType::DataAvailable => &["data_key"],
            MessageType::HelpNeeded => &["problem"],
            MessageType::StatusUpdate => &["status"],
            MessageType::Heartbeat => &[],
        }
    }

    /// Whether this kind ends an agent's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageType::AgentCompleted | MessageType::AgentFailed)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CohortError::Validation(format!("Unknown message type: {s}")))
    }
}

/// Outcome reported by an `AgentCompleted` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// Every phase succeeded.
    Success,
    /// Some outputs are missing or degraded.
    Partial,
}

/// How urgently a `HelpNeeded` message wants attention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Can wait.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Blocks progress.
    High,
    /// Blocks the whole run.
    Critical,
}

/// Kind-specific payload of a [`CoordinationMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    /// An agent began work.
    AgentStarted {
        /// Display name of the agent.
        agent_name: String,
        /// Role label, e.g. `leader`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        /// Capabilities the agent covers.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        capabilities: Vec<String>,
    },
    /// An agent finished all of its phases.
    AgentCompleted {
        /// Whether everything succeeded.
        status: CompletionStatus,
        /// Short human-readable summary.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Outputs keyed by phase name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<serde_json::Value>,
    },
    /// An agent stopped with an error.
    AgentFailed {
        /// What went wrong. Never empty.
        error: String,
        /// Structured diagnostics.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        /// Whether a retry could succeed.
        #[serde(default)]
        recovery_possible: bool,
    },
    /// A phase began.
    PhaseStarted {
        /// Phase name from the plan.
        phase_name: String,
        /// Zero-based position within the agent's phases.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase_index: Option<usize>,
        /// Number of phases the agent owns.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_phases: Option<usize>,
    },
    /// A phase finished.
    PhaseCompleted {
        /// Phase name from the plan.
        phase_name: String,
        /// Whether the phase met its success indicators.
        success: bool,
        /// Wall-clock seconds; finite and non-negative.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
        /// The phase output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<serde_json::Value>,
    },
    /// A phase failed.
    PhaseFailed {
        /// Phase name from the plan.
        phase_name: String,
        /// What went wrong. Never empty.
        error: String,
        /// Attempts made so far.
        #[serde(default)]
        retry_count: u32,
        /// Whether another attempt follows.
        #[serde(default)]
        will_retry: bool,
    },
    /// A value was written to the shared store.
    DataAvailable {
        /// Store key holding the value.
        data_key: String,
        /// Free-form type label.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_type: Option<String>,
        /// Size in bytes, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_size: Option<usize>,
        /// Extra producer-defined attributes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// An agent asks for assistance.
    HelpNeeded {
        /// The problem, in prose. Never empty.
        problem: String,
        /// How urgent it is.
        #[serde(default)]
        severity: Severity,
        /// Structured context for whoever responds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        /// A fix the sender would try.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_resolution: Option<String>,
    },
    /// Free-form progress report.
    StatusUpdate {
        /// Status label. Never empty.
        status: String,
        /// Progress in percent, 0 to 100.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_percentage: Option<f64>,
        /// What the agent is doing right now.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_activity: Option<String>,
        /// Estimated completion, free-form.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta: Option<String>,
    },
    /// Liveness signal.
    Heartbeat {
        /// Optional health label such as `healthy`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health_status: Option<String>,
    },
}

impl MessageKind {
    /// The payload-free tag of this kind.
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageKind::AgentStarted { .. } => MessageType::AgentStarted,
            MessageKind::AgentCompleted { .. } => MessageType::AgentCompleted,
            MessageKind::AgentFailed { .. } => MessageType::AgentFailed,
            MessageKind::PhaseStarted { .. } => MessageType::PhaseStarted,
            MessageKind::PhaseCompleted { .. } => MessageType::PhaseCompleted,
            MessageKind::PhaseFailed { .. } => MessageType::PhaseFailed,
            MessageKind::DataAvailable { .. } => MessageType::DataAvailable,
            MessageKind::HelpNeeded { .. } => MessageType::HelpNeeded,
            MessageKind::StatusUpdate { .. } => MessageType::StatusUpdate,
            MessageKind::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    fn payload_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut require = |field: &str, value: &str| {
            if value.trim().is_empty() {
                errors.push(format!("Missing required field: {field}"));
            }
        };

        match self {
            MessageKind::AgentStarted { agent_name, .. } => require("agent_name", agent_name),
            MessageKind::AgentFailed { error, .. } => require("error", error),
            MessageKind::PhaseStarted {
                phase_name,
                phase_index,
                total_phases,
            } => {
                require("phase_name", phase_name);
                if let (Some(index), Some(total)) = (phase_index, total_phases) {
                    if index >= total {
                        errors.push(format!(
                            "Field 'phase_index' out of range: {index} >= {total}"
                        ));
                    }
                }
            }
            MessageKind::PhaseCompleted {
                phase_name,
                duration_secs,
                ..
            } => {
                require("phase_name", phase_name);
                if let Some(secs) = duration_secs {
                    if !secs.is_finite() || *secs < 0.0 {
                        errors.push(format!("Field 'duration_secs' is invalid: {secs}"));
                    }
                }
            }
            MessageKind::PhaseFailed {
                phase_name, error, ..
            } => {
                require("phase_name", phase_name);
                require("error", error);
            }
            MessageKind::DataAvailable { data_key, .. } => require("data_key", data_key),
            MessageKind::HelpNeeded { problem, .. } => require("problem", problem),
            MessageKind::StatusUpdate {
                status,
                progress_percentage,
                ..
            } => {
                require("status", status);
                if let Some(pct) = progress_percentage {
                    if !(0.0..=100.0).contains(pct) {
                        errors.push(format!(
                            "Field 'progress_percentage' out of range: {pct}"
                        ));
                    }
                }
            }
            MessageKind::AgentCompleted { .. } | MessageKind::Heartbeat { .. } => {}
        }
        errors
    }
}

/// An immutable message exchanged between agents and the orchestrator.
///
/// Construct through [`CoordinationMessage::create`] or one of the typed
/// constructors; all of them validate. Messages that arrive through
/// deserialization should be re-checked with [`CoordinationMessage::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMessage {
    id: Uuid,
    sender: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<AgentId>,
    timestamp: DateTime<Utc>,
    protocol_version: String,
    kind: MessageKind,
}

impl CoordinationMessage {
    /// Build a broadcast message, rejecting empty senders and incomplete payloads.
    pub fn create(kind: MessageKind, sender: impl Into<AgentId>) -> CohortResult<Self> {
        let message = Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: None,
            timestamp: Utc::now(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            kind,
        };
        message.ensure_valid()?;
        Ok(message)
    }

    /// Build a message from a kind name and an untyped JSON payload object.
    pub fn from_payload(
        message_type: &str,
        sender: impl Into<AgentId>,
        payload: serde_json::Value,
    ) -> CohortResult<Self> {
        let kind_tag: MessageType = message_type.parse()?;
        let serde_json::Value::Object(mut fields) = payload else {
            return Err(CohortError::Validation(format!(
                "Invalid payload for {kind_tag}: expected a JSON object"
            )));
        };

        let missing: Vec<&str> = kind_tag
            .required_fields()
            .iter()
            .copied()
            .filter(|f| !fields.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            return Err(CohortError::Validation(format!(
                "Invalid payload for {kind_tag}: missing required field(s): {}",
                missing.join(", ")
            )));
        }

        fields.insert(
            "type".to_string(),
            serde_json::Value::String(kind_tag.as_str().to_string()),
        );
        let kind: MessageKind = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| CohortError::Validation(format!("Invalid payload for {kind_tag}: {e}")))?;
        Self::create(kind, sender)
    }

    /// Address the message to a single agent instead of broadcasting it.
    pub fn with_recipient(mut self, recipient: impl Into<AgentId>) -> CohortResult<Self> {
        let recipient = recipient.into();
        if recipient.trim().is_empty() {
            return Err(CohortError::Validation(
                "Recipient must not be empty".to_string(),
            ));
        }
        self.recipient = Some(recipient);
        Ok(self)
    }

    /// Every structural problem with this message; empty when valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.sender.trim().is_empty() {
            errors.push("Sender must not be empty".to_string());
        }
        if self.protocol_version != PROTOCOL_VERSION {
            errors.push(format!(
                "Unsupported protocol version: {}",
                self.protocol_version
            ));
        }
        if matches!(&self.recipient, Some(r) if r.trim().is_empty()) {
            errors.push("Recipient must not be empty".to_string());
        }
        errors.extend(self.kind.payload_errors());
        errors
    }

    /// Re-check structural invariants.
    pub fn validate(&self) -> bool {
        self.validation_errors().is_empty()
    }

    /// Like [`validate`](Self::validate) but reports the problems as an error.
    pub fn ensure_valid(&self) -> CohortResult<()> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CohortError::Validation(format!(
                "Invalid {} message: {}",
                self.kind.message_type(),
                errors.join("; ")
            )))
        }
    }

    /// Unique message id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Agent (or `orchestrator`) that sent the message.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// `None` for broadcasts.
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Always [`PROTOCOL_VERSION`] for messages built here.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Typed payload.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Payload-free tag of [`kind`](Self::kind).
    pub fn message_type(&self) -> MessageType {
        self.kind.message_type()
    }

    /// Whether `agent_id` should see this message (broadcast or addressed to it).
    pub fn is_for(&self, agent_id: &str) -> bool {
        self.recipient.as_deref().map_or(true, |r| r == agent_id)
    }

    /// Phase name for phase-scoped kinds.
    pub fn phase_name(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::PhaseStarted { phase_name, .. }
            | MessageKind::PhaseCompleted { phase_name, .. }
            | MessageKind::PhaseFailed { phase_name, .. } => Some(phase_name),
            _ => None,
        }
    }

    // --- Typed constructors ---

    /// `AgentStarted` broadcast.
    pub fn agent_started(
        sender: impl Into<AgentId>,
        agent_name: impl Into<String>,
        role: Option<String>,
        capabilities: Vec<String>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::AgentStarted {
                agent_name: agent_name.into(),
                role,
                capabilities,
            },
            sender,
        )
    }

    /// `AgentCompleted` broadcast.
    pub fn agent_completed(
        sender: impl Into<AgentId>,
        status: CompletionStatus,
        result: Option<String>,
        outputs: Option<serde_json::Value>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::AgentCompleted {
                status,
                result,
                outputs,
            },
            sender,
        )
    }

    /// `AgentFailed` broadcast; `error` must not be empty.
    pub fn agent_failed(sender: impl Into<AgentId>, error: impl Into<String>) -> CohortResult<Self> {
        Self::create(
            MessageKind::AgentFailed {
                error: error.into(),
                details: None,
                recovery_possible: false,
            },
            sender,
        )
    }

    /// `PhaseStarted` broadcast; `phase_index` must be below `total_phases`.
    pub fn phase_started(
        sender: impl Into<AgentId>,
        phase_name: impl Into<String>,
        phase_index: usize,
        total_phases: usize,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::PhaseStarted {
                phase_name: phase_name.into(),
                phase_index: Some(phase_index),
                total_phases: Some(total_phases),
            },
            sender,
        )
    }

    /// `PhaseCompleted` broadcast.
    pub fn phase_completed(
        sender: impl Into<AgentId>,
        phase_name: impl Into<String>,
        success: bool,
        duration_secs: Option<f64>,
        outputs: Option<serde_json::Value>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::PhaseCompleted {
                phase_name: phase_name.into(),
                success,
                duration_secs,
                outputs,
            },
            sender,
        )
    }

    /// `PhaseFailed` broadcast.
    pub fn phase_failed(
        sender: impl Into<AgentId>,
        phase_name: impl Into<String>,
        error: impl Into<String>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::PhaseFailed {
                phase_name: phase_name.into(),
                error: error.into(),
                retry_count: 0,
                will_retry: false,
            },
            sender,
        )
    }

    /// `DataAvailable` broadcast for a store key.
    pub fn data_available(
        sender: impl Into<AgentId>,
        data_key: impl Into<String>,
        data_type: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::DataAvailable {
                data_key: data_key.into(),
                data_type,
                data_size: None,
                metadata,
            },
            sender,
        )
    }

    /// `HelpNeeded` broadcast. Narrow it with [`with_recipient`](Self::with_recipient).
    pub fn help_needed(
        sender: impl Into<AgentId>,
        problem: impl Into<String>,
        severity: Severity,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::HelpNeeded {
                problem: problem.into(),
                severity,
                context: None,
                suggested_resolution: None,
            },
            sender,
        )
    }

    /// `StatusUpdate` broadcast; `progress_percentage` must be within 0 to 100.
    pub fn status_update(
        sender: impl Into<AgentId>,
        status: impl Into<String>,
        progress_percentage: Option<f64>,
    ) -> CohortResult<Self> {
        Self::create(
            MessageKind::StatusUpdate {
                status: status.into(),
                progress_percentage,
                current_activity: None,
                eta: None,
            },
            sender,
        )
    }

    /// `Heartbeat` broadcast.
    pub fn heartbeat(sender: impl Into<AgentId>) -> CohortResult<Self> {
        Self::create(
            MessageKind::Heartbeat {
                health_status: None,
            },
            sender,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_completed_constructor() {
        let msg =
            CoordinationMessage::phase_completed("agent-1", "analyze", true, Some(1.5), None)
                .unwrap();
        assert_eq!(msg.message_type(), MessageType::PhaseCompleted);
        assert_eq!(msg.phase_name(), Some("analyze"));
        assert_eq!(msg.protocol_version(), PROTOCOL_VERSION);
        assert!(msg.recipient().is_none());
        assert!(msg.validate());
    }

    #[test]
    fn test_empty_sender_rejected() {
        let err = CoordinationMessage::heartbeat("  ").unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
        assert!(err.to_string().contains("Sender"));
    }

    #[test]
    fn test_empty_phase_name_rejected() {
        let err = CoordinationMessage::phase_started("agent-1", "", 0, 2).unwrap_err();
        assert!(err.to_string().contains("phase_name"));
    }

    #[test]
    fn test_phase_index_out_of_range() {
        assert!(CoordinationMessage::phase_started("agent-1", "load", 2, 2).is_err());
    }

    #[test]
    fn test_progress_out_of_range() {
        assert!(CoordinationMessage::status_update("agent-1", "running", Some(140.0)).is_err());
        assert!(CoordinationMessage::status_update("agent-1", "running", Some(40.0)).is_ok());
    }

    #[test]
    fn test_from_payload_missing_success_flag() {
        let err = CoordinationMessage::from_payload(
            "PhaseCompleted",
            "agent-1",
            json!({ "phase_name": "analyze" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("success"));
    }

    #[test]
    fn test_from_payload_wrong_type() {
        let err = CoordinationMessage::from_payload(
            "PhaseCompleted",
            "agent-1",
            json!({ "phase_name": "analyze", "success": "yes" }),
        )
        .unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
    }

    #[test]
    fn test_from_payload_unknown_kind() {
        let err = CoordinationMessage::from_payload("Gossip", "agent-1", json!({})).unwrap_err();
        assert!(err.to_string().contains("Unknown message type"));
    }

    #[test]
    fn test_from_payload_valid() {
        let msg = CoordinationMessage::from_payload(
            "HelpNeeded",
            "agent-2",
            json!({ "problem": "cannot reach database", "severity": "high" }),
        )
        .unwrap();
        match msg.kind() {
            MessageKind::HelpNeeded { severity, .. } => assert_eq!(*severity, Severity::High),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_recipient_filtering() {
        let broadcast = CoordinationMessage::heartbeat("agent-1").unwrap();
        assert!(broadcast.is_for("agent-9"));

        let direct = CoordinationMessage::data_available("agent-1", "phase.a.output", None, None)
            .unwrap()
            .with_recipient("agent-2")
            .unwrap();
        assert!(direct.is_for("agent-2"));
        assert!(!direct.is_for("agent-3"));
    }

    #[test]
    fn test_deserialized_message_revalidated() {
        let msg = CoordinationMessage::agent_failed("agent-1", "boom").unwrap();
        let mut value = serde_json::to_value(&msg).unwrap();
        value["sender"] = json!("");
        let tampered: CoordinationMessage = serde_json::from_value(value).unwrap();
        assert!(!tampered.validate());
    }

    #[test]
    fn test_message_type_parse_and_display() {
        for kind in MessageType::all() {
            let parsed: MessageType = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!(MessageType::AgentFailed.is_terminal());
        assert!(!MessageType::PhaseFailed.is_terminal());
    }

    #[test]
    fn test_kind_serialization_tag() {
        let msg = CoordinationMessage::phase_failed("agent-1", "load", "disk full").unwrap();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"]["type"], "PhaseFailed");
        assert_eq!(value["kind"]["error"], "disk full");
    }
}
