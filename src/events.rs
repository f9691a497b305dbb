//! Typed event stream for pipeline progress.
//!
//! Multi-producer over a bounded broadcast channel; emit never blocks and
//! a lagging consumer loses the oldest events first. Events are advisory:
//! fatal errors additionally surface through phase return values, and the
//! stream always terminates with either `report/complete` or
//! `error/pipeline`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Canonical stage/substage strings. UI consumers dispatch on these, so
/// they are contracts, not suggestions.
pub mod stage {
    pub const LAB_PREP: &str = "lab_prep";
    pub const NGS: &str = "ngs";
    pub const ANNOTATION: &str = "annotation";
    pub const ENRICHMENT: &str = "enrichment";
    pub const REPORT: &str = "report";
    pub const ERROR: &str = "error";

    pub const START: &str = "start";
    pub const INIT: &str = "init";
    pub const VARIANT_DISCOVERY: &str = "variant_discovery";
    pub const CLINICAL_VALIDATION: &str = "clinical_validation";
    pub const PROCESSING: &str = "processing";
    pub const SINGLE_GENE: &str = "single_gene";
    pub const MULTI_GENE: &str = "multi_gene";
    pub const DRUG_DISEASE_CONTEXT: &str = "drug_disease_context";
    pub const RDF_ASSEMBLY: &str = "rdf_assembly";
    pub const PROFILE_GENERATION: &str = "profile_generation";
    pub const VARIANT_LINKING: &str = "variant_linking";
    pub const EXPORT: &str = "export";
    pub const COMPLETE: &str = "complete";
    pub const PIPELINE: &str = "pipeline";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub stage: String,
    pub substage: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl PipelineEvent {
    pub fn new(stage: &str, substage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            substage: substage.to_string(),
            level: EventLevel::Info,
            message: message.into(),
            progress: None,
            payload: None,
        }
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Cheap to clone; all clones feed the same consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Non-blocking emit. With no live subscriber the event is dropped —
    /// tolerable, events are advisory.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn info(&self, stage: &str, substage: &str, message: impl Into<String>, progress: f64) {
        self.emit(PipelineEvent::new(stage, substage, message).with_progress(progress));
    }

    pub fn warn(&self, stage: &str, substage: &str, message: impl Into<String>) {
        self.emit(PipelineEvent::new(stage, substage, message).with_level(EventLevel::Warn));
    }

    pub fn error(&self, stage: &str, substage: &str, message: impl Into<String>) {
        self.emit(PipelineEvent::new(stage, substage, message).with_level(EventLevel::Error));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_in_order_per_producer() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.info(stage::LAB_PREP, stage::START, "starting", 0.0);
        bus.warn(stage::NGS, stage::PROCESSING, "degraded sub-record");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, stage::LAB_PREP);
        assert_eq!(first.level, EventLevel::Info);
        assert_eq!(first.progress, Some(0.0));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, EventLevel::Warn);
        assert!(second.progress.is_none());
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.error(stage::ERROR, stage::PIPELINE, "nobody listening");
    }

    #[tokio::test]
    async fn lagging_consumer_drops_oldest_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..(EVENT_CAPACITY + 10) {
            bus.info(stage::NGS, stage::PROCESSING, format!("event {i}"), 0.5);
        }
        // The first recv reports the lag, then delivery resumes from the
        // oldest retained event.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 10),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn progress_is_clamped() {
        let event = PipelineEvent::new(stage::REPORT, stage::EXPORT, "x").with_progress(1.7);
        assert_eq!(event.progress, Some(1.0));
    }
}
