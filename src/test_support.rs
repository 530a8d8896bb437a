//! `tracing` layer recording events and span fields for assertions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// One captured event: its target and every field rendered as a string.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub fields: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    span_values: Arc<Mutex<Vec<(String, String)>>>,
}

impl CaptureLayer {
    /// Events emitted on `target`.
    pub fn events_for(&self, target: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect()
    }

    /// Every value a span field named `name` was given.
    pub fn span_values(&self, name: &str) -> Vec<String> {
        self.span_values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor(HashMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        self.span_values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(visitor.0);
    }

    fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        self.span_values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(visitor.0);
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedEvent {
                target: event.metadata().target().to_string(),
                fields: visitor.0,
            });
    }
}
