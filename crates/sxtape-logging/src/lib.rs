//! Logging setup for sxtape
//!
//! The engine crates log through the `log` facade and open `tracing`
//! spans around compilation and derivative assembly. [`init_logging`]
//! routes both into a `tracing-subscriber` registry filtered by
//! `SXTAPE_LOG` (default `info`). Callers that want the records
//! themselves install a hook with [`set_log_hook`] or [`set_span_hook`].

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tracing::span::{Attributes, Id};
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const LOG_ENV: &str = "SXTAPE_LOG";

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub ts: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Innermost span the event was emitted in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<JsonValue>,
}

/// A closed span with its wall-clock duration
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub target: String,
    /// Start time, microseconds since the Unix epoch
    pub start_us: i64,
    pub duration_us: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<JsonValue>,
}

type LogHook = Arc<dyn Fn(&LogRecord) + Send + Sync>;
type SpanHook = Arc<dyn Fn(&SpanRecord) + Send + Sync>;

static LOG_HOOK: OnceCell<LogHook> = OnceCell::new();
static SPAN_HOOK: OnceCell<SpanHook> = OnceCell::new();

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Filter directive used when `SXTAPE_LOG` is unset
    pub default_filter: Option<String>,
    /// Report closed spans to the span hook
    pub capture_spans: bool,
}

/// Keeps a thread-local subscriber installed when a global one already
/// exists. Dropping it restores the previous default.
pub struct LoggingGuard {
    _guard: Option<DefaultGuard>,
}

/// Install a hook receiving every log record that passes the filter.
/// Only the first hook installed in a process is kept.
pub fn set_log_hook<F>(hook: F)
where
    F: Fn(&LogRecord) + Send + Sync + 'static,
{
    let _ = LOG_HOOK.set(Arc::new(hook));
}

/// Install a hook receiving every closed span. Only the first hook
/// installed in a process is kept.
pub fn set_span_hook<F>(hook: F)
where
    F: Fn(&SpanRecord) + Send + Sync + 'static,
{
    let _ = SPAN_HOOK.set(Arc::new(hook));
}

fn env_filter(default: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(opts: LoggingOptions) -> LoggingGuard {
    // log:: macros from the engine crates flow into tracing
    let _ = LogTracer::init();

    let build = || {
        tracing_subscriber::registry()
            .with(env_filter(opts.default_filter.as_deref()))
            .with(CaptureLayer {
                spans: opts.capture_spans,
            })
    };

    let guard = match tracing::subscriber::set_global_default(build()) {
        Ok(()) => None,
        Err(_) => Some(tracing::subscriber::set_default(build())),
    };
    LoggingGuard { _guard: guard }
}

struct CaptureLayer {
    spans: bool,
}

/// Stored in span extensions while the span is open
struct SpanTiming {
    started: Instant,
    start_us: i64,
    fields: Option<JsonValue>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.spans || SPAN_HOOK.get().is_none() {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanTiming {
            started: Instant::now(),
            start_us: chrono::Utc::now().timestamp_micros(),
            fields: visitor.into_fields(),
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let Some(hook) = LOG_HOOK.get() else {
            return;
        };
        let meta = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| meta.name().to_string());

        let record = LogRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message,
            span: ctx.lookup_current().map(|s| s.name().to_string()),
            fields: visitor.into_fields(),
        };
        hook(&record);
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(hook) = SPAN_HOOK.get() else {
            return;
        };
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(timing) = span.extensions_mut().remove::<SpanTiming>() else {
            return;
        };
        let record = SpanRecord {
            name: span.name().to_string(),
            target: span.metadata().target().to_string(),
            start_us: timing.start_us,
            duration_us: timing.started.elapsed().as_micros() as i64,
            fields: timing.fields,
        };
        hook(&record);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, JsonValue>,
}

impl JsonVisitor {
    fn put(&mut self, name: &str, value: JsonValue) {
        if name == "message" {
            self.message = Some(match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(name.to_string(), value);
        }
    }

    fn into_fields(self) -> Option<JsonValue> {
        (!self.fields.is_empty()).then_some(JsonValue::Object(self.fields))
    }
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.put(field.name(), JsonValue::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.put(field.name(), JsonValue::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.put(field.name(), JsonValue::Bool(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.put(field.name(), JsonValue::from(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.put(field.name(), JsonValue::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.put(field.name(), JsonValue::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_separates_message_from_fields() {
        let mut v = JsonVisitor::default();
        v.put("message", JsonValue::String("compiled".into()));
        v.put("ops", JsonValue::from(12u64));
        assert_eq!(v.message.as_deref(), Some("compiled"));
        let fields = v.into_fields().unwrap();
        assert_eq!(fields["ops"], 12);
    }

    #[test]
    fn empty_visitor_has_no_fields() {
        assert!(JsonVisitor::default().into_fields().is_none());
    }
}
