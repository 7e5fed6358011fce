//! Traces.

use std::fmt;

use super::Attributes;

/// A trace identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// Creates a new `TraceId` from the given bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the identifier.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` if every byte of the identifier is zero.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A span identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// Creates a new `SpanId` from the given bytes.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the identifier.
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// The role a span plays in a trace.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum SpanKind {
    /// Unspecified.
    #[default]
    Unspecified,

    /// An internal operation within an application.
    Internal,

    /// The server side of a synchronous request.
    Server,

    /// The client side of a synchronous request.
    Client,

    /// The sending side of an asynchronous message.
    Producer,

    /// The receiving side of an asynchronous message.
    Consumer,
}

impl SpanKind {
    /// Returns the canonical string representation of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "SPAN_KIND_UNSPECIFIED",
            Self::Internal => "SPAN_KIND_INTERNAL",
            Self::Server => "SPAN_KIND_SERVER",
            Self::Client => "SPAN_KIND_CLIENT",
            Self::Producer => "SPAN_KIND_PRODUCER",
            Self::Consumer => "SPAN_KIND_CONSUMER",
        }
    }
}

/// The status of a span.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum StatusCode {
    /// No status was set.
    #[default]
    Unset,

    /// The operation completed successfully.
    Ok,

    /// The operation failed.
    Error,
}

impl StatusCode {
    /// Returns the canonical string representation of the status code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "STATUS_CODE_UNSET",
            Self::Ok => "STATUS_CODE_OK",
            Self::Error => "STATUS_CODE_ERROR",
        }
    }
}

/// A timestamped event that occurred during a span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanEvent {
    name: String,
    time_unix_nano: u64,
    attributes: Attributes,
}

impl SpanEvent {
    /// Creates a new `SpanEvent` with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Returns the name of the event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the time the event occurred, in nanoseconds since the Unix epoch.
    pub fn time_unix_nano(&self) -> u64 {
        self.time_unix_nano
    }

    /// Returns the attributes of the event.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Sets the time the event occurred, in nanoseconds since the Unix epoch.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_time_unix_nano(mut self, time_unix_nano: u64) -> Self {
        self.time_unix_nano = time_unix_nano;
        self
    }

    /// Sets the attributes of the event.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Span {
    trace_id: TraceId,
    span_id: SpanId,
    name: String,
    kind: SpanKind,
    status: StatusCode,
    start_time_unix_nano: u64,
    end_time_unix_nano: u64,
    attributes: Attributes,
    events: Vec<SpanEvent>,
}

impl Span {
    /// Creates a new `Span` with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Returns the trace identifier.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the span identifier.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns the name of the span.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the kind of the span.
    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Returns the status code of the span.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the start time of the span, in nanoseconds since the Unix epoch.
    pub fn start_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano
    }

    /// Returns the end time of the span, in nanoseconds since the Unix epoch.
    pub fn end_time_unix_nano(&self) -> u64 {
        self.end_time_unix_nano
    }

    /// Returns the duration of the span, in nanoseconds.
    ///
    /// Spans whose end precedes their start have a negative duration.
    pub fn duration_nanos(&self) -> i64 {
        (self.end_time_unix_nano as i128 - self.start_time_unix_nano as i128) as i64
    }

    /// Returns the attributes of the span.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the events recorded during the span.
    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    /// Sets the trace and span identifiers.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_ids(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    /// Sets the kind of the span.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the status code of the span.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets the start and end times of the span, in nanoseconds since the Unix epoch.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_timestamps(mut self, start_time_unix_nano: u64, end_time_unix_nano: u64) -> Self {
        self.start_time_unix_nano = start_time_unix_nano;
        self.end_time_unix_nano = end_time_unix_nano;
        self
    }

    /// Sets the attributes of the span.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the events of the span.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_events(mut self, events: Vec<SpanEvent>) -> Self {
        self.events = events;
        self
    }
}

/// The library that produced a group of spans.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstrumentationScope {
    name: String,
    version: String,
}

impl InstrumentationScope {
    /// Creates a new `InstrumentationScope`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Returns the name of the scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the version of the scope.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Spans produced by a single instrumentation scope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopeSpans {
    scope: InstrumentationScope,
    spans: Vec<Span>,
}

impl ScopeSpans {
    /// Creates a new `ScopeSpans`.
    pub fn new(scope: InstrumentationScope, spans: Vec<Span>) -> Self {
        Self { scope, spans }
    }

    /// Returns the instrumentation scope.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Returns the spans.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }
}

/// The entity that produced a group of spans, such as a service instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    /// Creates a new `Resource` with the given attributes.
    pub fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }

    /// Returns the attributes of the resource.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// Spans grouped by the resource that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSpans {
    resource: Resource,
    scope_spans: Vec<ScopeSpans>,
}

impl ResourceSpans {
    /// Creates a new `ResourceSpans`.
    pub fn new(resource: Resource, scope_spans: Vec<ScopeSpans>) -> Self {
        Self { resource, scope_spans }
    }

    /// Returns the resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns the spans, grouped by instrumentation scope.
    pub fn scope_spans(&self) -> &[ScopeSpans] {
        &self.scope_spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_duration() {
        let span = Span::new("op").with_timestamps(2_000, 1_000);
        assert_eq!(span.duration_nanos(), -1_000);
    }

    #[test]
    fn id_display() {
        let trace_id = TraceId::from_bytes([0xab; 16]);
        assert_eq!(trace_id.to_string(), "ab".repeat(16));
        assert!(!trace_id.is_empty());
        assert!(TraceId::default().is_empty());
    }
}
