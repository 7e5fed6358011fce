//! Series keys.
//!
//! Every aggregated series is identified by a key made from the span's service name, name, kind, and status code,
//! followed by the values of any configured dimensions that could be resolved. Components are joined with a null byte.
//!
//! A null byte inside a component is written as a backslash followed by `0`, and backslashes are doubled, so the
//! contents of a component can never be mistaken for a separator.

use std::fmt;

use crate::{
    config::Dimension,
    data_model::{
        trace::{InstrumentationScope, Span},
        AttributeValue, Attributes,
    },
};

/// Attribute holding the service name of a resource.
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Attribute holding the span name on emitted series.
pub const SPAN_NAME_KEY: &str = "span.name";

/// Attribute holding the span kind on emitted series.
pub const SPAN_KIND_KEY: &str = "span.kind";

/// Attribute holding the status code on emitted series.
pub const STATUS_CODE_KEY: &str = "status.code";

/// Attribute holding the instrumentation scope name on emitted series.
pub const INSTRUMENTATION_SCOPE_NAME_KEY: &str = "span.instrumentation.scope.name";

/// Attribute holding the instrumentation scope version on emitted series.
pub const INSTRUMENTATION_SCOPE_VERSION_KEY: &str = "span.instrumentation.scope.version";

const SEPARATOR: char = '\0';
const ESCAPE: char = '\\';

/// Writes a single key component, escaping separators.
struct ComponentWriter<'a>(&'a mut String);

impl fmt::Write for ComponentWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if !s.contains([SEPARATOR, ESCAPE]) {
            self.0.push_str(s);
            return Ok(());
        }

        for c in s.chars() {
            match c {
                SEPARATOR => self.0.push_str("\\0"),
                ESCAPE => self.0.push_str("\\\\"),
                c => self.0.push(c),
            }
        }
        Ok(())
    }
}

/// Identifies one aggregated series within a resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SeriesKey(Box<str>);

impl SeriesKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&SeriesKey> for SeriesKey {
    fn from(key: &SeriesKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace(SEPARATOR, "|"))
    }
}

/// Base dimensions that are always part of a key unless excluded.
#[derive(Clone, Copy, Debug, Default)]
struct ExcludedDimensions {
    service_name: bool,
    span_name: bool,
    span_kind: bool,
    status_code: bool,
}

impl ExcludedDimensions {
    fn from_names(names: &[String]) -> Self {
        let mut excluded = Self::default();
        for name in names {
            match name.as_str() {
                SERVICE_NAME_KEY => excluded.service_name = true,
                SPAN_NAME_KEY => excluded.span_name = true,
                SPAN_KIND_KEY => excluded.span_kind = true,
                STATUS_CODE_KEY => excluded.status_code = true,
                _ => {}
            }
        }
        excluded
    }
}

/// Resolves a dimension against the given attribute sources, in order of precedence, falling back to the dimension's
/// default value.
fn resolve_dimension<'a>(dimension: &'a Dimension, sources: &[&'a Attributes]) -> Option<DimensionValue<'a>> {
    sources
        .iter()
        .copied()
        .find_map(|attrs| attrs.get(&dimension.name))
        .map(DimensionValue::Attribute)
        .or_else(|| dimension.default.as_deref().map(DimensionValue::Default))
}

enum DimensionValue<'a> {
    Attribute(&'a AttributeValue),
    Default(&'a str),
}

impl DimensionValue<'_> {
    fn to_attribute_value(&self) -> AttributeValue {
        match self {
            Self::Attribute(value) => (*value).clone(),
            Self::Default(value) => AttributeValue::from(*value),
        }
    }
}

impl fmt::Display for DimensionValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(value) => value.fmt(f),
            Self::Default(value) => f.write_str(value),
        }
    }
}

/// Builds series keys and the matching series attributes.
///
/// The builder owns a scratch buffer that is reused across calls, so a single builder should be kept around for the
/// lifetime of the engine rather than created per span.
pub struct KeyBuilder {
    buf: String,
    components: usize,
    excluded: ExcludedDimensions,
}

impl KeyBuilder {
    /// Creates a new `KeyBuilder`, leaving out the given base dimensions.
    ///
    /// Unrecognized names are ignored.
    pub fn new(exclude_dimensions: &[String]) -> Self {
        Self {
            buf: String::with_capacity(1024),
            components: 0,
            excluded: ExcludedDimensions::from_names(exclude_dimensions),
        }
    }

    fn push(&mut self, value: impl fmt::Display) {
        use fmt::Write as _;

        if self.components > 0 {
            self.buf.push(SEPARATOR);
        }
        self.components += 1;

        // Writing to a `String` cannot fail.
        let _ = write!(ComponentWriter(&mut self.buf), "{}", value);
    }

    /// Builds the key for a span, resolving dimensions against the span's attributes and then the resource's.
    pub fn build(
        &mut self, service_name: &str, span: &Span, dimensions: &[Dimension], resource_attributes: &Attributes,
    ) -> SeriesKey {
        self.build_with_sources(
            service_name,
            span,
            None,
            dimensions,
            &[span.attributes(), resource_attributes],
        )
    }

    /// Builds a key, resolving dimensions against `sources` in order of precedence.
    ///
    /// When `scope` is given, its name, and version if not empty, are appended after the dimensions.
    pub fn build_with_sources(
        &mut self, service_name: &str, span: &Span, scope: Option<&InstrumentationScope>, dimensions: &[Dimension],
        sources: &[&Attributes],
    ) -> SeriesKey {
        self.buf.clear();
        self.components = 0;

        if !self.excluded.service_name {
            self.push(service_name);
        }
        if !self.excluded.span_name {
            self.push(span.name());
        }
        if !self.excluded.span_kind {
            self.push(span.kind().as_str());
        }
        if !self.excluded.status_code {
            self.push(span.status().as_str());
        }

        for dimension in dimensions {
            if let Some(value) = resolve_dimension(dimension, sources) {
                self.push(value);
            }
        }

        if let Some(scope) = scope {
            if !scope.name().is_empty() {
                self.push(scope.name());
                if !scope.version().is_empty() {
                    self.push(scope.version());
                }
            }
        }

        SeriesKey(self.buf.as_str().into())
    }

    /// Builds the attributes describing a series, mirroring the components of its key.
    pub fn build_attributes(
        &self, service_name: &str, span: &Span, scope: Option<&InstrumentationScope>, dimensions: &[Dimension],
        sources: &[&Attributes],
    ) -> Attributes {
        let mut attributes = Attributes::new();

        if !self.excluded.service_name {
            attributes.insert(SERVICE_NAME_KEY, service_name);
        }
        if !self.excluded.span_name {
            attributes.insert(SPAN_NAME_KEY, span.name());
        }
        if !self.excluded.span_kind {
            attributes.insert(SPAN_KIND_KEY, span.kind().as_str());
        }
        if !self.excluded.status_code {
            attributes.insert(STATUS_CODE_KEY, span.status().as_str());
        }

        for dimension in dimensions {
            if let Some(value) = resolve_dimension(dimension, sources) {
                attributes.insert(dimension.name.as_str(), value.to_attribute_value());
            }
        }

        if let Some(scope) = scope {
            if !scope.name().is_empty() {
                attributes.insert(INSTRUMENTATION_SCOPE_NAME_KEY, scope.name());
                if !scope.version().is_empty() {
                    attributes.insert(INSTRUMENTATION_SCOPE_VERSION_KEY, scope.version());
                }
            }
        }

        attributes
    }
}

/// Builds a metric name from the namespace and the metric's base name.
pub fn build_metric_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}
