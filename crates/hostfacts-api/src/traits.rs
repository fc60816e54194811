//! Capability traits consumed by the resolution core

/// Name → value lookup for facts other than the one being resolved
///
/// Confines bound to a fact name call back into this to get the current
/// value of that fact. How values are compared against a confine's
/// expected values is also decided here.
pub trait FactLookup {
    /// Current value of `fact`, or `None` if it has no value
    fn value_of(&self, fact: &str) -> Option<String>;

    /// Whether a looked-up value satisfies an expected value
    ///
    /// Defaults to exact comparison.
    fn matches(&self, actual: &str, expected: &str) -> bool {
        actual == expected
    }
}

/// Comparison policy for a [`FactLookup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparison {
    #[default]
    Exact,
    IgnoreCase,
}

impl Comparison {
    pub fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            Comparison::Exact => actual == expected,
            Comparison::IgnoreCase => actual.eq_ignore_ascii_case(expected),
        }
    }
}

/// Destination for warnings emitted while resolving facts
pub trait DiagnosticSink: Send + Sync {
    /// Emit a warning
    fn warn(&self, message: &str);

    /// Emit a warning unless the same message was already emitted
    fn warn_once(&self, message: &str);
}
