//! Suitability predicates

use hostfacts_api::FactLookup;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::debug;

/// Boolean test with no inputs
pub type Predicate = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

/// Boolean test over the looked-up value of a fact
pub type FactPredicate = Arc<dyn Fn(Option<&str>) -> anyhow::Result<bool> + Send + Sync>;

/// Values a fact-bound confine accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected(Vec<String>);

impl Expected {
    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for Expected {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for Expected {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl From<Vec<&str>> for Expected {
    fn from(values: Vec<&str>) -> Self {
        Self(values.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Expected {
    fn from(values: [&str; N]) -> Self {
        Self(values.into_iter().map(String::from).collect())
    }
}

/// What a confine tests
#[derive(Clone)]
pub enum ConfineTest {
    /// The named fact's value matches one of the expected values
    FactEquals { fact: String, expected: Expected },
    /// A predicate over the named fact's value
    FactPredicate { fact: String, predicate: FactPredicate },
    /// A standalone predicate
    Predicate(Predicate),
}

impl fmt::Debug for ConfineTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfineTest::FactEquals { fact, expected } => f
                .debug_struct("FactEquals")
                .field("fact", fact)
                .field("expected", expected)
                .finish(),
            ConfineTest::FactPredicate { fact, .. } => f
                .debug_struct("FactPredicate")
                .field("fact", fact)
                .finish_non_exhaustive(),
            ConfineTest::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// One suitability test restricting where a resolution applies
#[derive(Debug, Clone)]
pub struct Confine {
    test: ConfineTest,
}

impl Confine {
    /// Confine to hosts where `fact` has one of the `expected` values
    ///
    /// With no expected values the confine never holds.
    pub fn fact(fact: impl Into<String>, expected: impl Into<Expected>) -> Self {
        Self {
            test: ConfineTest::FactEquals {
                fact: fact.into(),
                expected: expected.into(),
            },
        }
    }

    /// Confine with a predicate that receives the value of `fact`
    pub fn fact_with<F>(fact: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(Option<&str>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            test: ConfineTest::FactPredicate {
                fact: fact.into(),
                predicate: Arc::new(predicate),
            },
        }
    }

    /// Confine with a standalone predicate
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            test: ConfineTest::Predicate(Arc::new(predicate)),
        }
    }

    pub fn test(&self) -> &ConfineTest {
        &self.test
    }

    /// Fact this confine depends on, if any
    pub fn fact_name(&self) -> Option<&str> {
        match &self.test {
            ConfineTest::FactEquals { fact, .. } | ConfineTest::FactPredicate { fact, .. } => {
                Some(fact)
            }
            ConfineTest::Predicate(_) => None,
        }
    }

    /// Evaluate the confine
    ///
    /// A predicate that errors or panics counts as false.
    pub fn is_true(&self, lookup: &dyn FactLookup) -> bool {
        match &self.test {
            ConfineTest::FactEquals { fact, expected } => {
                if expected.is_empty() {
                    return false;
                }
                let Some(actual) = lookup.value_of(fact) else {
                    return false;
                };
                expected.values().iter().any(|e| lookup.matches(&actual, e))
            }
            ConfineTest::FactPredicate { fact, predicate } => {
                let actual = lookup.value_of(fact);
                guarded(fact, || predicate(actual.as_deref()))
            }
            ConfineTest::Predicate(predicate) => guarded("<predicate>", || predicate()),
        }
    }
}

fn guarded(label: &str, f: impl FnOnce() -> anyhow::Result<bool>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let error = format!("{:#}", e);
            debug!(confine = %label, error = %error, "Confine failed, treating as false");
            false
        }
        Err(_) => {
            debug!(confine = %label, "Confine panicked, treating as false");
            false
        }
    }
}
