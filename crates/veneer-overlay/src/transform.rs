//! Content transforms and the replayable pipeline.
//!
//! A [`Transform`] is a pure `&str -> String` function. An entry's
//! [`TransformPipeline`] records every transform ever appended, in order;
//! a refresh folds the whole pipeline over fresh source text rather than
//! over the previous staged output.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, OverlayResult};
use crate::html;

type TransformFn = dyn Fn(&str) -> String + Send + Sync;

/// A named content transform. Cheap to clone.
#[derive(Clone)]
pub struct Transform {
    name: Arc<str>,
    f: Arc<TransformFn>,
}

impl Transform {
    pub fn new(name: impl Into<String>, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            f: Arc::new(f),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, content: &str) -> String {
        (self.f)(content)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

impl<F> From<F> for Transform
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Transform::new("closure", f)
    }
}

/// Append-only, ordered list of transforms.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    steps: Vec<Transform>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Transform) {
        self.steps.push(transform);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps, in application order.
    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|t| t.name().to_string()).collect()
    }

    /// Fold every step, in insertion order, over `content`.
    pub fn apply(&self, content: &str) -> String {
        self.steps
            .iter()
            .fold(content.to_string(), |acc, step| step.apply(&acc))
    }
}

/// Declarative description of a transform, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Rewrite the `href` of every `<base>` element.
    BaseHref { href: String },
    /// Regex replacement over the whole content (`$1` style captures).
    Replace { pattern: String, replacement: String },
    /// Plain substring replacement.
    Literal { from: String, to: String },
}

impl TransformSpec {
    pub fn build(&self) -> OverlayResult<Transform> {
        match self {
            TransformSpec::BaseHref { href } => Ok(html::base_href(href)),
            TransformSpec::Replace {
                pattern,
                replacement,
            } => {
                let regex = Regex::new(pattern)
                    .map_err(|e| OverlayError::invalid_transform(format!("{pattern:?}: {e}")))?;
                let replacement = replacement.clone();
                Ok(Transform::new(format!("replace:{pattern}"), move |content| {
                    regex.replace_all(content, replacement.as_str()).into_owned()
                }))
            }
            TransformSpec::Literal { from, to } => {
                if from.is_empty() {
                    return Err(OverlayError::invalid_transform(
                        "literal replacement needs a non-empty `from`",
                    ));
                }
                let (from, to) = (from.clone(), to.clone());
                Ok(Transform::new(format!("literal:{from}"), move |content| {
                    content.replace(&from, &to)
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_applies_in_order() {
        let mut pipeline = TransformPipeline::new();
        pipeline.push(Transform::new("f1", |s| format!("{s}1")));
        pipeline.push(Transform::new("f2", |s| format!("({s})")));
        pipeline.push(Transform::new("f3", |s| s.replace('x', "y")));

        assert_eq!(pipeline.apply("x"), "(y1)");
        assert_eq!(pipeline.names(), vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = TransformPipeline::new();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.apply("unchanged"), "unchanged");
    }

    #[test]
    fn test_closure_conversion() {
        let t: Transform = (|s: &str| s.to_uppercase()).into();
        assert_eq!(t.apply("abc"), "ABC");
        assert_eq!(t.name(), "closure");
    }

    #[test]
    fn test_replace_spec() {
        let t = TransformSpec::Replace {
            pattern: r"v(\d+)".into(),
            replacement: "version-$1".into(),
        }
        .build()
        .unwrap();
        assert_eq!(t.apply("v1 and v22"), "version-1 and version-22");
    }

    #[test]
    fn test_replace_spec_invalid_regex() {
        let err = TransformSpec::Replace {
            pattern: "(".into(),
            replacement: String::new(),
        }
        .build()
        .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidTransform(_)));
    }

    #[test]
    fn test_literal_spec() {
        let t = TransformSpec::Literal {
            from: "{{API}}".into(),
            to: "https://api.example.com".into(),
        }
        .build()
        .unwrap();
        assert_eq!(t.apply("fetch('{{API}}/x')"), "fetch('https://api.example.com/x')");

        assert!(
            TransformSpec::Literal {
                from: String::new(),
                to: "x".into()
            }
            .build()
            .is_err()
        );
    }

    #[test]
    fn test_spec_deserializes_tagged() {
        let spec: TransformSpec = toml::from_str(
            r#"
            kind = "base_href"
            href = "/app/"
            "#,
        )
        .unwrap();
        assert_eq!(
            spec,
            TransformSpec::BaseHref {
                href: "/app/".into()
            }
        );
    }
}
