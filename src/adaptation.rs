//! Variant generation
//!
//! The engine never produces learning-style text itself. A [`VariantGenerator`]
//! is injected into each adaptation call and receives the target style, the
//! previous body for that style (when one exists) and the default variant's body.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::LearningStyle;

/// Failure reported by a generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{style} generation failed: {message}")]
pub struct GenerationError {
    pub style: LearningStyle,
    pub message: String,
}

impl GenerationError {
    pub fn new(style: LearningStyle, message: impl Into<String>) -> Self {
        Self {
            style,
            message: message.into(),
        }
    }
}

/// Produces the body of a learning-style variant
#[async_trait]
pub trait VariantGenerator: Send + Sync {
    async fn generate(
        &self,
        style: LearningStyle,
        prior: Option<&str>,
        source: &str,
    ) -> Result<String, GenerationError>;
}

/// Deterministic framing of the source body per style.
///
/// The output depends only on the style and source, so regenerating an existing
/// variant yields the same body.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    fn frame(style: LearningStyle) -> (&'static str, &'static str) {
        match style {
            LearningStyle::Visual => (
                "[Visual] Study the diagram for each step.",
                "Sketch the key ideas as a labelled diagram.",
            ),
            LearningStyle::Auditory => (
                "[Auditory] Read each step aloud.",
                "Explain the key ideas to a partner in your own words.",
            ),
            LearningStyle::ReadingWriting => (
                "[Reading/Writing] Read the text carefully.",
                "Write a short summary of the key ideas.",
            ),
            LearningStyle::Kinesthetic => (
                "[Kinesthetic] Use objects or movement to model each step.",
                "Build or act out an example of the key ideas.",
            ),
            LearningStyle::Multimodal => (
                "[Multimodal] Combine pictures, speech and text as you work.",
                "Choose two ways to show what you have learned.",
            ),
        }
    }
}

#[async_trait]
impl VariantGenerator for TemplateGenerator {
    async fn generate(
        &self,
        style: LearningStyle,
        _prior: Option<&str>,
        source: &str,
    ) -> Result<String, GenerationError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(GenerationError::new(style, "source body is empty"));
        }
        let (intro, activity) = Self::frame(style);
        Ok(format!("{}\n\n{}\n\nActivity: {}", intro, source, activity))
    }
}

/// Adapts a plain closure into a generator
pub struct FnGenerator<F> {
    f: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(LearningStyle, Option<&str>, &str) -> Result<String, GenerationError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> VariantGenerator for FnGenerator<F>
where
    F: Fn(LearningStyle, Option<&str>, &str) -> Result<String, GenerationError> + Send + Sync,
{
    async fn generate(
        &self,
        style: LearningStyle,
        prior: Option<&str>,
        source: &str,
    ) -> Result<String, GenerationError> {
        (self.f)(style, prior, source)
    }
}
