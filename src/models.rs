//! Domain models
//!
//! The aggregate is [`CurriculumContent`]: one [`ContentMetadata`] record, its
//! learning-style [`ContentVariant`]s, a pointer to the default variant,
//! assessment links and analytics counters. Every persisted mutation leaves a
//! [`ContentChangeRecord`] in the ledger.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::permissions::ContentRef;
use crate::workflow::WorkflowStatus;

pub const MAX_ID_LEN: usize = 255;
pub const MAX_TITLE_LEN: usize = 500;

pub const VALID_CONTENT_TYPES: [&str; 14] = [
    "lesson", "activity", "assessment", "quiz", "worksheet", "video", "audio",
    "article", "exercise", "project", "discussion", "simulation", "reference", "resource",
];

pub const VALID_CONTENT_FORMATS: [&str; 8] = [
    "markdown", "html", "json", "text", "latex", "interactive", "video", "audio",
];

/// Difficulty tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 4] = [
        DifficultyLevel::Beginner,
        DifficultyLevel::Intermediate,
        DifficultyLevel::Advanced,
        DifficultyLevel::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Intermediate => "intermediate",
            DifficultyLevel::Advanced => "advanced",
            DifficultyLevel::Expert => "expert",
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLevel {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DifficultyLevel::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| CurriculumError::Validation(format!("unknown difficulty '{}'", s)))
    }
}

/// Learning-style tag of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LearningStyle {
    Visual,
    Auditory,
    ReadingWriting,
    Kinesthetic,
    Multimodal,
}

impl LearningStyle {
    pub const ALL: [LearningStyle; 5] = [
        LearningStyle::Visual,
        LearningStyle::Auditory,
        LearningStyle::ReadingWriting,
        LearningStyle::Kinesthetic,
        LearningStyle::Multimodal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "visual",
            LearningStyle::Auditory => "auditory",
            LearningStyle::ReadingWriting => "reading-writing",
            LearningStyle::Kinesthetic => "kinesthetic",
            LearningStyle::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningStyle {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LearningStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| CurriculumError::Validation(format!("unknown learning style '{}'", s)))
    }
}

/// Kind of mutation a change record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Status,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Status => "status",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeType::Create),
            "update" => Ok(ChangeType::Update),
            "status" => Ok(ChangeType::Status),
            "delete" => Ok(ChangeType::Delete),
            other => Err(CurriculumError::Validation(format!("unknown change type '{}'", other))),
        }
    }
}

/// One logical content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub key_stage: String,
    pub subject: String,
    pub region: String,
    pub topics: Vec<String>,
    pub learning_objectives: Vec<String>,
    pub difficulty: DifficultyLevel,
    pub content_type: String,
    pub content_format: String,
    pub estimated_duration_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub version: u32,
    pub status: WorkflowStatus,
    pub prerequisites: Vec<String>,
    pub related_content: Vec<String>,
}

impl ContentMetadata {
    /// Permission target for this item
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.id.clone(), self.subject.clone(), self.key_stage.clone())
    }
}

/// Descriptor of an interactive element attached to a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveElement {
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// One rendering of a content item's body for a learning style
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVariant {
    pub id: String,
    pub content_id: String,
    pub learning_style: LearningStyle,
    pub body: String,
    pub media_refs: Vec<String>,
    pub interactive: Option<InteractiveElement>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub version: u32,
}

/// Increment-only usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalytics {
    pub view_count: u64,
    pub completion_count: u64,
    pub rating_count: u64,
    pub rating_sum: u64,
}

impl ContentAnalytics {
    pub fn average_rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum as f64 / self.rating_count as f64)
        }
    }
}

/// The aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumContent {
    pub metadata: ContentMetadata,
    pub variants: Vec<ContentVariant>,
    pub default_variant_id: String,
    pub assessment_ids: Vec<String>,
    pub analytics: ContentAnalytics,
}

impl CurriculumContent {
    pub fn default_variant(&self) -> Option<&ContentVariant> {
        self.variants.iter().find(|v| v.id == self.default_variant_id)
    }

    pub fn variant(&self, style: LearningStyle) -> Option<&ContentVariant> {
        self.variants.iter().find(|v| v.learning_style == style)
    }

    /// Variant for a learner's preferred style, falling back to the default
    pub fn variant_for(&self, preferred: Option<LearningStyle>) -> Option<&ContentVariant> {
        preferred
            .and_then(|style| self.variant(style))
            .or_else(|| self.default_variant())
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangeRecord {
    pub id: String,
    pub content_id: String,
    /// Set when the record describes a variant rather than the metadata
    pub variant_id: Option<String>,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
    pub previous_version: u32,
    pub new_version: u32,
    pub description: String,
    pub change_type: ChangeType,
}

impl ContentChangeRecord {
    pub fn new(
        content_id: &str,
        variant_id: Option<&str>,
        changed_by: &UserId,
        changed_at: DateTime<Utc>,
        previous_version: u32,
        change_type: ChangeType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            changed_by: changed_by.clone(),
            changed_at,
            previous_version,
            new_version: previous_version + 1,
            description: description.into(),
            change_type,
        }
    }
}

/// Input for creating a content item
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentInput {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub key_stage: String,
    pub subject: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: DifficultyLevel,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_content_format")]
    pub content_format: String,
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub related_content: Vec<String>,
}

fn default_region() -> String { "england".to_string() }
fn default_difficulty() -> DifficultyLevel { DifficultyLevel::Beginner }
fn default_content_type() -> String { "lesson".to_string() }
fn default_content_format() -> String { "markdown".to_string() }

impl CreateContentInput {
    /// Minimal input with defaults for everything optional
    pub fn new(title: impl Into<String>, key_stage: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            key_stage: key_stage.into(),
            subject: subject.into(),
            region: default_region(),
            topics: Vec::new(),
            learning_objectives: Vec::new(),
            difficulty: default_difficulty(),
            content_type: default_content_type(),
            content_format: default_content_format(),
            estimated_duration_minutes: None,
            prerequisites: Vec::new(),
            related_content: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<(), CurriculumError> {
        if let Some(ref id) = self.id {
            validate_id("id", id)?;
        }
        validate_title(&self.title)?;
        validate_coordinate("keyStage", &self.key_stage)?;
        validate_coordinate("subject", &self.subject)?;
        validate_coordinate("region", &self.region)?;
        validate_content_type(&self.content_type)?;
        validate_content_format(&self.content_format)?;
        validate_tags("topics", &self.topics)?;
        if let Some(ref id) = self.id {
            validate_no_self_reference(id, "prerequisites", &self.prerequisites)?;
            validate_no_self_reference(id, "relatedContent", &self.related_content)?;
        }
        Ok(())
    }
}

/// Body and attachments for a new variant
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVariant {
    pub learning_style: LearningStyle,
    pub body: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
    #[serde(default)]
    pub interactive: Option<InteractiveElement>,
}

impl NewVariant {
    pub fn new(learning_style: LearningStyle, body: impl Into<String>) -> Self {
        Self {
            learning_style,
            body: body.into(),
            media_refs: Vec::new(),
            interactive: None,
        }
    }

    pub fn validate(&self) -> Result<(), CurriculumError> {
        if self.body.trim().is_empty() {
            return Err(CurriculumError::Validation("variant body is required".into()));
        }
        if let Some(ref interactive) = self.interactive {
            if interactive.kind.trim().is_empty() {
                return Err(CurriculumError::Validation("interactive element kind is required".into()));
            }
        }
        Ok(())
    }
}

/// Partial metadata update; absent fields are left untouched.
///
/// The optional fields take `Some(None)` to clear the stored value; in JSON
/// that is an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub key_stage: Option<String>,
    pub subject: Option<String>,
    pub region: Option<String>,
    pub topics: Option<Vec<String>>,
    pub learning_objectives: Option<Vec<String>>,
    pub difficulty: Option<DifficultyLevel>,
    pub content_type: Option<String>,
    pub content_format: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub estimated_duration_minutes: Option<Option<u32>>,
    pub prerequisites: Option<Vec<String>>,
    pub related_content: Option<Vec<String>>,
    /// When set, the update only applies if the stored version still matches
    pub expected_version: Option<u32>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.key_stage.is_none()
            && self.subject.is_none()
            && self.region.is_none()
            && self.topics.is_none()
            && self.learning_objectives.is_none()
            && self.difficulty.is_none()
            && self.content_type.is_none()
            && self.content_format.is_none()
            && self.estimated_duration_minutes.is_none()
            && self.prerequisites.is_none()
            && self.related_content.is_none()
    }

    pub fn validate(&self, content_id: &str) -> Result<(), CurriculumError> {
        if self.is_empty() {
            return Err(CurriculumError::Validation("update contains no fields".into()));
        }
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(ref ks) = self.key_stage {
            validate_coordinate("keyStage", ks)?;
        }
        if let Some(ref subject) = self.subject {
            validate_coordinate("subject", subject)?;
        }
        if let Some(ref region) = self.region {
            validate_coordinate("region", region)?;
        }
        if let Some(ref ct) = self.content_type {
            validate_content_type(ct)?;
        }
        if let Some(ref cf) = self.content_format {
            validate_content_format(cf)?;
        }
        if let Some(ref topics) = self.topics {
            validate_tags("topics", topics)?;
        }
        if let Some(ref prereqs) = self.prerequisites {
            validate_no_self_reference(content_id, "prerequisites", prereqs)?;
        }
        if let Some(ref related) = self.related_content {
            validate_no_self_reference(content_id, "relatedContent", related)?;
        }
        Ok(())
    }

    /// Merge supplied fields into `metadata`
    pub fn apply_to(&self, metadata: &mut ContentMetadata) {
        if let Some(ref v) = self.title {
            metadata.title = v.clone();
        }
        if let Some(ref v) = self.description {
            metadata.description = v.clone();
        }
        if let Some(ref v) = self.key_stage {
            metadata.key_stage = v.clone();
        }
        if let Some(ref v) = self.subject {
            metadata.subject = v.clone();
        }
        if let Some(ref v) = self.region {
            metadata.region = v.clone();
        }
        if let Some(ref v) = self.topics {
            metadata.topics = dedup(v);
        }
        if let Some(ref v) = self.learning_objectives {
            metadata.learning_objectives = v.clone();
        }
        if let Some(v) = self.difficulty {
            metadata.difficulty = v;
        }
        if let Some(ref v) = self.content_type {
            metadata.content_type = v.clone();
        }
        if let Some(ref v) = self.content_format {
            metadata.content_format = v.clone();
        }
        if let Some(v) = self.estimated_duration_minutes {
            metadata.estimated_duration_minutes = v;
        }
        if let Some(ref v) = self.prerequisites {
            metadata.prerequisites = dedup(v);
        }
        if let Some(ref v) = self.related_content {
            metadata.related_content = dedup(v);
        }
    }

    /// Names of the supplied fields, for the change description
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let checks: [(&'static str, bool); 13] = [
            ("title", self.title.is_some()),
            ("description", self.description.is_some()),
            ("keyStage", self.key_stage.is_some()),
            ("subject", self.subject.is_some()),
            ("region", self.region.is_some()),
            ("topics", self.topics.is_some()),
            ("learningObjectives", self.learning_objectives.is_some()),
            ("difficulty", self.difficulty.is_some()),
            ("contentType", self.content_type.is_some()),
            ("contentFormat", self.content_format.is_some()),
            ("estimatedDuration", self.estimated_duration_minutes.is_some()),
            ("prerequisites", self.prerequisites.is_some()),
            ("relatedContent", self.related_content.is_some()),
        ];
        for (name, set) in checks {
            if set {
                fields.push(name);
            }
        }
        fields
    }
}

/// A field that is present deserializes to `Some`, even when it is `null`
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Ordered teaching sequence of content items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumUnit {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub key_stage: String,
    pub content_ids: Vec<String>,
    pub learning_objectives: Vec<String>,
    pub prerequisite_unit_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub version: u32,
    pub status: WorkflowStatus,
}

impl CurriculumUnit {
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.id.clone(), self.subject.clone(), self.key_stage.clone())
    }
}

/// Input for creating a unit
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnitInput {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub subject: String,
    pub key_stage: String,
    #[serde(default)]
    pub content_ids: Vec<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub prerequisite_unit_ids: Vec<String>,
}

impl CreateUnitInput {
    pub fn new(title: impl Into<String>, key_stage: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            subject: subject.into(),
            key_stage: key_stage.into(),
            content_ids: Vec::new(),
            learning_objectives: Vec::new(),
            prerequisite_unit_ids: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), CurriculumError> {
        if let Some(ref id) = self.id {
            validate_id("id", id)?;
        }
        validate_title(&self.title)?;
        validate_coordinate("subject", &self.subject)?;
        validate_coordinate("keyStage", &self.key_stage)?;
        if has_duplicates(&self.content_ids) {
            return Err(CurriculumError::Validation("contentIds must be unique".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

pub(crate) fn validate_id(field: &str, id: &str) -> Result<(), CurriculumError> {
    if id.trim().is_empty() {
        return Err(CurriculumError::Validation(format!("{} is required", field)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CurriculumError::Validation(format!(
            "{} must be <= {} characters",
            field, MAX_ID_LEN
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<(), CurriculumError> {
    if title.trim().is_empty() {
        return Err(CurriculumError::Validation("title is required".into()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(CurriculumError::Validation(format!(
            "title must be <= {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_coordinate(field: &str, value: &str) -> Result<(), CurriculumError> {
    if value.trim().is_empty() {
        return Err(CurriculumError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_content_type(content_type: &str) -> Result<(), CurriculumError> {
    // Custom types are allowed with a prefix
    if VALID_CONTENT_TYPES.contains(&content_type) || content_type.starts_with("custom:") {
        return Ok(());
    }
    Err(CurriculumError::Validation(format!(
        "content_type '{}' is not valid. Valid types: {:?}",
        content_type, VALID_CONTENT_TYPES
    )))
}

fn validate_content_format(content_format: &str) -> Result<(), CurriculumError> {
    if VALID_CONTENT_FORMATS.contains(&content_format) {
        return Ok(());
    }
    Err(CurriculumError::Validation(format!(
        "content_format '{}' is not valid. Valid formats: {:?}",
        content_format, VALID_CONTENT_FORMATS
    )))
}

fn validate_tags(field: &str, tags: &[String]) -> Result<(), CurriculumError> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(CurriculumError::Validation(format!("{} must not contain empty tags", field)));
    }
    Ok(())
}

fn validate_no_self_reference(id: &str, field: &str, ids: &[String]) -> Result<(), CurriculumError> {
    if ids.iter().any(|other| other == id) {
        return Err(CurriculumError::Validation(format!("{} must not reference the item itself", field)));
    }
    Ok(())
}

pub(crate) fn has_duplicates(ids: &[String]) -> bool {
    let mut seen = HashSet::new();
    ids.iter().any(|id| !seen.insert(id.as_str()))
}

/// Remove repeated entries, keeping first occurrences in order
pub(crate) fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_style_tags() {
        assert_eq!(LearningStyle::ReadingWriting.as_str(), "reading-writing");
        assert_eq!(
            serde_json::to_string(&LearningStyle::ReadingWriting).unwrap(),
            "\"reading-writing\""
        );
        assert_eq!("kinesthetic".parse::<LearningStyle>().unwrap(), LearningStyle::Kinesthetic);
        assert!("tactile".parse::<LearningStyle>().is_err());
    }

    #[test]
    fn test_create_input_validation() {
        let input = CreateContentInput::new("Fractions", "KS2", "Mathematics");
        input.validate().unwrap();

        let mut bad_format = input.clone();
        bad_format.content_format = "docx".into();
        assert!(bad_format.validate().is_err());

        let mut custom_type = input.clone();
        custom_type.content_type = "custom:escape-room".into();
        custom_type.validate().unwrap();

        let mut self_prereq = input.with_id("fractions-1");
        self_prereq.prerequisites = vec!["fractions-1".into()];
        assert!(self_prereq.validate().is_err());
    }

    #[test]
    fn test_patch_merge_and_fields() {
        let now = Utc::now();
        let user = UserId::new("u").unwrap();
        let mut metadata = ContentMetadata {
            id: "c1".into(),
            title: "Old".into(),
            description: None,
            key_stage: "KS2".into(),
            subject: "Mathematics".into(),
            region: "england".into(),
            topics: vec!["fractions".into()],
            learning_objectives: vec![],
            difficulty: DifficultyLevel::Beginner,
            content_type: "lesson".into(),
            content_format: "markdown".into(),
            estimated_duration_minutes: Some(30),
            created_at: now,
            created_by: user.clone(),
            updated_at: now,
            updated_by: user,
            version: 1,
            status: WorkflowStatus::Draft,
            prerequisites: vec![],
            related_content: vec![],
        };
        let patch = ContentPatch {
            title: Some("New".into()),
            topics: Some(vec!["fractions".into(), "decimals".into(), "fractions".into()]),
            ..Default::default()
        };
        patch.validate("c1").unwrap();
        patch.apply_to(&mut metadata);

        assert_eq!(metadata.title, "New");
        assert_eq!(metadata.topics, vec!["fractions".to_string(), "decimals".to_string()]);
        assert_eq!(metadata.estimated_duration_minutes, Some(30));
        assert_eq!(patch.changed_fields(), vec!["title", "topics"]);
    }

    #[test]
    fn test_patch_null_clears_optional_fields() {
        let absent: ContentPatch = serde_json::from_str(r#"{"title": "New"}"#).unwrap();
        assert_eq!(absent.description, None);
        assert_eq!(absent.estimated_duration_minutes, None);

        let cleared: ContentPatch =
            serde_json::from_str(r#"{"description": null, "estimatedDurationMinutes": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
        assert_eq!(cleared.estimated_duration_minutes, Some(None));
        assert_eq!(cleared.changed_fields(), vec!["description", "estimatedDuration"]);

        let set: ContentPatch = serde_json::from_str(r#"{"description": "Halves and quarters"}"#).unwrap();
        assert_eq!(set.description, Some(Some("Halves and quarters".to_string())));

        let now = Utc::now();
        let user = UserId::new("u").unwrap();
        let mut metadata = ContentMetadata {
            id: "c1".into(),
            title: "Fractions".into(),
            description: Some("Halves".into()),
            key_stage: "KS2".into(),
            subject: "Mathematics".into(),
            region: "england".into(),
            topics: vec![],
            learning_objectives: vec![],
            difficulty: DifficultyLevel::Beginner,
            content_type: "lesson".into(),
            content_format: "markdown".into(),
            estimated_duration_minutes: Some(30),
            created_at: now,
            created_by: user.clone(),
            updated_at: now,
            updated_by: user,
            version: 1,
            status: WorkflowStatus::Draft,
            prerequisites: vec![],
            related_content: vec![],
        };
        cleared.validate("c1").unwrap();
        cleared.apply_to(&mut metadata);
        assert_eq!(metadata.description, None);
        assert_eq!(metadata.estimated_duration_minutes, None);
    }

    #[test]
    fn test_empty_patch_rejected() {
        let patch = ContentPatch {
            expected_version: Some(3),
            ..Default::default()
        };
        assert!(matches!(patch.validate("c1"), Err(CurriculumError::Validation(_))));
    }

    #[test]
    fn test_analytics_average() {
        let analytics = ContentAnalytics {
            rating_count: 4,
            rating_sum: 14,
            ..Default::default()
        };
        assert_eq!(analytics.average_rating(), Some(3.5));
        assert_eq!(ContentAnalytics::default().average_rating(), None);
    }

    #[test]
    fn test_change_record_versions() {
        let user = UserId::new("u").unwrap();
        let record = ContentChangeRecord::new("c1", None, &user, Utc::now(), 4, ChangeType::Update, "x");
        assert_eq!(record.previous_version, 4);
        assert_eq!(record.new_version, 5);
    }

    #[test]
    fn test_unit_input_rejects_duplicates() {
        let mut input = CreateUnitInput::new("Number", "KS2", "Mathematics");
        input.content_ids = vec!["a".into(), "b".into(), "a".into()];
        assert!(input.validate().is_err());
    }
}
