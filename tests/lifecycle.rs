//! Integration tests for the content lifecycle
//!
//! Each test runs against a file-backed store in a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use curriculum_content::workflow::{self, TRANSITIONS};
use curriculum_content::{
    ChangeType, Config, ContentPatch, ContentRef, CreateContentInput, CurriculumError, GenerationError,
    LearningStyle, LockPolicy, NewVariant, PermissionLevel, PermissionScope, Role, Services,
    TemplateGenerator, UserId, VariantGenerator, WorkflowStatus,
};
use tempfile::TempDir;

/// Helper to open services over a temporary storage directory
fn create_services(policy: LockPolicy) -> (Services, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp_dir.path().to_path_buf(),
        lock_policy: policy,
        lock_timeout_ms: 2_000,
        ..Default::default()
    };
    let services = Services::open(&config).unwrap();
    (services, temp_dir)
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

/// Grant through a `root` administrator of the scope, seeding it on first use
fn grant(services: &Services, who: &str, role: Role, scope: PermissionScope) {
    let root = user("root");
    match services.permissions.bootstrap_admin(&root, scope.clone()) {
        Ok(_) | Err(CurriculumError::Conflict(_)) => {}
        Err(e) => panic!("bootstrap failed: {}", e),
    }
    services
        .permissions
        .grant_role(&user(who), role, scope, &root)
        .unwrap();
}

async fn create_fractions(services: &Services, author: &UserId) {
    services
        .content
        .create(
            CreateContentInput::new("Fractions", "KS2", "Mathematics").with_id("fractions"),
            NewVariant::new(LearningStyle::ReadingWriting, "A fraction is part of a whole."),
            author,
        )
        .await
        .unwrap();
}

/// draft -> review -> rejected("incomplete") -> draft leaves four records
#[tokio::test]
async fn test_review_rejection_round_trip() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    let approver = user("approver");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    grant(&services, "approver", Role::Approver, PermissionScope::KeyStage("KS2".into()));

    create_fractions(&services, &editor).await;

    services
        .workflow
        .transition("fractions", WorkflowStatus::Review, &editor, None)
        .await
        .unwrap();
    services
        .workflow
        .transition("fractions", WorkflowStatus::Rejected, &approver, Some("incomplete"))
        .await
        .unwrap();
    let back = services
        .workflow
        .transition("fractions", WorkflowStatus::Draft, &editor, None)
        .await
        .unwrap();

    assert_eq!(back.status, WorkflowStatus::Draft);
    assert_eq!(back.version, 4);

    let history = services.content.history("fractions").unwrap();
    let types: Vec<ChangeType> = history.iter().map(|r| r.change_type).collect();
    assert_eq!(
        types,
        vec![ChangeType::Create, ChangeType::Status, ChangeType::Status, ChangeType::Status]
    );
    assert!(history[2].description.contains("incomplete"));
    for pair in history.windows(2) {
        assert!(pair[0].changed_at <= pair[1].changed_at);
        assert_eq!(pair[1].previous_version, pair[0].new_version);
    }
}

/// Every pair outside the table is an invalid transition whatever the caller holds
#[test]
fn test_every_unlisted_pair_is_invalid() {
    for from in WorkflowStatus::ALL {
        for to in WorkflowStatus::ALL {
            if TRANSITIONS.iter().any(|r| r.from == from && r.to == to) {
                continue;
            }
            let levels = std::iter::once(None).chain(PermissionLevel::ALL.into_iter().map(Some));
            for level in levels {
                let result = workflow::check(from, to, level, Some("because"), "anyone", "content:x");
                assert!(
                    matches!(result, Err(CurriculumError::InvalidTransition { .. })),
                    "{} -> {} with {:?}",
                    from,
                    to,
                    level
                );
            }
        }
    }
}

#[tokio::test]
async fn test_admin_cannot_skip_review() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let admin = user("admin");
    grant(&services, "admin", Role::Admin, PermissionScope::KeyStage("KS2".into()));
    create_fractions(&services, &admin).await;

    let err = services
        .workflow
        .transition("fractions", WorkflowStatus::Published, &admin, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CurriculumError::InvalidTransition { .. }));
    assert_eq!(services.content.get_metadata("fractions").unwrap().version, 1);
}

#[tokio::test]
async fn test_create_read_round_trip() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::KeyStage("KS2".into()));

    let mut input = CreateContentInput::new("Column addition", "KS2", "Mathematics");
    input.topics = vec!["addition".into(), "place value".into(), "addition".into()];
    input.estimated_duration_minutes = Some(30);

    let created = services
        .content
        .create(input, NewVariant::new(LearningStyle::Visual, "Line up the digits."), &editor)
        .await
        .unwrap();

    let read = services.content.get(&created.metadata.id).unwrap();
    assert_eq!(read, created);
    assert_eq!(read.metadata.status, WorkflowStatus::Draft);
    assert_eq!(read.metadata.topics, vec!["addition", "place value"]);

    let default = read.default_variant().unwrap();
    assert_eq!(default.content_id, read.metadata.id);
    assert_eq!(default.learning_style, LearningStyle::Visual);
    assert_eq!(read.variant_for(Some(LearningStyle::Auditory)).unwrap().id, default.id);
}

#[tokio::test]
async fn test_create_needs_edit_at_target_scope() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let commenter = user("commenter");
    grant(&services, "commenter", Role::Commenter, PermissionScope::Subject("Mathematics".into()));

    let err = services
        .content
        .create(
            CreateContentInput::new("Fractions", "KS2", "Mathematics"),
            NewVariant::new(LearningStyle::Visual, "body"),
            &commenter,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CurriculumError::PermissionDenied { required: PermissionLevel::Edit, .. }));
    assert_eq!(services.db.stats().unwrap().content_count, 0);
}

/// A narrow lower grant never hides a broad higher one, in either arrangement
#[tokio::test]
async fn test_permission_precedence_both_orderings() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let target = ContentRef::new("x", "Mathematics", "KS2");

    // Broad higher, narrow lower
    grant(&services, "alice", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    grant(&services, "alice", Role::Viewer, PermissionScope::Content("x".into()));
    assert!(services.permissions.has_permission(&user("alice"), &target, PermissionLevel::Edit).unwrap());

    // Broad lower, narrow higher
    grant(&services, "bob", Role::Viewer, PermissionScope::Subject("Mathematics".into()));
    grant(&services, "bob", Role::Editor, PermissionScope::Content("x".into()));
    assert!(services.permissions.has_permission(&user("bob"), &target, PermissionLevel::Edit).unwrap());
    assert!(!services.permissions.has_permission(&user("bob"), &target, PermissionLevel::Approve).unwrap());

    // Same level at two scopes: the narrower grant decides
    grant(&services, "carol", Role::Editor, PermissionScope::KeyStage("KS2".into()));
    grant(&services, "carol", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    let resolved = services.permissions.resolve(&user("carol"), &target).unwrap().unwrap();
    assert_eq!(resolved.scope, PermissionScope::Subject("Mathematics".into()));

    // Nothing matching means no access
    assert!(!services
        .permissions
        .has_permission(&user("alice"), &ContentRef::new("y", "English", "KS1"), PermissionLevel::View)
        .unwrap());
}

#[tokio::test]
async fn test_concurrent_transitions_serialize() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    create_fractions(&services, &editor).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let workflow = Arc::clone(&services.workflow);
        let editor = editor.clone();
        handles.push(tokio::spawn(async move {
            workflow
                .transition("fractions", WorkflowStatus::Review, &editor, None)
                .await
        }));
    }

    let mut ok = 0;
    let mut invalid = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(CurriculumError::InvalidTransition { from, .. }) => {
                assert_eq!(from, WorkflowStatus::Review);
                invalid += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!((ok, invalid), (1, 1));
    assert_eq!(services.content.get_metadata("fractions").unwrap().version, 2);
}

/// Generator that holds the item's lock for a while
struct SlowGenerator;

#[async_trait]
impl VariantGenerator for SlowGenerator {
    async fn generate(
        &self,
        style: LearningStyle,
        _prior: Option<&str>,
        source: &str,
    ) -> Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(format!("{}: {}", style, source))
    }
}

#[tokio::test]
async fn test_reject_policy_fails_fast_while_adapting() {
    let (services, _temp) = create_services(LockPolicy::Reject);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    create_fractions(&services, &editor).await;

    let variants = Arc::clone(&services.variants);
    let adapting_user = editor.clone();
    let adapting = tokio::spawn(async move {
        let generator = SlowGenerator;
        variants
            .adapt("fractions", LearningStyle::Auditory, &generator, &adapting_user)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let patch = ContentPatch {
        title: Some("Fractions of amounts".into()),
        ..Default::default()
    };
    let err = services.content.update("fractions", patch, &editor).await.unwrap_err();
    assert!(matches!(err, CurriculumError::Conflict(_)));

    let variant = adapting.await.unwrap().unwrap();
    assert_eq!(variant.version, 1);
    assert_eq!(services.content.get_metadata("fractions").unwrap().title, "Fractions");
}

#[tokio::test]
async fn test_adaptation_keeps_metadata_version() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    create_fractions(&services, &editor).await;

    let first = services
        .variants
        .adapt("fractions", LearningStyle::Kinesthetic, &TemplateGenerator, &editor)
        .await
        .unwrap();
    let second = services
        .variants
        .adapt("fractions", LearningStyle::Kinesthetic, &TemplateGenerator, &editor)
        .await
        .unwrap();
    let third = services
        .variants
        .adapt("fractions", LearningStyle::Kinesthetic, &TemplateGenerator, &editor)
        .await
        .unwrap();

    assert_eq!(first.body, third.body);
    assert_eq!(third.version, first.version + 2);
    assert_eq!(second.id, first.id);

    let metadata = services.content.get_metadata("fractions").unwrap();
    assert_eq!(metadata.version, 1);
    assert_eq!(services.content.metadata_history("fractions").unwrap().len(), 1);

    let variant_records = services
        .content
        .history("fractions")
        .unwrap()
        .into_iter()
        .filter(|r| r.variant_id.as_deref() == Some(first.id.as_str()))
        .count();
    assert_eq!(variant_records, 3);
}

#[tokio::test]
async fn test_delete_rules_and_surviving_ledger() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let admin = user("admin");
    grant(&services, "admin", Role::Admin, PermissionScope::KeyStage("KS2".into()));
    create_fractions(&services, &admin).await;

    for to in [WorkflowStatus::Review, WorkflowStatus::Approved, WorkflowStatus::Published] {
        services.workflow.transition("fractions", to, &admin, None).await.unwrap();
    }

    let err = services.content.delete("fractions", &admin).await.unwrap_err();
    assert!(matches!(err, CurriculumError::InvalidState(_)));

    services
        .workflow
        .transition("fractions", WorkflowStatus::Archived, &admin, None)
        .await
        .unwrap();
    services.content.delete("fractions", &admin).await.unwrap();

    assert!(matches!(services.content.get("fractions"), Err(CurriculumError::NotFound(_))));

    let history = services.content.history("fractions").unwrap();
    assert_eq!(history.len(), 6);
    let last = history.last().unwrap();
    assert_eq!(last.change_type, ChangeType::Delete);
    assert_eq!((last.previous_version, last.new_version), (5, 6));
}

#[tokio::test]
async fn test_deleted_id_is_not_reused() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let admin = user("admin");
    grant(&services, "admin", Role::Admin, PermissionScope::KeyStage("KS2".into()));
    create_fractions(&services, &admin).await;
    let patch = ContentPatch {
        title: Some("Fractions of shapes".into()),
        ..Default::default()
    };
    services.content.update("fractions", patch, &admin).await.unwrap();
    services.content.delete("fractions", &admin).await.unwrap();

    let err = services
        .content
        .create(
            CreateContentInput::new("Fractions again", "KS2", "Mathematics").with_id("fractions"),
            NewVariant::new(LearningStyle::Visual, "Shade half of the circle."),
            &admin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CurriculumError::Conflict(_)));
    assert!(matches!(services.content.get("fractions"), Err(CurriculumError::NotFound(_))));

    // The ledger still reads as one unbroken chain ending in the delete
    let history = services.content.metadata_history("fractions").unwrap();
    let versions: Vec<(u32, u32)> = history
        .iter()
        .map(|r| (r.previous_version, r.new_version))
        .collect();
    assert_eq!(versions, vec![(0, 1), (1, 2), (2, 3)]);
    assert_eq!(history.last().unwrap().change_type, ChangeType::Delete);
}

#[tokio::test]
async fn test_failed_mutations_leave_no_lock_slots() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));

    for i in 0..200 {
        let err = services
            .workflow
            .transition(&format!("missing-{}", i), WorkflowStatus::Review, &editor, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::NotFound(_)));
    }
    assert!(services.locks.is_empty());

    create_fractions(&services, &editor).await;
    services
        .workflow
        .transition("fractions", WorkflowStatus::Review, &editor, None)
        .await
        .unwrap();
    assert!(services.locks.is_empty());
}

#[tokio::test]
async fn test_editor_cannot_delete() {
    let (services, _temp) = create_services(LockPolicy::Queue);
    let editor = user("editor");
    grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
    create_fractions(&services, &editor).await;

    let err = services.content.delete("fractions", &editor).await.unwrap_err();
    assert!(matches!(err, CurriculumError::PermissionDenied { required: PermissionLevel::Admin, .. }));
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    let editor = user("editor");

    {
        let services = Services::open(&config).unwrap();
        grant(&services, "editor", Role::Editor, PermissionScope::Subject("Mathematics".into()));
        create_fractions(&services, &editor).await;
    }

    let services = Services::open(&config).unwrap();
    let item = services.content.get("fractions").unwrap();
    assert_eq!(item.metadata.created_by, editor);
    assert_eq!(services.permissions.grants_for_user(&editor).unwrap().len(), 1);
}
