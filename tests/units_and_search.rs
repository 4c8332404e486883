//! Integration tests for unit composition and metadata search

use std::time::Duration;

use chrono::Utc;
use curriculum_content::services::IntegrityWarning;
use curriculum_content::{
    Config, ContentPatch, CreateContentInput, CreateUnitInput, CurriculumError, DifficultyLevel,
    LearningStyle, NewVariant, PermissionScope, SearchFilters, Services, Sort, SortField,
    SortOrder, UserId, WorkflowStatus,
};
use tempfile::TempDir;

fn create_services() -> (Services, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    (Services::open(&config).unwrap(), temp_dir)
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Services with an admin over KS2 and KS3
fn admin_services() -> (Services, TempDir, UserId) {
    let (services, temp) = create_services();
    let admin = user("admin");
    for ks in ["KS2", "KS3"] {
        services
            .permissions
            .bootstrap_admin(&admin, PermissionScope::KeyStage(ks.into()))
            .unwrap();
    }
    (services, temp, admin)
}

async fn add_content(services: &Services, admin: &UserId, id: &str, title: &str, ks: &str, subject: &str) {
    services
        .content
        .create(
            CreateContentInput::new(title, ks, subject).with_id(id),
            NewVariant::new(LearningStyle::ReadingWriting, format!("{} notes", title)),
            admin,
        )
        .await
        .unwrap();
}

async fn unit_with_members(services: &Services, admin: &UserId, unit_id: &str, members: &[&str]) {
    for member in members {
        add_content(services, admin, member, member, "KS2", "Mathematics").await;
    }
    let mut input = CreateUnitInput::new("Number", "KS2", "Mathematics");
    input.id = Some(unit_id.into());
    input.content_ids = ids(members);
    services.units.create_unit(input, admin).await.unwrap();
}

// =============================================================================
// Units
// =============================================================================

#[tokio::test]
async fn test_reorder_requires_permutation() {
    let (services, _temp, admin) = admin_services();
    unit_with_members(&services, &admin, "number", &["c1", "c2", "c3"]).await;

    let reordered = services
        .units
        .reorder("number", &ids(&["c2", "c1", "c3"]), &admin)
        .await
        .unwrap();
    assert_eq!(reordered.content_ids, ids(&["c2", "c1", "c3"]));
    assert_eq!(reordered.version, 2);

    let err = services
        .units
        .reorder("number", &ids(&["c1", "c2"]), &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, CurriculumError::InvalidOrdering(_)));

    let unit = services.units.get_unit("number").unwrap();
    assert_eq!(unit.content_ids, ids(&["c2", "c1", "c3"]));
    assert_eq!(unit.version, 2);
}

#[tokio::test]
async fn test_add_and_remove_members() {
    let (services, _temp, admin) = admin_services();
    unit_with_members(&services, &admin, "number", &["c1", "c2", "c3"]).await;
    add_content(&services, &admin, "c4", "Decimals", "KS2", "Mathematics").await;

    let unit = services.units.add_content("number", "c4", &admin).await.unwrap();
    assert_eq!(unit.content_ids, ids(&["c1", "c2", "c3", "c4"]));

    assert!(matches!(
        services.units.add_content("number", "c4", &admin).await,
        Err(CurriculumError::Validation(_))
    ));
    assert!(matches!(
        services.units.add_content("number", "nowhere", &admin).await,
        Err(CurriculumError::NotFound(_))
    ));

    let unit = services.units.remove_content("number", "c2", &admin).await.unwrap();
    assert_eq!(unit.content_ids, ids(&["c1", "c3", "c4"]));
    assert_eq!(unit.version, 3);

    assert!(matches!(
        services.units.remove_content("number", "c2", &admin).await,
        Err(CurriculumError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unit_creation_checks_members() {
    let (services, _temp, admin) = admin_services();
    let mut input = CreateUnitInput::new("Number", "KS2", "Mathematics");
    input.content_ids = ids(&["ghost"]);
    assert!(matches!(
        services.units.create_unit(input, &admin).await,
        Err(CurriculumError::NotFound(_))
    ));

    let mut input = CreateUnitInput::new("Number", "KS2", "Mathematics");
    input.content_ids = ids(&["a", "a"]);
    assert!(matches!(
        services.units.create_unit(input, &admin).await,
        Err(CurriculumError::Validation(_))
    ));
}

#[tokio::test]
async fn test_prerequisites_stay_acyclic() {
    let (services, _temp, admin) = admin_services();
    for (id, prereqs) in [("a", vec![]), ("b", ids(&["a"])), ("c", ids(&["b"]))] {
        let mut input = CreateUnitInput::new(id, "KS2", "Mathematics");
        input.id = Some(id.into());
        input.prerequisite_unit_ids = prereqs;
        services.units.create_unit(input, &admin).await.unwrap();
    }

    assert!(matches!(
        services.units.set_prerequisites("a", &ids(&["c"]), &admin).await,
        Err(CurriculumError::Validation(_))
    ));
    assert!(matches!(
        services.units.set_prerequisites("a", &ids(&["a"]), &admin).await,
        Err(CurriculumError::Validation(_))
    ));
    assert!(matches!(
        services.units.set_prerequisites("a", &ids(&["zzz"]), &admin).await,
        Err(CurriculumError::NotFound(_))
    ));

    let c = services.units.set_prerequisites("c", &ids(&["a", "b"]), &admin).await.unwrap();
    assert_eq!(c.prerequisite_unit_ids, ids(&["a", "b"]));
    assert!(services.units.get_unit("a").unwrap().prerequisite_unit_ids.is_empty());
}

#[tokio::test]
async fn test_published_unit_reports_member_warnings() {
    let (services, _temp, admin) = admin_services();
    unit_with_members(&services, &admin, "number", &["c1", "c2"]).await;
    services.content.delete("c2", &admin).await.unwrap();

    let mut outcome = None;
    for to in [WorkflowStatus::Review, WorkflowStatus::Approved, WorkflowStatus::Published] {
        outcome = Some(services.units.transition_unit("number", to, &admin, None).await.unwrap());
    }
    let outcome = outcome.unwrap();

    assert_eq!(outcome.unit.status, WorkflowStatus::Published);
    assert_eq!(outcome.unit.version, 4);
    assert_eq!(
        outcome.warnings,
        vec![
            IntegrityWarning::UnpublishedContent {
                content_id: "c1".into(),
                status: WorkflowStatus::Draft,
            },
            IntegrityWarning::MissingContent {
                content_id: "c2".into(),
            },
        ]
    );

    // Publishing a unit never moves its members
    assert_eq!(services.content.get_metadata("c1").unwrap().status, WorkflowStatus::Draft);

    assert!(matches!(
        services.units.delete_unit("number", &admin).await,
        Err(CurriculumError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_unit_rejection_needs_comment() {
    let (services, _temp, admin) = admin_services();
    unit_with_members(&services, &admin, "number", &["c1"]).await;
    services
        .units
        .transition_unit("number", WorkflowStatus::Review, &admin, None)
        .await
        .unwrap();

    assert!(matches!(
        services.units.transition_unit("number", WorkflowStatus::Rejected, &admin, None).await,
        Err(CurriculumError::MissingComment { .. })
    ));
    assert!(matches!(
        services.units.transition_unit("number", WorkflowStatus::Archived, &admin, None).await,
        Err(CurriculumError::InvalidTransition { .. })
    ));

    let outcome = services
        .units
        .transition_unit("number", WorkflowStatus::Rejected, &admin, Some("needs a warm-up"))
        .await
        .unwrap();
    assert!(outcome.warnings.is_empty());

    services
        .units
        .transition_unit("number", WorkflowStatus::Draft, &admin, None)
        .await
        .unwrap();
    services.units.delete_unit("number", &admin).await.unwrap();
    assert!(matches!(services.units.get_unit("number"), Err(CurriculumError::NotFound(_))));
}

// =============================================================================
// Search
// =============================================================================

async fn search_fixture() -> (Services, TempDir, UserId) {
    let (services, temp, admin) = admin_services();
    let items = [
        ("m1", "Addition", "KS2", "Mathematics"),
        ("m2", "Fractions", "KS2", "Mathematics"),
        ("m3", "Multiplication", "KS2", "Mathematics"),
        ("e1", "Poetry", "KS2", "English"),
        ("e2", "Spelling", "KS2", "English"),
        ("m4", "Algebra", "KS3", "Mathematics"),
        ("m5", "Ratio", "KS3", "Mathematics"),
        ("s1", "Plants", "KS2", "Science"),
    ];
    for (id, title, ks, subject) in items {
        add_content(&services, &admin, id, title, ks, subject).await;
    }
    (services, temp, admin)
}

fn by_title() -> Option<Sort> {
    Some(Sort {
        field: SortField::Title,
        order: SortOrder::Asc,
    })
}

#[tokio::test]
async fn test_key_stage_and_subject_filter_paginates() {
    let (services, _temp, _admin) = search_fixture().await;
    let filters = SearchFilters {
        key_stages: ids(&["KS2"]),
        subjects: ids(&["Mathematics", "English"]),
        sort: by_title(),
        ..Default::default()
    };

    let first = services.search.search(&filters, 1, Some(2)).unwrap();
    assert_eq!(first.total_results, 5);
    assert_eq!(first.page_size, 2);
    let titles: Vec<&str> = first.results.iter().map(|m| m.title.as_str()).collect();
    assert_eq!(titles, vec!["Addition", "Fractions"]);

    let last = services.search.search(&filters, 3, Some(2)).unwrap();
    assert_eq!(last.total_results, 5);
    assert_eq!(last.results.len(), 1);
    assert_eq!(last.results[0].title, "Spelling");

    let beyond = services.search.search(&filters, 4, Some(2)).unwrap();
    assert!(beyond.results.is_empty());
}

#[tokio::test]
async fn test_keyword_matches_title_and_topics_case_insensitively() {
    let (services, _temp, admin) = search_fixture().await;
    services
        .content
        .update(
            "s1",
            ContentPatch {
                topics: Some(ids(&["photosynthesis", "leaves"])),
                ..Default::default()
            },
            &admin,
        )
        .await
        .unwrap();

    let by_topic = SearchFilters {
        keyword: Some("PHOTO".into()),
        ..Default::default()
    };
    let found = services.search.search(&by_topic, 1, None).unwrap();
    assert_eq!(found.total_results, 1);
    assert_eq!(found.results[0].id, "s1");
    assert_eq!(found.results[0].topics, ids(&["photosynthesis", "leaves"]));

    let by_title = SearchFilters {
        keyword: Some("fraction".into()),
        ..Default::default()
    };
    assert_eq!(services.search.search(&by_title, 1, None).unwrap().total_results, 1);

    let wildcard = SearchFilters {
        keyword: Some("%".into()),
        ..Default::default()
    };
    assert_eq!(services.search.search(&wildcard, 1, None).unwrap().total_results, 0);
}

#[tokio::test]
async fn test_keyword_folds_non_ascii_case() {
    let (services, _temp, admin) = search_fixture().await;
    add_content(&services, &admin, "g1", "Éire geography", "KS2", "Geography").await;
    services
        .content
        .update(
            "g1",
            ContentPatch {
                topics: Some(ids(&["ÖKOSYSTEM"])),
                ..Default::default()
            },
            &admin,
        )
        .await
        .unwrap();

    for keyword in ["Éire", "éire", "ÉIRE", "GEOGRAPHY", "ökosystem"] {
        let filters = SearchFilters {
            keyword: Some(keyword.into()),
            ..Default::default()
        };
        let found = services.search.search(&filters, 1, None).unwrap();
        assert_eq!(found.total_results, 1, "keyword {}", keyword);
        assert_eq!(found.results[0].id, "g1");
    }
}

#[tokio::test]
async fn test_status_difficulty_and_date_filters() {
    let (services, _temp, admin) = search_fixture().await;

    services
        .workflow
        .transition("e1", WorkflowStatus::Review, &admin, None)
        .await
        .unwrap();
    let in_review = SearchFilters {
        statuses: vec![WorkflowStatus::Review],
        ..Default::default()
    };
    let found = services.search.search(&in_review, 1, None).unwrap();
    assert_eq!(found.total_results, 1);
    assert_eq!(found.results[0].id, "e1");

    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;
    services
        .content
        .update(
            "m4",
            ContentPatch {
                difficulty: Some(DifficultyLevel::Advanced),
                ..Default::default()
            },
            &admin,
        )
        .await
        .unwrap();

    let advanced = SearchFilters {
        difficulties: vec![DifficultyLevel::Advanced],
        ..Default::default()
    };
    assert_eq!(services.search.search(&advanced, 1, None).unwrap().total_results, 1);

    let recent = SearchFilters {
        updated_from: Some(cutoff),
        ..Default::default()
    };
    let found = services.search.search(&recent, 1, None).unwrap();
    assert_eq!(found.total_results, 1);
    assert_eq!(found.results[0].id, "m4");

    // Most recently updated first by default
    let all = services.search.search(&SearchFilters::default(), 1, Some(100)).unwrap();
    assert_eq!(all.total_results, 8);
    assert_eq!(all.results[0].id, "m4");
}
