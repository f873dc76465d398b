mod common;

use common::{memory_portal, project_fields};
use faculty_portal::{CellEditor, CellState, ColumnType, EntityFamily, MemoryBackend, Portal, PortalError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn status_column_scenario() {
    let (backend, portal) = memory_portal();
    let projects = portal.resolver(EntityFamily::Project);
    let entity1 = projects.create_entity(project_fields("1", "Rover")).await.unwrap();
    let entity2 = projects.create_entity(project_fields("2", "Drone")).await.unwrap();

    let status = projects.create_column("Status", ColumnType::Text).await.unwrap();
    projects.set_attribute(entity1.id, status.id, "Ongoing").await.unwrap();

    let first = projects.resolve_attributes(entity1.id).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].column, status);
    assert_eq!(first[0].text(), "Ongoing");

    let second = projects.resolve_attributes(entity2.id).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].column, status);
    assert_eq!(second[0].text(), "");
    assert!(second[0].value.is_none());

    projects.delete_column(status.id).await.unwrap();
    assert!(projects.resolve_attributes(entity1.id).await.unwrap().is_empty());
    assert!(projects.values().values_for_column(status.id).await.unwrap().is_empty());
    assert_eq!(backend.row_count("project_column_values"), 0);
}

#[tokio::test]
async fn one_entry_per_column_even_without_values() {
    let (_, portal) = memory_portal();
    let internships = portal.resolver(EntityFamily::Internship);
    let names = ["Stipend", "Offer Letter", "Completed", "Joined On"];
    let types = [ColumnType::Number, ColumnType::Pdf, ColumnType::Boolean, ColumnType::Date];
    for (name, column_type) in names.iter().zip(types) {
        internships.create_column(name, column_type).await.unwrap();
    }
    let intern = internships
        .create_entity([("Student".to_string(), "Kiran".to_string())].into())
        .await
        .unwrap();

    let attributes = internships.resolve_attributes(intern.id).await.unwrap();
    let resolved: Vec<&str> = attributes.iter().map(|a| a.column.name.as_str()).collect();
    assert_eq!(resolved, names);
    assert!(attributes.iter().all(|a| a.text().is_empty()));
}

#[tokio::test]
async fn sequential_saves_on_one_cell_leave_last_value() {
    let (backend, portal) = memory_portal();
    let projects = portal.resolver(EntityFamily::Project);
    let entity = projects.create_entity(project_fields("3", "Glider")).await.unwrap();
    projects.create_column("Status", ColumnType::Text).await.unwrap();

    let attributes = projects.resolve_attributes(entity.id).await.unwrap();
    let mut cell = CellEditor::new(entity.id, &attributes[0]);
    for text in ["Draft", "Final"] {
        cell.begin_edit().unwrap();
        cell.input(text).unwrap();
        cell.save(&projects).await.unwrap();
        assert_eq!(cell.state(), &CellState::Viewing);
    }

    assert_eq!(backend.row_count("project_column_values"), 1);
    let attributes = projects.resolve_attributes(entity.id).await.unwrap();
    assert_eq!(attributes[0].text(), "Final");
    assert_eq!(cell.confirmed(), "Final");
}

#[tokio::test]
async fn writes_to_deleted_entity_are_not_found() {
    let (_, portal) = memory_portal();
    let projects = portal.resolver(EntityFamily::Project);
    let entity = projects.create_entity(project_fields("4", "Kite")).await.unwrap();
    let status = projects.create_column("Status", ColumnType::Text).await.unwrap();
    projects.set_attribute(entity.id, status.id, "Ongoing").await.unwrap();

    projects.delete_entity(entity.id).await.unwrap();
    let err = projects
        .set_attribute(entity.id, status.id, "Done")
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::NotFound { kind: "project", .. }));
    assert!(projects.values().values_for_entity(entity.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_project_title_is_a_validation_error() {
    let (_, portal) = memory_portal();
    let projects = portal.resolver(EntityFamily::Project);
    let err = projects.create_entity(project_fields("5", "")).await.unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    assert!(projects.entities().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_write_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir(&data).unwrap();
    let backend = Arc::new(MemoryBackend::with_snapshot(data.join("portal.json.gz")).unwrap());
    let portal = Portal::new(backend.clone(), Duration::from_secs(2), "attachments");
    let projects = portal.resolver(EntityFamily::Project);

    std::fs::remove_dir(&data).unwrap();
    let err = projects.create_column("Status", ColumnType::Text).await.unwrap_err();
    assert!(matches!(err, PortalError::Store { operation: "create_column", .. }));
    assert!(projects.registry().list_columns().await.unwrap().is_empty());

    std::fs::create_dir(&data).unwrap();
    let status = projects.create_column("Status", ColumnType::Text).await.unwrap();
    assert_eq!(projects.registry().list_columns().await.unwrap(), vec![status]);
}
