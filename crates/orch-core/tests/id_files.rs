use orch_core::id_file::{id_file_name, read_id_file, write_id_file, IdFileRecord};
use orch_core::ids::{Identified, ItemType};

struct Stub {
    id: Option<String>,
}

impl Identified for Stub {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Experiment
    }

    fn name(&self) -> Option<&str> {
        Some("sweep/a")
    }
}

#[test]
fn written_id_file_reads_back() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("exp.id");
    let entity = Stub {
        id: Some("abc-123".into()),
    };
    write_id_file(&path, &entity, Some("LOCAL"), None).expect("write id file");

    let record = read_id_file(&path).expect("read id file");
    assert_eq!(record.id, "abc-123");
    assert_eq!(record.item_type, Some(ItemType::Experiment));
    assert_eq!(record.platform_block.as_deref(), Some("LOCAL"));
    assert_eq!(record.extra, None);
}

#[test]
fn bare_id_file_has_only_id() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("bare.id");
    std::fs::write(&path, "abc-123\n").expect("write");

    let record = read_id_file(&path).expect("read id file");
    assert_eq!(
        record,
        IdFileRecord {
            id: "abc-123".into(),
            item_type: None,
            platform_block: None,
            extra: None,
        }
    );
}

#[test]
fn extra_without_block_keeps_position() {
    let record = IdFileRecord {
        id: "x".into(),
        item_type: Some(ItemType::Simulation),
        platform_block: None,
        extra: Some("note".into()),
    };
    let line = record.render();
    assert_eq!(line, "x::Simulation::::note");
    assert_eq!(IdFileRecord::parse(&line).expect("parse"), record);
}

#[test]
fn malformed_id_files_are_rejected() {
    assert!(IdFileRecord::parse("").is_err());
    assert!(IdFileRecord::parse("a::b::c::d::e").is_err());
    assert!(IdFileRecord::parse("a::Gizmo").is_err());
    let unsaved = Stub { id: None };
    let dir = tempfile::tempdir().expect("tmp dir");
    assert!(write_id_file(&dir.path().join("x.id"), &unsaved, None, None).is_err());
}

#[test]
fn default_name_is_sanitized() {
    assert_eq!(id_file_name(ItemType::Experiment, "sweep/a"), "Experiment.sweep_a.id");
}

#[test]
fn rewriting_an_id_file_replaces_it_without_leftovers() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("exp.id");
    std::fs::write(&path, "old-id::Experiment::SOMEWHERE::with a long trailing note").expect("seed");
    let entity = Stub {
        id: Some("new".into()),
    };
    write_id_file(&path, &entity, None, None).expect("rewrite");

    assert_eq!(std::fs::read_to_string(&path).expect("read"), "new::Experiment");
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .expect("list")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["exp.id".to_string()]);
}
