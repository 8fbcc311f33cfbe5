mod common;

use common::{Library, seed_author_with_books};
use memorm::operations::{Operation, OperationKind, OperationLog};
use memorm::{FieldValue, Key, OrmError, Result, Value};

#[test]
fn test_capture_records_outermost_operations() -> Result<()> {
    let library = Library::new()?;
    let mut session = library.domain.open_session();
    let author_type = library.type_id("Author");

    let capture = session.begin_capture();
    let author = session.create(author_type)?;
    session.set_value(&author, "Name", "Tolkien")?;
    // no-op assignments are not recorded
    session.set_value(&author, "Name", "Tolkien")?;
    let log = session.end_capture(capture);

    assert_eq!(log.len(), 2);
    let create = &log.operations()[0];
    assert!(matches!(&create.kind, OperationKind::EntityCreate { key } if *key == author));
    assert_eq!(create.preceding.len(), 1);
    assert!(matches!(create.preceding[0].kind, OperationKind::KeyGenerate { .. }));
    assert!(matches!(
        &log.operations()[1].kind,
        OperationKind::EntityFieldSet { field, value, .. }
            if field == "Name" && *value == FieldValue::Value(Value::from("Tolkien"))
    ));

    // nothing is recorded once the capture ended
    assert!(!session.operations().is_registration_enabled());
    Ok(())
}

#[test]
fn test_log_survives_json_and_replays_with_new_keys() -> Result<()> {
    let library = Library::new()?;
    let mut source = library.domain.open_session();

    let capture = source.begin_capture();
    let author = source.create(library.type_id("Author"))?;
    source.set_value(&author, "Name", "Herbert")?;
    let book = source.create(library.type_id("Book"))?;
    source.set_value(&book, "Title", "Dune")?;
    source.set_reference(&book, "Author", Some(&author))?;
    let log = source.end_capture(capture);
    assert_eq!(log.len(), 5);

    let json = log.to_json()?;
    let restored = OperationLog::from_json(&json)?;
    assert_eq!(restored, log);

    let mut target = library.domain.open_session();
    // occupies the first temporary key of the target session
    let tag = target.create(library.type_id("Tag"))?;
    let context = restored.replay(&mut target)?;

    let replayed_author = context.try_remap_key(&author);
    let replayed_book = context.try_remap_key(&book);
    assert_ne!(replayed_author, author);
    assert_ne!(replayed_author, tag);
    assert_eq!(target.get_value(&replayed_author, "Name")?, Value::from("Herbert"));
    assert_eq!(target.get_reference(&replayed_book, "Author")?, Some(replayed_author.clone()));

    target.persist()?;
    assert_eq!(library.stored_value("Author", 1, "Name"), Some(Value::from("Herbert")));
    assert_eq!(library.stored_value("Book", 1, "Author"), Some(Value::Integer(1)));
    Ok(())
}

#[test]
fn test_replay_loads_existing_entities_in_one_round_trip() -> Result<()> {
    let library = Library::new()?;
    let first = library.seed("Author", 1, &[("Name", Value::from("A"))]);
    let second = library.seed("Author", 2, &[("Name", Value::from("B"))]);

    let mut source = library.domain.open_session();
    let capture = source.begin_capture();
    source.set_value(&first, "Name", "A2")?;
    source.set_value(&second, "Name", "B2")?;
    let log = source.end_capture(capture);

    let mut target = library.domain.open_session();
    library.storage.reset_counters();
    log.replay(&mut target)?;
    assert_eq!(library.storage.round_trip_count(), 1);

    target.persist()?;
    assert_eq!(library.stored_value("Author", 1, "Name"), Some(Value::from("A2")));
    assert_eq!(library.stored_value("Author", 2, "Name"), Some(Value::from("B2")));
    Ok(())
}

#[test]
fn test_initialize_is_one_composite_operation() -> Result<()> {
    let library = Library::new()?;
    let mut session = library.domain.open_session();

    let capture = session.begin_capture();
    let author = session.initialize(
        library.type_id("Author"),
        vec![("Name".to_string(), FieldValue::Value(Value::from("Vonnegut")))],
    )?;
    let log = session.end_capture(capture);

    assert_eq!(log.len(), 1);
    let operation = &log.operations()[0];
    assert!(operation.is_composite());
    assert!(matches!(operation.kind, OperationKind::EntityInitialize { .. }));
    assert_eq!(operation.preceding.len(), 1);
    assert_eq!(operation.following.len(), 2);
    assert_eq!(session.get_value(&author, "Name")?, Value::from("Vonnegut"));

    let mut target = library.domain.open_session();
    let context = log.replay(&mut target)?;
    let replayed = context.try_remap_key(&author);
    assert_eq!(target.get_value(&replayed, "Name")?, Value::from("Vonnegut"));
    Ok(())
}

#[test]
fn test_undo_reverts_changes_last_first() -> Result<()> {
    let library = Library::new()?;
    let author = library.seed("Author", 1, &[("Name", Value::from("Original"))]);
    let mut session = library.domain.open_session();

    let capture = session.begin_capture();
    session.set_value(&author, "Name", "Changed")?;
    let tag = session.create(library.type_id("Tag"))?;
    session.set_value(&tag, "Name", "temp")?;
    let log = session.end_capture(capture);

    log.undo(&mut session)?;
    assert_eq!(session.get_value(&author, "Name")?, Value::from("Original"));
    assert!(session.state(&tag).is_none());
    Ok(())
}

#[test]
fn test_undo_of_set_operations() -> Result<()> {
    let library = Library::new()?;
    let book = library.seed("Book", 1, &[("Title", Value::from("Dune"))]);
    let tag = library.seed("Tag", 1, &[("Name", Value::from("sf"))]);
    let mut session = library.domain.open_session();

    let capture = session.begin_capture();
    session.add_item(&book, "Tags", &tag)?;
    let log = session.end_capture(capture);
    assert_eq!(session.entity_set_items(&book, "Tags")?.len(), 1);

    log.undo(&mut session)?;
    assert!(session.entity_set_items(&book, "Tags")?.is_empty());
    assert!(session.entity_set_items(&tag, "Books")?.is_empty());
    Ok(())
}

#[test]
fn test_method_call_wraps_nested_operations() -> Result<()> {
    let library = Library::new()?;
    let author = library.seed("Author", 1, &[("Name", Value::from("Lem"))]);
    let mut session = library.domain.open_session();

    let capture = session.begin_capture();
    session.call_method("rename", vec![Value::from("Stanislaw")], |s| {
        s.set_value(&author, "Name", "Stanislaw")
    })?;
    let log = session.end_capture(capture);

    assert_eq!(log.len(), 1);
    let operation = &log.operations()[0];
    assert!(matches!(&operation.kind, OperationKind::MethodCall { name, .. } if name == "rename"));
    assert!(operation.preceding.is_empty());
    assert_eq!(operation.following.len(), 1);
    Ok(())
}

#[test]
fn test_failed_operation_is_not_recorded() -> Result<()> {
    let library = Library::new()?;
    let author = library.seed("Author", 1, &[("Name", Value::from("Lem"))]);
    let mut session = library.domain.open_session();

    let capture = session.begin_capture();
    let result: Result<()> = session.call_method("broken", Vec::new(), |s| {
        s.set_value(&author, "Name", "Half done")?;
        Err(OrmError::ExecutionError("broken".into()))
    });
    assert!(matches!(result, Err(OrmError::ExecutionError(_))));
    assert!(session.set_value(&author, "Name", Value::Null).is_err());
    let log = session.end_capture(capture);

    assert!(log.is_empty());
    assert_eq!(session.operations().depth(), 0);
    Ok(())
}

#[test]
fn test_validate_version() -> Result<()> {
    let library = Library::new()?;
    let author = library.seed("Author", 1, &[("Name", Value::from("Lem"))]);
    let mut session = library.domain.open_session();

    session.validate_version(&author, &Value::Integer(1))?;
    let result = session.validate_version(&author, &Value::Integer(2));
    assert!(matches!(result, Err(OrmError::VersionConflict { .. })));

    let tag = library.seed("Tag", 1, &[]);
    assert!(matches!(
        session.validate_version(&tag, &Value::Integer(1)),
        Err(OrmError::TypeMismatch(_))
    ));
    Ok(())
}

#[test]
fn test_system_operations_are_recorded_on_request() -> Result<()> {
    let library = Library::new()?;
    let author = seed_author_with_books(&library, 1, 0);
    let book = library.seed("Book", 5, &[("Title", Value::from("Loose"))]);

    let mut session = library.domain.open_session();
    let capture = session.begin_capture();
    session.add_item(&author, "Books", &book)?;
    let log = session.end_capture(capture);
    assert!(log.operations()[0].following.is_empty());

    let mut session = library.domain.open_session();
    session.operations_mut().set_system_registration(true);
    let capture = session.begin_capture();
    session.add_item(&author, "Books", &book)?;
    let log = session.end_capture(capture);

    let operation = &log.operations()[0];
    assert!(matches!(operation.kind, OperationKind::EntitySetItemAdd { .. }));
    assert_eq!(operation.following.len(), 1);
    assert!(matches!(
        &operation.following[0].kind,
        OperationKind::EntityFieldSet { field, .. } if field == "Author"
    ));
    Ok(())
}

#[test]
fn test_replay_rejects_keys_of_unknown_types() -> Result<()> {
    let library = Library::new()?;
    let log: OperationLog = [Operation::new(OperationKind::EntityFieldSet {
        key: Key::parse("0/999!:i:1")?,
        field: "Name".into(),
        value: FieldValue::Value(Value::from("ghost")),
    })]
    .into_iter()
    .collect();
    let restored = OperationLog::from_json(&log.to_json()?)?;

    let mut session = library.domain.open_session();
    assert!(matches!(restored.replay(&mut session), Err(OrmError::TypeNotFound(_))));
    assert!(matches!(restored.undo(&mut session), Ok(())));

    // a key whose hierarchy does not match its type
    let author = library.type_id("Author").0;
    let book = library.type_id("Book").0;
    let mismatched: OperationLog = [Operation::new(OperationKind::EntitySetClear {
        key: Key::parse(&format!("{book}/{author}!:i:1"))?,
        field: "Books".into(),
    })]
    .into_iter()
    .collect();
    assert!(matches!(mismatched.replay(&mut session), Err(OrmError::TypeMismatch(_))));
    assert!(session.states().is_empty());
    Ok(())
}
