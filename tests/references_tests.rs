mod common;

use common::Library;
use memorm::{FieldValue, Key, OrmError, Result, Value};
use proptest::prelude::*;

fn seed_authors(library: &Library, count: i64) -> Vec<Key> {
    (1..=count)
        .map(|id| library.seed("Author", id, &[("Name", Value::from(format!("Author {id}")))]))
        .collect()
}

#[test]
fn test_reassigning_owner_moves_the_reference() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 2);
    let mut session = library.domain.open_session();
    let document = session.create(library.type_id("Document"))?;

    session.set_reference(&document, "Owner", Some(&authors[0]))?;
    assert_eq!(session.references().added_references_count(), 1);
    assert_eq!(session.find_references_to(&authors[0])?.len(), 1);

    session.set_reference(&document, "Owner", Some(&authors[1]))?;
    assert!(session.find_references_to(&authors[0])?.is_empty());
    let references = session.find_references_to(&authors[1])?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].referencing, document);

    session.set_reference(&document, "Owner", None)?;
    let registry = session.references();
    assert_eq!(registry.added_references_count(), 2);
    assert_eq!(registry.removed_references_count(), 2);
    assert_eq!(registry.live_references_count(), 0);
    Ok(())
}

#[test]
fn test_assigning_same_reference_is_not_counted() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 1);
    let mut session = library.domain.open_session();
    let document = session.create(library.type_id("Document"))?;

    session.set_reference(&document, "Owner", Some(&authors[0]))?;
    session.set_reference(&document, "Owner", Some(&authors[0]))?;
    assert_eq!(session.references().added_references_count(), 1);
    assert_eq!(session.references().removed_references_count(), 0);
    Ok(())
}

#[test]
fn test_reference_inside_structure_is_tracked() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 2);
    let mut session = library.domain.open_session();
    let document = session.create(library.type_id("Document"))?;

    session.set_field(
        &document,
        "Address",
        FieldValue::Structure(vec![
            ("City".to_string(), FieldValue::Value(Value::from("Krakow"))),
            ("Contact".to_string(), FieldValue::Reference(Some(authors[0].clone()))),
        ]),
    )?;
    assert_eq!(session.get_reference(&document, "Address.Contact")?, Some(authors[0].clone()));
    assert_eq!(session.find_references_to(&authors[0])?.len(), 1);

    session.set_reference(&document, "Address.Contact", Some(&authors[1]))?;
    assert!(session.find_references_to(&authors[0])?.is_empty());
    assert_eq!(session.find_references_to(&authors[1])?.len(), 1);

    let FieldValue::Structure(address) = session.get_field(&document, "Address")? else {
        panic!("structure expected");
    };
    assert!(address.contains(&("City".to_string(), FieldValue::Value(Value::from("Krakow")))));
    Ok(())
}

#[test]
fn test_reference_in_nested_structure_is_tracked() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 3);
    library.seed("Document", 1, &[("Address.Origin.Curator", Value::Integer(3))]);
    let mut session = library.domain.open_session();
    let document = session.create(library.type_id("Document"))?;

    session.set_field(
        &document,
        "Address",
        FieldValue::Structure(vec![(
            "Origin".to_string(),
            FieldValue::Structure(vec![(
                "Curator".to_string(),
                FieldValue::Reference(Some(authors[0].clone())),
            )]),
        )]),
    )?;
    assert_eq!(
        session.get_reference(&document, "Address.Origin.Curator")?,
        Some(authors[0].clone())
    );
    let references = session.find_references_to(&authors[0])?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].referencing, document);

    session.set_reference(&document, "Address.Origin.Curator", Some(&authors[1]))?;
    assert!(session.find_references_to(&authors[0])?.is_empty());
    assert_eq!(session.find_references_to(&authors[1])?.len(), 1);

    let stored = session.find_references_to(&authors[2])?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].referencing, library.key("Document", 1));
    Ok(())
}

#[test]
fn test_entity_set_items_are_tracked() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 2);
    let mut session = library.domain.open_session();
    let document = session.create(library.type_id("Document"))?;

    session.add_item(&document, "Readers", &authors[0])?;
    session.add_item(&document, "Readers", &authors[1])?;
    assert_eq!(session.references().live_references_count(), 2);

    session.remove_item(&document, "Readers", &authors[0])?;
    assert!(session.find_references_to(&authors[0])?.is_empty());
    assert_eq!(session.find_references_to(&authors[1])?.len(), 1);

    // a referenced author cannot be removed until the document lets go of it
    assert!(matches!(
        session.remove(&[authors[1].clone()]),
        Err(OrmError::ReferentialIntegrity(_))
    ));
    session.clear_set(&document, "Readers")?;
    session.remove(&[authors[1].clone()])?;
    Ok(())
}

#[test]
fn test_shared_item_is_tracked_per_owner() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 1);
    let mut session = library.domain.open_session();
    let first = session.create(library.type_id("Document"))?;
    let second = session.create(library.type_id("Document"))?;

    session.add_item(&first, "Readers", &authors[0])?;
    session.add_item(&second, "Readers", &authors[0])?;
    assert_eq!(session.find_references_to(&authors[0])?.len(), 2);

    session.remove_item(&first, "Readers", &authors[0])?;
    let references = session.find_references_to(&authors[0])?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].referencing, second);
    assert_eq!(references[0].referenced, authors[0]);
    assert_eq!(session.references().live_references_count(), 1);
    Ok(())
}

#[test]
fn test_paired_references_point_at_each_other() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 2);
    let profiles: Vec<Key> = (1..=2).map(|id| library.seed("Profile", id, &[])).collect();
    let mut session = library.domain.open_session();

    session.set_reference(&authors[0], "Profile", Some(&profiles[0]))?;
    assert_eq!(session.get_reference(&profiles[0], "Owner")?, Some(authors[0].clone()));

    // taking another profile releases the first one
    session.set_reference(&profiles[1], "Owner", Some(&authors[0]))?;
    assert_eq!(session.get_reference(&authors[0], "Profile")?, Some(profiles[1].clone()));
    assert_eq!(session.get_reference(&profiles[0], "Owner")?, None);

    // a taken profile leaves its previous owner
    session.set_reference(&authors[1], "Profile", Some(&profiles[1]))?;
    assert_eq!(session.get_reference(&profiles[1], "Owner")?, Some(authors[1].clone()));
    assert_eq!(session.get_reference(&authors[0], "Profile")?, None);
    assert_eq!(session.references().live_references_count(), 0);

    session.persist()?;
    assert_eq!(library.stored_value("Profile", 2, "Owner"), Some(Value::Integer(2)));
    assert_eq!(library.stored_value("Author", 2, "Profile"), Some(Value::Integer(2)));
    assert_eq!(library.stored_value("Author", 1, "Profile"), Some(Value::Null));
    assert_eq!(library.stored_value("Profile", 1, "Owner"), Some(Value::Null));

    session.remove(&[authors[1].clone()])?;
    assert_eq!(session.get_reference(&profiles[1], "Owner")?, None);
    session.persist()?;
    assert_eq!(library.stored_value("Profile", 2, "Owner"), Some(Value::Null));
    Ok(())
}

#[test]
fn test_stored_references_are_found() -> Result<()> {
    let library = Library::new()?;
    let authors = seed_authors(&library, 2);
    library.seed("Document", 1, &[("Title", Value::from("Deed")), ("Owner", Value::Integer(1))]);
    library.seed_link("Document", "Readers", 1, 2);
    let document = library.key("Document", 1);

    let mut session = library.domain.open_session();
    let owners = session.find_references_to(&authors[0])?;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].referencing, document);
    let readers = session.find_references_to(&authors[1])?;
    assert_eq!(readers.len(), 1);
    assert_eq!(readers[0].referencing, document);

    // local changes win over stored rows
    session.set_reference(&document, "Owner", None)?;
    assert!(session.find_references_to(&authors[0])?.is_empty());
    session.remove_item(&document, "Readers", &authors[1])?;
    assert!(session.find_references_to(&authors[1])?.is_empty());
    Ok(())
}

#[test]
fn test_references_follow_persisted_keys() -> Result<()> {
    let library = Library::new()?;
    let mut session = library.domain.open_session();
    let author = session.create(library.type_id("Author"))?;
    session.set_value(&author, "Name", "Temp")?;
    let document = session.create(library.type_id("Document"))?;
    session.set_reference(&document, "Owner", Some(&author))?;

    session.persist()?;
    let author = session.remapped_key(&author);
    let references = session.find_references_to(&author)?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].referencing, session.remapped_key(&document));
    assert_eq!(library.stored_value("Document", 1, "Owner"), Some(Value::Integer(1)));
    Ok(())
}

#[derive(Debug, Clone)]
enum Change {
    Owner(Option<usize>),
    Contact(Option<usize>),
    AddReader(usize),
    RemoveReader(usize),
}

fn change() -> impl Strategy<Value = Change> {
    prop_oneof![
        proptest::option::of(0..3usize).prop_map(Change::Owner),
        proptest::option::of(0..3usize).prop_map(Change::Contact),
        (0..3usize).prop_map(Change::AddReader),
        (0..3usize).prop_map(Change::RemoveReader),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_live_references_equal_added_minus_removed(
        changes in proptest::collection::vec(change(), 1..20)
    ) {
        let library = Library::new().unwrap();
        let authors = seed_authors(&library, 3);
        let mut session = library.domain.open_session();
        let document = session.create(library.type_id("Document")).unwrap();

        for change in changes {
            match change {
                Change::Owner(target) => {
                    session.set_reference(&document, "Owner", target.map(|i| &authors[i])).unwrap();
                }
                Change::Contact(target) => {
                    let target = target.map(|i| &authors[i]);
                    session.set_reference(&document, "Address.Contact", target).unwrap();
                }
                Change::AddReader(i) => {
                    session.add_item(&document, "Readers", &authors[i]).unwrap();
                }
                Change::RemoveReader(i) => {
                    session.remove_item(&document, "Readers", &authors[i]).unwrap();
                }
            }
            let registry = session.references();
            prop_assert_eq!(
                registry.live_references_count() as u64,
                registry.added_references_count() - registry.removed_references_count()
            );
        }
    }
}
