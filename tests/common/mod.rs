#![allow(dead_code)]

use memorm::core::{DataType, Key, Tuple, TypeId, Value};
use memorm::model::{DomainBuilder, DomainModel};
use memorm::server_info::{
    DataTypeCollection, IdentityFeatures, QueryFeatures, ServerFeatures, ServerInfo,
};
use memorm::{Domain, DomainConfiguration, MemoryStorage, Result};
use std::sync::Arc;

/// Authors with their books and profiles, tags on books, and documents
/// pointing at authors through non-paired references.
pub fn library_model() -> Result<DomainModel> {
    let mut builder = DomainBuilder::new();
    builder.structure("Origin", |s| {
        s.field("Note", DataType::Text).reference("Curator", "Author");
    });
    builder.structure("Address", |s| {
        s.field("City", DataType::Text)
            .reference("Contact", "Author")
            .structure("Origin", "Origin");
    });
    builder.entity("Author", |t| {
        t.key("Id", DataType::Integer)
            .required_field("Name", DataType::Text)
            .version("Version")
            .reference("Profile", "Profile")
            .paired_entity_set("Books", "Book", "Author");
    });
    builder.entity("Profile", |t| {
        t.key("Id", DataType::Integer)
            .field("Bio", DataType::Text)
            .paired_reference("Owner", "Author", "Profile");
    });
    builder.entity("Book", |t| {
        t.key("Id", DataType::Integer)
            .field("Title", DataType::Text)
            .field("Year", DataType::Integer)
            .lazy_field("Summary", DataType::Text)
            .reference("Author", "Author")
            .paired_entity_set("Tags", "Tag", "Books")
            .index("IX_Title", &["Title"])
            .index("IX_Year", &["Year"]);
    });
    builder.derived_entity("Novel", "Book", |t| {
        t.field("Genre", DataType::Text);
    });
    builder.entity("Tag", |t| {
        t.key("Id", DataType::Integer)
            .field("Name", DataType::Text)
            .paired_entity_set("Books", "Book", "Tags");
    });
    builder.entity("Document", |t| {
        t.key("Id", DataType::Integer)
            .field("Title", DataType::Text)
            .reference("Owner", "Author")
            .structure("Address", "Address")
            .entity_set("Readers", "Author");
    });
    builder.build()
}

/// Backend with batches, paging, row numbers and identity columns.
pub fn full_server() -> Result<ServerInfo> {
    ServerInfo::builder("memory")
        .features(ServerFeatures::BATCHES)
        .query_features(
            QueryFeatures::PAGING
                | QueryFeatures::UNION
                | QueryFeatures::ROW_NUMBER
                | QueryFeatures::MULTICOLUMN_IN
                | QueryFeatures::FULL_BOOLEAN_EXPRESSIONS,
        )
        .identity(IdentityFeatures::AUTOINCREMENT)
        .data_types(DataTypeCollection::complete())
        .build()
}

/// Backend without batches, paging or identity columns.
pub fn minimal_server() -> Result<ServerInfo> {
    ServerInfo::builder("minimal")
        .data_types(DataTypeCollection::complete())
        .build()
}

pub struct Library {
    pub model: Arc<DomainModel>,
    pub storage: Arc<MemoryStorage>,
    pub domain: Domain,
}

impl Library {
    pub fn new() -> Result<Self> {
        Self::with(full_server()?, DomainConfiguration::default())
    }

    pub fn with(server: ServerInfo, config: DomainConfiguration) -> Result<Self> {
        let model = Arc::new(library_model()?);
        let storage = Arc::new(MemoryStorage::new(Arc::clone(&model), Arc::new(server))?);
        let domain = Domain::new(storage.clone(), config)?;
        Ok(Self { model, storage, domain })
    }

    pub fn type_id(&self, name: &str) -> TypeId {
        self.model.type_by_name(name).map(|t| t.id).unwrap()
    }

    pub fn key(&self, type_name: &str, id: i64) -> Key {
        self.model.key(self.type_id(type_name), [Value::Integer(id)]).unwrap()
    }

    /// Full hierarchy row of an entity with the given field values.
    pub fn row(&self, type_name: &str, id: i64, values: &[(&str, Value)]) -> Tuple {
        let type_id = self.type_id(type_name);
        let hierarchy = self.model.hierarchy(type_id);
        let mut row = Tuple::from_values(vec![Value::Null; hierarchy.column_count()]);
        row.set(hierarchy.key_columns[0], Value::Integer(id));
        row.set(hierarchy.type_id_column, Value::Integer(i64::from(type_id.0)));
        if let Some(version) = self.model.type_info(type_id).version_field {
            row.set(self.model.field(version).columns[0], Value::Integer(1));
        }
        for (name, value) in values {
            let field = self.model.field_of(type_id, name).unwrap();
            row.set(field.columns[0], value.clone());
        }
        row
    }

    pub fn seed(&self, type_name: &str, id: i64, values: &[(&str, Value)]) -> Key {
        let row = self.row(type_name, id, values);
        let hierarchy = self.model.hierarchy(self.type_id(type_name)).root;
        self.storage.seed(hierarchy, [row]).unwrap();
        self.key(type_name, id)
    }

    /// Link row of a set association between two stored entities.
    pub fn seed_link(&self, owner_type: &str, field: &str, owner: i64, item: i64) {
        let field = self.model.field_of(self.type_id(owner_type), field).unwrap();
        let association = self.model.association(field.association.unwrap());
        let aux = association.auxiliary.as_ref().unwrap();
        let link = self.model.hierarchy(aux.link_type);
        let mut row = Tuple::from_values(vec![Value::Null; link.column_count()]);
        row.set(aux.master_columns[0], Value::Integer(owner));
        row.set(aux.slave_columns[0], Value::Integer(item));
        row.set(link.type_id_column, Value::Integer(i64::from(aux.link_type.0)));
        self.storage.seed(aux.link_type, [row]).unwrap();
    }

    pub fn stored(&self, type_name: &str, id: i64) -> Option<Tuple> {
        let hierarchy = self.model.hierarchy(self.type_id(type_name)).root;
        self.storage
            .get_row(hierarchy, &Tuple::from_values([Value::Integer(id)]))
            .unwrap()
    }

    pub fn stored_value(&self, type_name: &str, id: i64, field: &str) -> Option<Value> {
        let column = self.model.field_of(self.type_id(type_name), field).unwrap().columns[0];
        self.stored(type_name, id).and_then(|row| row.get(column).cloned())
    }
}

/// Seeds one author with `books` books numbered from 1.
pub fn seed_author_with_books(library: &Library, author: i64, books: i64) -> Key {
    let key = library.seed("Author", author, &[("Name", Value::from(format!("Author {author}")))]);
    for i in 1..=books {
        let id = author * 100 + i;
        library.seed(
            "Book",
            id,
            &[
                ("Title", Value::from(format!("Book {id}"))),
                ("Year", Value::Integer(1990 + i)),
                ("Author", Value::Integer(author)),
            ],
        );
    }
    key
}
