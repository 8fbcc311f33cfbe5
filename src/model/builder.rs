use super::{
    AssociationInfo, AuxiliaryInfo, ColumnInfo, DomainModel, FieldInfo, FieldKind, HierarchyInfo,
    IndexAttributes, IndexInfo, Multiplicity, TypeInfo, TypeKind,
};
use crate::core::{AssociationId, DataType, FieldId, IndexId, OrmError, Result, TypeId};
use crate::query::Expr;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone)]
enum FieldDefKind {
    Key(DataType),
    Primitive {
        data_type: DataType,
        nullable: bool,
        lazy: bool,
    },
    Version,
    Reference {
        target: String,
        paired_to: Option<String>,
    },
    Structure {
        structure: String,
    },
    EntitySet {
        item: String,
        paired_to: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    kind: FieldDefKind,
}

#[derive(Debug, Clone)]
struct IndexDef {
    name: String,
    fields: Vec<String>,
    unique: bool,
    filter: Option<Expr>,
}

/// Definition of a persistent entity type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    name: String,
    parent: Option<String>,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
}

impl TypeDef {
    fn new(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    fn push(&mut self, name: &str, kind: FieldDefKind) -> &mut Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            kind,
        });
        self
    }

    /// Key field; only hierarchy roots declare keys
    pub fn key(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(name, FieldDefKind::Key(data_type))
    }

    /// Nullable primitive field
    pub fn field(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Primitive {
                data_type,
                nullable: true,
                lazy: false,
            },
        )
    }

    pub fn required_field(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Primitive {
                data_type,
                nullable: false,
                lazy: false,
            },
        )
    }

    /// Primitive field excluded from default loading
    pub fn lazy_field(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Primitive {
                data_type,
                nullable: true,
                lazy: true,
            },
        )
    }

    /// Integer version field, bumped on every persisted modification
    pub fn version(&mut self, name: &str) -> &mut Self {
        self.push(name, FieldDefKind::Version)
    }

    pub fn reference(&mut self, name: &str, target: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Reference {
                target: target.to_string(),
                paired_to: None,
            },
        )
    }

    /// Reference paired with a reference field of the target type; the two
    /// sides always point at each other.
    pub fn paired_reference(&mut self, name: &str, target: &str, paired_to: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Reference {
                target: target.to_string(),
                paired_to: Some(paired_to.to_string()),
            },
        )
    }

    pub fn structure(&mut self, name: &str, structure: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Structure {
                structure: structure.to_string(),
            },
        )
    }

    /// Entity set stored in a generated link table
    pub fn entity_set(&mut self, name: &str, item: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::EntitySet {
                item: item.to_string(),
                paired_to: None,
            },
        )
    }

    /// Entity set paired with a reference (or set) field of the item type
    pub fn paired_entity_set(&mut self, name: &str, item: &str, paired_to: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::EntitySet {
                item: item.to_string(),
                paired_to: Some(paired_to.to_string()),
            },
        )
    }

    pub fn index(&mut self, name: &str, fields: &[&str]) -> &mut Self {
        self.add_index(name, fields, false, None)
    }

    pub fn unique_index(&mut self, name: &str, fields: &[&str]) -> &mut Self {
        self.add_index(name, fields, true, None)
    }

    /// Partial index; `filter` is written with field references
    pub fn filtered_index(&mut self, name: &str, fields: &[&str], filter: Expr) -> &mut Self {
        self.add_index(name, fields, false, Some(filter))
    }

    fn add_index(
        &mut self,
        name: &str,
        fields: &[&str],
        unique: bool,
        filter: Option<Expr>,
    ) -> &mut Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
            filter,
        });
        self
    }
}

/// Definition of a structure (value object) type.
#[derive(Debug, Clone)]
pub struct StructureDef {
    name: String,
    fields: Vec<FieldDef>,
}

impl StructureDef {
    fn push(&mut self, name: &str, kind: FieldDefKind) -> &mut Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn field(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Primitive {
                data_type,
                nullable: true,
                lazy: false,
            },
        )
    }

    pub fn required_field(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Primitive {
                data_type,
                nullable: false,
                lazy: false,
            },
        )
    }

    pub fn reference(&mut self, name: &str, target: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Reference {
                target: target.to_string(),
                paired_to: None,
            },
        )
    }

    pub fn structure(&mut self, name: &str, structure: &str) -> &mut Self {
        self.push(
            name,
            FieldDefKind::Structure {
                structure: structure.to_string(),
            },
        )
    }
}

/// Code-first schema declaration.
///
/// ```
/// use memorm::core::DataType;
/// use memorm::model::DomainBuilder;
///
/// let mut builder = DomainBuilder::new();
/// builder.entity("Author", |t| {
///     t.key("Id", DataType::Integer).field("Name", DataType::Text);
/// });
/// builder.entity("Book", |t| {
///     t.key("Id", DataType::Integer)
///         .field("Title", DataType::Text)
///         .reference("Author", "Author")
///         .index("IX_Title", &["Title"]);
/// });
/// let model = builder.build().unwrap();
/// assert!(model.type_by_name("Book").is_ok());
/// ```
#[derive(Debug, Default)]
pub struct DomainBuilder {
    entities: Vec<TypeDef>,
    structures: Vec<StructureDef>,
}

enum PendingAssociation {
    Reference {
        field: FieldId,
        owner: TypeId,
        target: String,
        paired_to: Option<String>,
    },
    Set {
        field: FieldId,
        owner: TypeId,
        item: String,
        paired_to: Option<String>,
    },
}

#[derive(Default)]
struct Assembler {
    types: Vec<TypeInfo>,
    fields: Vec<FieldInfo>,
    associations: Vec<AssociationInfo>,
    indexes: Vec<IndexInfo>,
    hierarchies: HashMap<TypeId, HierarchyInfo>,
    type_names: HashMap<String, TypeId>,
    pending: Vec<PendingAssociation>,
    field_by_id_assoc: HashMap<FieldId, AssociationId>,
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&mut self, name: &str, define: impl FnOnce(&mut TypeDef)) -> &mut Self {
        let mut def = TypeDef::new(name, None);
        define(&mut def);
        self.entities.push(def);
        self
    }

    pub fn derived_entity(
        &mut self,
        name: &str,
        parent: &str,
        define: impl FnOnce(&mut TypeDef),
    ) -> &mut Self {
        let mut def = TypeDef::new(name, Some(parent));
        define(&mut def);
        self.entities.push(def);
        self
    }

    pub fn structure(&mut self, name: &str, define: impl FnOnce(&mut StructureDef)) -> &mut Self {
        let mut def = StructureDef {
            name: name.to_string(),
            fields: Vec::new(),
        };
        define(&mut def);
        self.structures.push(def);
        self
    }

    pub fn build(&self) -> Result<DomainModel> {
        let mut asm = Assembler::default();

        for def in &self.structures {
            asm.declare_type(&def.name, TypeKind::Structure)?;
        }
        for def in &self.entities {
            asm.declare_type(&def.name, TypeKind::Entity)?;
        }

        let order = self.entity_order()?;
        self.resolve_parents(&mut asm, &order)?;

        for &entity in &order {
            self.layout_entity(&mut asm, entity)?;
        }
        self.resolve_associations(&mut asm)?;
        for &entity in &order {
            self.build_indexes(&mut asm, entity)?;
        }

        debug!(
            types = asm.types.len(),
            fields = asm.fields.len(),
            associations = asm.associations.len(),
            indexes = asm.indexes.len(),
            "domain model built"
        );

        Ok(DomainModel {
            types: asm.types,
            fields: asm.fields,
            associations: asm.associations,
            indexes: asm.indexes,
            hierarchies: asm.hierarchies,
            type_names: asm.type_names,
        })
    }

    fn entity_def(&self, name: &str) -> Option<&TypeDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    fn structure_def(&self, name: &str) -> Option<&StructureDef> {
        self.structures.iter().find(|s| s.name == name)
    }

    /// Entity definitions, parents before children.
    fn entity_order(&self) -> Result<Vec<usize>> {
        let mut order = Vec::with_capacity(self.entities.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while order.len() < self.entities.len() {
            let before = order.len();
            for (i, def) in self.entities.iter().enumerate() {
                if placed.contains(def.name.as_str()) {
                    continue;
                }
                let ready = match &def.parent {
                    None => true,
                    Some(parent) => {
                        if self.entity_def(parent).is_none() {
                            return Err(OrmError::TypeNotFound(parent.clone()));
                        }
                        placed.contains(parent.as_str())
                    }
                };
                if ready {
                    placed.insert(&def.name);
                    order.push(i);
                }
            }
            if order.len() == before {
                return Err(OrmError::SchemaError("Inheritance cycle between entity types".into()));
            }
        }
        Ok(order)
    }

    fn resolve_parents(&self, asm: &mut Assembler, order: &[usize]) -> Result<()> {
        for &i in order {
            let def = &self.entities[i];
            let id = asm.type_names[&def.name];
            if let Some(parent) = &def.parent {
                let parent_id = asm.type_names[parent];
                let root = asm.types[parent_id.index()].hierarchy;
                let info = &mut asm.types[id.index()];
                info.parent = Some(parent_id);
                info.hierarchy = root;
                let mut ancestor = Some(parent_id);
                while let Some(a) = ancestor {
                    asm.types[a.index()].descendants.push(id);
                    ancestor = asm.types[a.index()].parent;
                }
                if def.fields.iter().any(|f| matches!(f.kind, FieldDefKind::Key(_))) {
                    return Err(OrmError::SchemaError(format!(
                        "Derived type '{}' cannot declare key fields",
                        def.name
                    )));
                }
            } else if !def.fields.iter().any(|f| matches!(f.kind, FieldDefKind::Key(_))) {
                return Err(OrmError::SchemaError(format!(
                    "Hierarchy root '{}' declares no key fields",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// Key field definitions of the hierarchy `type_name` belongs to.
    fn key_defs(&self, type_name: &str) -> Result<Vec<(String, DataType)>> {
        let mut def = self
            .entity_def(type_name)
            .ok_or_else(|| OrmError::TypeNotFound(type_name.to_string()))?;
        while let Some(parent) = &def.parent {
            def = self
                .entity_def(parent)
                .ok_or_else(|| OrmError::TypeNotFound(parent.clone()))?;
        }
        Ok(def
            .fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldDefKind::Key(data_type) => Some((f.name.clone(), data_type)),
                _ => None,
            })
            .collect())
    }

    fn layout_entity(&self, asm: &mut Assembler, index: usize) -> Result<()> {
        let def = &self.entities[index];
        let id = asm.type_names[&def.name];
        let root = asm.types[id.index()].hierarchy;

        let mut fields = Vec::new();
        if id == root {
            let mut hierarchy = HierarchyInfo {
                root,
                types: vec![root],
                columns: Vec::new(),
                key_columns: Vec::new(),
                type_id_column: 0,
                primary_index: IndexId(0),
                indexes: Vec::new(),
            };
            for field in &def.fields {
                if let FieldDefKind::Key(data_type) = field.kind {
                    let column = hierarchy.columns.len();
                    hierarchy.columns.push(ColumnInfo {
                        name: field.name.clone(),
                        data_type,
                        nullable: false,
                    });
                    hierarchy.key_columns.push(column);
                    let field_id = asm.add_field(FieldInfo {
                        id: FieldId(0),
                        name: field.name.clone(),
                        declaring_type: id,
                        kind: FieldKind::Primitive,
                        data_type: Some(data_type),
                        columns: vec![column],
                        value_type: None,
                        association: None,
                        parent: None,
                        children: Vec::new(),
                        is_primary_key: true,
                        is_lazy_load: false,
                        is_nullable: false,
                        is_version: false,
                    });
                    fields.push(field_id);
                }
            }
            hierarchy.type_id_column = hierarchy.columns.len();
            hierarchy.columns.push(ColumnInfo {
                name: "TypeId".into(),
                data_type: DataType::Integer,
                nullable: false,
            });
            asm.hierarchies.insert(root, hierarchy);
        } else {
            let parent = asm.types[id.index()].parent.unwrap_or(root);
            fields = asm.types[parent.index()].fields.clone();
            asm.types[id.index()].version_field = asm.types[parent.index()].version_field;
            if let Some(hierarchy) = asm.hierarchies.get_mut(&root) {
                hierarchy.types.push(id);
            }
        }

        for field in &def.fields {
            if matches!(field.kind, FieldDefKind::Key(_)) {
                continue;
            }
            let mut visiting = Vec::new();
            let field_id = self.flatten_field(asm, id, root, field, "", None, &mut visiting)?;
            if asm.fields[field_id.index()].is_version {
                if asm.types[id.index()].version_field.is_some() {
                    return Err(OrmError::SchemaError(format!(
                        "Type '{}' declares more than one version field",
                        def.name
                    )));
                }
                asm.types[id.index()].version_field = Some(field_id);
            }
            fields.push(field_id);
        }

        let mut all_fields = Vec::new();
        for field_id in fields {
            collect_field_tree(&asm.fields, field_id, &mut all_fields);
        }

        let hierarchy = &asm.hierarchies[&root];
        let mut columns: Vec<usize> = hierarchy.system_columns();
        for &field_id in &all_fields {
            columns.extend(asm.fields[field_id.index()].columns.iter().copied());
        }
        columns.sort_unstable();
        columns.dedup();

        let info = &mut asm.types[id.index()];
        info.field_names = all_fields
            .iter()
            .map(|&f| (asm.fields[f.index()].name.clone(), f))
            .collect();
        info.fields = all_fields;
        info.columns = columns;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn flatten_field(
        &self,
        asm: &mut Assembler,
        owner: TypeId,
        root: TypeId,
        def: &FieldDef,
        prefix: &str,
        parent: Option<FieldId>,
        visiting: &mut Vec<String>,
    ) -> Result<FieldId> {
        let name = format!("{}{}", prefix, def.name);
        let mut info = FieldInfo {
            id: FieldId(0),
            name: name.clone(),
            declaring_type: owner,
            kind: FieldKind::Primitive,
            data_type: None,
            columns: Vec::new(),
            value_type: None,
            association: None,
            parent,
            children: Vec::new(),
            is_primary_key: false,
            is_lazy_load: false,
            is_nullable: true,
            is_version: false,
        };

        match &def.kind {
            FieldDefKind::Key(_) => {
                return Err(OrmError::SchemaError(format!(
                    "Key field '{}' is only allowed on entity types",
                    name
                )));
            }
            FieldDefKind::Primitive {
                data_type,
                nullable,
                lazy,
            } => {
                info.data_type = Some(*data_type);
                info.is_nullable = *nullable;
                info.is_lazy_load = *lazy;
                info.columns = vec![asm.add_column(owner, root, &name, *data_type, *nullable)?];
            }
            FieldDefKind::Version => {
                info.data_type = Some(DataType::Integer);
                info.is_nullable = false;
                info.is_version = true;
                info.columns = vec![asm.add_column(owner, root, &name, DataType::Integer, false)?];
            }
            FieldDefKind::Reference { target, .. } => {
                let target_id = asm.entity_id(target)?;
                info.kind = FieldKind::Entity;
                info.value_type = Some(target_id);
                for (key_name, data_type) in self.key_defs(target)? {
                    let column_name = format!("{}.{}", name, key_name);
                    info.columns.push(asm.add_column(owner, root, &column_name, data_type, true)?);
                }
            }
            FieldDefKind::Structure { structure } => {
                let structure_def = self
                    .structure_def(structure)
                    .ok_or_else(|| OrmError::TypeNotFound(structure.clone()))?;
                if visiting.contains(structure) {
                    return Err(OrmError::SchemaError(format!(
                        "Structure '{}' contains itself through field '{}'",
                        structure, name
                    )));
                }
                info.kind = FieldKind::Structure;
                info.value_type = Some(asm.type_names[structure]);
                let field_id = asm.add_field(info);

                visiting.push(structure.clone());
                let nested_prefix = format!("{}.", name);
                let mut children = Vec::new();
                let mut columns = Vec::new();
                for nested in &structure_def.fields {
                    let child = self.flatten_field(
                        asm,
                        owner,
                        root,
                        nested,
                        &nested_prefix,
                        Some(field_id),
                        visiting,
                    )?;
                    columns.extend(asm.fields[child.index()].columns.iter().copied());
                    children.push(child);
                }
                visiting.pop();

                let structure_field = &mut asm.fields[field_id.index()];
                structure_field.children = children;
                structure_field.columns = columns;
                return Ok(field_id);
            }
            FieldDefKind::EntitySet { item, paired_to } => {
                let item_id = asm.entity_id(item)?;
                info.kind = FieldKind::EntitySet;
                info.value_type = Some(item_id);
                info.is_lazy_load = true;
                let field_id = asm.add_field(info);
                asm.pending.push(PendingAssociation::Set {
                    field: field_id,
                    owner,
                    item: item.clone(),
                    paired_to: paired_to.clone(),
                });
                return Ok(field_id);
            }
        }

        let is_reference = info.kind == FieldKind::Entity;
        let target = info.value_type;
        let field_id = asm.add_field(info);
        if is_reference && let Some(target) = target {
            let target_name = asm.types[target.index()].name.clone();
            let paired_to = match &def.kind {
                FieldDefKind::Reference { paired_to, .. } => paired_to.clone(),
                _ => None,
            };
            asm.pending.push(PendingAssociation::Reference {
                field: field_id,
                owner,
                target: target_name,
                paired_to,
            });
        }
        Ok(field_id)
    }

    fn resolve_associations(&self, asm: &mut Assembler) -> Result<()> {
        let pending = std::mem::take(&mut asm.pending);

        for entry in &pending {
            if let PendingAssociation::Reference { field, owner, target, .. } = entry {
                let target_id = asm.entity_id(target)?;
                asm.add_association(*field, *owner, target_id, Multiplicity::ZeroToOne, None);
            }
        }

        for entry in &pending {
            if let PendingAssociation::Reference {
                field,
                owner,
                target,
                paired_to: Some(reverse_name),
            } = entry
            {
                self.pair_references(asm, *field, *owner, target, reverse_name)?;
            }
        }

        for entry in &pending {
            let PendingAssociation::Set {
                field,
                owner,
                item,
                paired_to,
            } = entry
            else {
                continue;
            };
            if asm.field_by_id_assoc.contains_key(field) {
                // already created as the reverse side of a paired set
                continue;
            }
            let item_id = asm.entity_id(item)?;
            let owner_name = asm.types[owner.index()].name.clone();
            let field_name = asm.fields[field.index()].name.clone();

            match paired_to {
                None => {
                    let auxiliary = self.create_link_type(asm, *owner, *field, item_id)?;
                    asm.add_association(
                        *field,
                        *owner,
                        item_id,
                        Multiplicity::ZeroToMany,
                        Some(auxiliary),
                    );
                }
                Some(reverse_name) => {
                    let reverse = asm.types[item_id.index()].field_id(reverse_name).ok_or_else(|| {
                        OrmError::FieldNotFound(reverse_name.clone(), item.clone())
                    })?;
                    let reverse_info = asm.fields[reverse.index()].clone();
                    let points_back = reverse_info
                        .value_type
                        .is_some_and(|t| asm.types[t.index()].is_ancestor_of(*owner));
                    if !points_back {
                        return Err(OrmError::SchemaError(format!(
                            "Field '{}.{}' cannot be paired with '{}.{}'",
                            owner_name, field_name, item, reverse_name
                        )));
                    }
                    match reverse_info.kind {
                        FieldKind::Entity => {
                            let reverse_assoc =
                                asm.field_by_id_assoc.get(&reverse).copied().ok_or_else(|| {
                                    OrmError::SchemaError(format!(
                                        "Field '{}.{}' has no association",
                                        item, reverse_name
                                    ))
                                })?;
                            if asm.associations[reverse_assoc.index()].pair_to.is_some() {
                                return Err(OrmError::SchemaError(format!(
                                    "Field '{}.{}' is already paired",
                                    item, reverse_name
                                )));
                            }
                            let set_assoc = asm.add_association(
                                *field,
                                *owner,
                                item_id,
                                Multiplicity::OneToMany,
                                None,
                            );
                            asm.associations[set_assoc.index()].pair_to = Some(reverse_assoc);
                            let reverse_info = &mut asm.associations[reverse_assoc.index()];
                            reverse_info.multiplicity = Multiplicity::ManyToOne;
                            reverse_info.pair_to = Some(set_assoc);
                        }
                        FieldKind::EntitySet => {
                            let auxiliary = self.create_link_type(asm, *owner, *field, item_id)?;
                            let swapped = AuxiliaryInfo {
                                link_type: auxiliary.link_type,
                                master_columns: auxiliary.slave_columns.clone(),
                                slave_columns: auxiliary.master_columns.clone(),
                            };
                            let set_assoc = asm.add_association(
                                *field,
                                *owner,
                                item_id,
                                Multiplicity::ManyToMany,
                                Some(auxiliary),
                            );
                            let reverse_owner = reverse_info.declaring_type;
                            let reverse_assoc = asm.add_association(
                                reverse,
                                reverse_owner,
                                *owner,
                                Multiplicity::ManyToMany,
                                Some(swapped),
                            );
                            asm.associations[set_assoc.index()].pair_to = Some(reverse_assoc);
                            asm.associations[reverse_assoc.index()].pair_to = Some(set_assoc);
                        }
                        _ => {
                            return Err(OrmError::SchemaError(format!(
                                "Field '{}.{}' is neither a reference nor an entity set",
                                item, reverse_name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Turns two reference associations pointing at each other's types into
    /// one-to-one halves. Either side (or both) may name the other.
    fn pair_references(
        &self,
        asm: &mut Assembler,
        field: FieldId,
        owner: TypeId,
        target: &str,
        reverse_name: &str,
    ) -> Result<()> {
        let target_id = asm.entity_id(target)?;
        let owner_name = asm.types[owner.index()].name.clone();
        let field_name = asm.fields[field.index()].name.clone();
        let reverse = asm.types[target_id.index()]
            .field_id(reverse_name)
            .ok_or_else(|| OrmError::FieldNotFound(reverse_name.to_string(), target.to_string()))?;
        let reverse_info = &asm.fields[reverse.index()];
        let points_back = reverse_info.kind == FieldKind::Entity
            && reverse_info.value_type.is_some_and(|t| asm.types[t.index()].is_ancestor_of(owner));
        if !points_back {
            return Err(OrmError::SchemaError(format!(
                "Field '{}.{}' cannot be paired with '{}.{}'",
                owner_name, field_name, target, reverse_name
            )));
        }
        let association_of = |id: FieldId, name: &str| {
            asm.field_by_id_assoc
                .get(&id)
                .copied()
                .ok_or_else(|| {
                    OrmError::SchemaError(format!("Field '{}' has no association", name))
                })
        };
        let own_assoc = association_of(field, &field_name)?;
        let reverse_assoc = association_of(reverse, reverse_name)?;
        let own_pair = asm.associations[own_assoc.index()].pair_to;
        let reverse_pair = asm.associations[reverse_assoc.index()].pair_to;
        match (own_pair, reverse_pair) {
            (None, None) => {}
            (Some(p), Some(r)) if p == reverse_assoc && r == own_assoc => return Ok(()),
            _ => {
                return Err(OrmError::SchemaError(format!(
                    "Field '{}.{}' or '{}.{}' is already paired",
                    owner_name, field_name, target, reverse_name
                )));
            }
        }
        for (assoc, pair) in [(own_assoc, reverse_assoc), (reverse_assoc, own_assoc)] {
            let info = &mut asm.associations[assoc.index()];
            info.multiplicity = Multiplicity::OneToOne;
            info.pair_to = Some(pair);
        }
        Ok(())
    }

    fn create_link_type(
        &self,
        asm: &mut Assembler,
        owner: TypeId,
        field: FieldId,
        item: TypeId,
    ) -> Result<AuxiliaryInfo> {
        let owner_name = asm.types[owner.index()].name.clone();
        let item_name = asm.types[item.index()].name.clone();
        let field_name = asm.fields[field.index()].name.clone();
        let name = format!("{}-{}-{}", owner_name, field_name, item_name);
        let link_type = asm.declare_type(&name, TypeKind::Auxiliary)?;

        let mut hierarchy = HierarchyInfo {
            root: link_type,
            types: vec![link_type],
            columns: Vec::new(),
            key_columns: Vec::new(),
            type_id_column: 0,
            primary_index: IndexId(0),
            indexes: Vec::new(),
        };
        let mut master_columns = Vec::new();
        let mut slave_columns = Vec::new();
        let roles = [
            ("Master", &owner_name, &mut master_columns),
            ("Slave", &item_name, &mut slave_columns),
        ];
        for (role, type_name, target) in roles {
            for (key_name, data_type) in self.key_defs(type_name)? {
                let column = hierarchy.columns.len();
                hierarchy.columns.push(ColumnInfo {
                    name: format!("{}.{}", role, key_name),
                    data_type,
                    nullable: false,
                });
                hierarchy.key_columns.push(column);
                target.push(column);
            }
        }
        hierarchy.type_id_column = hierarchy.columns.len();
        hierarchy.columns.push(ColumnInfo {
            name: "TypeId".into(),
            data_type: DataType::Integer,
            nullable: false,
        });
        let columns: Vec<usize> = (0..hierarchy.columns.len()).collect();
        asm.hierarchies.insert(link_type, hierarchy);
        asm.types[link_type.index()].columns = columns;

        let primary = asm.add_primary_index(link_type);
        let mut key_columns = slave_columns.clone();
        key_columns.extend(master_columns.iter().copied());
        asm.add_index(IndexInfo {
            id: IndexId(0),
            name: format!("IX_{}_Slave", name),
            hierarchy: link_type,
            declaring_type: link_type,
            key_columns,
            value_columns: Vec::new(),
            attributes: IndexAttributes::SECONDARY,
            filter: None,
        });
        debug!(link = %name, primary = %primary, "link type created");

        Ok(AuxiliaryInfo {
            link_type,
            master_columns,
            slave_columns,
        })
    }

    fn build_indexes(&self, asm: &mut Assembler, index: usize) -> Result<()> {
        let def = &self.entities[index];
        let id = asm.type_names[&def.name];
        let root = asm.types[id.index()].hierarchy;
        if id == root {
            asm.add_primary_index(root);
        }

        let key_columns = asm.hierarchies[&root].key_columns.clone();
        for index_def in &def.indexes {
            let mut columns = Vec::new();
            for field_name in &index_def.fields {
                let field_id = asm.types[id.index()]
                    .field_id(field_name)
                    .ok_or_else(|| OrmError::FieldNotFound(field_name.clone(), def.name.clone()))?;
                let field = &asm.fields[field_id.index()];
                if field.is_entity_set() {
                    return Err(OrmError::SchemaError(format!(
                        "Index '{}' cannot include entity set '{}'",
                        index_def.name, field_name
                    )));
                }
                columns.extend(field.columns.iter().copied());
            }
            for &key in &key_columns {
                if !columns.contains(&key) {
                    columns.push(key);
                }
            }
            let mut attributes = IndexAttributes::SECONDARY;
            if index_def.unique {
                attributes |= IndexAttributes::UNIQUE;
            }
            let filter = match &index_def.filter {
                Some(filter) => {
                    attributes |= IndexAttributes::FILTERED;
                    Some(asm.resolve_filter(id, filter)?)
                }
                None => None,
            };
            asm.add_index(IndexInfo {
                id: IndexId(0),
                name: index_def.name.clone(),
                hierarchy: root,
                declaring_type: id,
                key_columns: columns,
                value_columns: Vec::new(),
                attributes,
                filter,
            });
        }
        Ok(())
    }
}

fn collect_field_tree(fields: &[FieldInfo], id: FieldId, out: &mut Vec<FieldId>) {
    out.push(id);
    for &child in &fields[id.index()].children {
        collect_field_tree(fields, child, out);
    }
}

impl Assembler {
    fn declare_type(&mut self, name: &str, kind: TypeKind) -> Result<TypeId> {
        if self.type_names.contains_key(name) {
            return Err(OrmError::SchemaError(format!("Type '{}' is declared twice", name)));
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeInfo {
            id,
            name: name.to_string(),
            kind,
            parent: None,
            hierarchy: id,
            descendants: Vec::new(),
            fields: Vec::new(),
            field_names: HashMap::new(),
            columns: Vec::new(),
            version_field: None,
        });
        self.type_names.insert(name.to_string(), id);
        Ok(id)
    }

    fn entity_id(&self, name: &str) -> Result<TypeId> {
        match self.type_names.get(name) {
            Some(&id) if self.types[id.index()].kind == TypeKind::Entity => Ok(id),
            Some(_) => Err(OrmError::SchemaError(format!("Type '{}' is not an entity", name))),
            None => Err(OrmError::TypeNotFound(name.to_string())),
        }
    }

    fn add_field(&mut self, mut info: FieldInfo) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        info.id = id;
        self.fields.push(info);
        id
    }

    fn add_column(
        &mut self,
        owner: TypeId,
        root: TypeId,
        name: &str,
        data_type: DataType,
        nullable: bool,
    ) -> Result<usize> {
        let hierarchy = self.hierarchies.get_mut(&root).ok_or_else(|| {
            OrmError::SchemaError(format!("Hierarchy of column '{}' is not laid out", name))
        })?;
        hierarchy.columns.push(ColumnInfo {
            name: name.to_string(),
            data_type,
            // columns of derived types are NULL for rows of other types
            nullable: nullable || owner != root,
        });
        Ok(hierarchy.columns.len() - 1)
    }

    fn add_association(
        &mut self,
        field: FieldId,
        owner: TypeId,
        target: TypeId,
        multiplicity: Multiplicity,
        auxiliary: Option<AuxiliaryInfo>,
    ) -> AssociationId {
        let id = AssociationId(self.associations.len() as u32);
        let name = format!(
            "{}.{}",
            self.types[owner.index()].name,
            self.fields[field.index()].name
        );
        self.associations.push(AssociationInfo {
            id,
            name,
            owner_type: owner,
            owner_field: field,
            target_type: target,
            multiplicity,
            pair_to: None,
            auxiliary,
        });
        self.fields[field.index()].association = Some(id);
        self.field_by_id_assoc.insert(field, id);
        id
    }

    fn add_index(&mut self, mut info: IndexInfo) -> IndexId {
        let id = IndexId(self.indexes.len() as u32);
        info.id = id;
        if let Some(hierarchy) = self.hierarchies.get_mut(&info.hierarchy) {
            if info.is_primary() {
                hierarchy.primary_index = id;
            }
            hierarchy.indexes.push(id);
        }
        self.indexes.push(info);
        id
    }

    fn add_primary_index(&mut self, root: TypeId) -> IndexId {
        let hierarchy = &self.hierarchies[&root];
        let key_columns = hierarchy.key_columns.clone();
        let value_columns = (0..hierarchy.columns.len())
            .filter(|c| !key_columns.contains(c))
            .collect();
        let name = format!("PK_{}", self.types[root.index()].name);
        self.add_index(IndexInfo {
            id: IndexId(0),
            name,
            hierarchy: root,
            declaring_type: root,
            key_columns,
            value_columns,
            attributes: IndexAttributes::PRIMARY | IndexAttributes::UNIQUE,
            filter: None,
        })
    }

    fn resolve_filter(&self, type_id: TypeId, filter: &Expr) -> Result<Expr> {
        let info = &self.types[type_id.index()];
        filter.resolve_with(&|name: &str| {
            let field = info
                .field_id(name)
                .map(|f| &self.fields[f.index()])
                .ok_or_else(|| OrmError::FieldNotFound(name.to_string(), info.name.clone()))?;
            match (field.kind, field.columns.as_slice()) {
                (FieldKind::Primitive, [column]) => Ok(*column),
                _ => Err(OrmError::SchemaError(format!(
                    "Field '{}' cannot be used in an index filter",
                    name
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainBuilder {
        let mut builder = DomainBuilder::new();
        builder.structure("Geo", |s| {
            s.field("Lat", DataType::Float).reference("Country", "Country");
        });
        builder.structure("Address", |s| {
            s.field("City", DataType::Text).structure("Geo", "Geo");
        });
        builder.entity("Country", |t| {
            t.key("Code", DataType::Text).field("Name", DataType::Text);
        });
        builder.entity("Person", |t| {
            t.key("Id", DataType::Integer)
                .required_field("Name", DataType::Text)
                .lazy_field("Bio", DataType::Text)
                .version("Version")
                .structure("Address", "Address")
                .reference("Friend", "Person")
                .entity_set("Visited", "Country")
                .index("IX_Name", &["Name"]);
        });
        builder.derived_entity("Student", "Person", |t| {
            t.field("School", DataType::Text);
        });
        builder
    }

    #[test]
    fn test_layout_and_flattening() {
        let model = sample().build().unwrap();
        let person = model.type_by_name("Person").unwrap();
        let hierarchy = model.hierarchy(person.id);
        assert_eq!(hierarchy.key_columns, vec![0]);
        assert_eq!(hierarchy.type_id_column, 1);

        let lat = model.field_of(person.id, "Address.Geo.Lat").unwrap();
        assert_eq!(lat.data_type, Some(DataType::Float));
        let country = model.field_of(person.id, "Address.Geo.Country").unwrap();
        assert!(country.is_entity());
        assert_eq!(country.columns.len(), 1);
        let address = model.field_of(person.id, "Address").unwrap();
        assert_eq!(address.children.len(), 2);
        assert_eq!(address.columns.len(), 3);

        let student = model.type_by_name("Student").unwrap();
        assert_eq!(student.hierarchy, person.id);
        assert!(person.descendants.contains(&student.id));
        assert!(model.field_of(student.id, "Name").is_ok());
        assert!(model.field_of(person.id, "School").is_err());
        assert_eq!(student.version_field, person.version_field);
    }

    #[test]
    fn test_associations() {
        let model = sample().build().unwrap();
        let person = model.type_by_name("Person").unwrap();
        let friend = model.field_of(person.id, "Friend").unwrap();
        let association = model.association(friend.association.unwrap());
        assert_eq!(association.multiplicity, Multiplicity::ZeroToOne);
        assert!(!association.is_paired());

        let visited = model.field_of(person.id, "Visited").unwrap();
        let set = model.association(visited.association.unwrap());
        assert_eq!(set.multiplicity, Multiplicity::ZeroToMany);
        let aux = set.auxiliary.as_ref().unwrap();
        assert_eq!(model.type_info(aux.link_type).kind, TypeKind::Auxiliary);
        assert_eq!(aux.master_columns, vec![0]);
        assert_eq!(aux.slave_columns, vec![1]);
    }

    #[test]
    fn test_paired_set() {
        let mut builder = DomainBuilder::new();
        builder.entity("Author", |t| {
            t.key("Id", DataType::Integer).paired_entity_set("Books", "Book", "Author");
        });
        builder.entity("Book", |t| {
            t.key("Id", DataType::Integer).reference("Author", "Author");
        });
        let model = builder.build().unwrap();
        let author = model.type_by_name("Author").unwrap();
        let books = model.field_of(author.id, "Books").unwrap();
        let books = model.association(books.association.unwrap());
        assert_eq!(books.multiplicity, Multiplicity::OneToMany);
        let reverse = model.association(books.pair_to.unwrap());
        assert_eq!(reverse.multiplicity, Multiplicity::ManyToOne);
        assert!(books.auxiliary.is_none());
    }

    #[test]
    fn test_paired_references() {
        let mut builder = DomainBuilder::new();
        builder.entity("Person", |t| {
            t.key("Id", DataType::Integer)
                .paired_reference("Passport", "Passport", "Holder")
                .paired_reference("Spouse", "Person", "Spouse");
        });
        builder.entity("Passport", |t| {
            t.key("Number", DataType::Text).paired_reference("Holder", "Person", "Passport");
        });
        let model = builder.build().unwrap();
        let person = model.type_by_name("Person").unwrap();
        let passport = model.type_by_name("Passport").unwrap();
        let association_of = |type_id, name| {
            let field = model.field_of(type_id, name).unwrap();
            model.association(field.association.unwrap())
        };
        let own = association_of(person.id, "Passport");
        let reverse = association_of(passport.id, "Holder");
        assert_eq!(own.multiplicity, Multiplicity::OneToOne);
        assert_eq!(reverse.multiplicity, Multiplicity::OneToOne);
        assert_eq!(own.pair_to, Some(reverse.id));
        assert_eq!(reverse.pair_to, Some(own.id));
        assert!(!own.multiplicity.is_to_many());

        let spouse = association_of(person.id, "Spouse");
        assert_eq!(spouse.pair_to, Some(spouse.id));

        let mut builder = DomainBuilder::new();
        builder.entity("Person", |t| {
            t.key("Id", DataType::Integer).field("Name", DataType::Text);
        });
        builder.entity("Passport", |t| {
            t.key("Number", DataType::Text).paired_reference("Holder", "Person", "Name");
        });
        assert!(matches!(builder.build(), Err(OrmError::SchemaError(_))));

        // one reference cannot pair with two others
        let mut builder = DomainBuilder::new();
        builder.entity("Person", |t| {
            t.key("Id", DataType::Integer).reference("Passport", "Passport");
        });
        builder.entity("Passport", |t| {
            t.key("Number", DataType::Text)
                .paired_reference("Holder", "Person", "Passport")
                .paired_reference("Previous", "Person", "Passport");
        });
        assert!(matches!(builder.build(), Err(OrmError::SchemaError(_))));
    }

    #[test]
    fn test_indexes() {
        let model = sample().build().unwrap();
        let person = model.type_by_name("Person").unwrap();
        let hierarchy = model.hierarchy(person.id);
        let primary = model.index(hierarchy.primary_index);
        assert!(primary.is_primary());
        assert_eq!(primary.output_columns(), (0..hierarchy.column_count()).collect::<Vec<_>>());
        let secondary = hierarchy
            .indexes
            .iter()
            .map(|&i| model.index(i))
            .find(|i| i.name == "IX_Name")
            .unwrap();
        let name_column = model.field_of(person.id, "Name").unwrap().columns[0];
        assert_eq!(secondary.key_columns, vec![name_column, 0]);
    }

    #[test]
    fn test_schema_errors() {
        let mut builder = DomainBuilder::new();
        builder.entity("NoKey", |t| {
            t.field("X", DataType::Integer);
        });
        assert!(matches!(builder.build(), Err(OrmError::SchemaError(_))));

        let mut builder = DomainBuilder::new();
        builder.structure("Loop", |s| {
            s.structure("Inner", "Loop");
        });
        builder.entity("Holder", |t| {
            t.key("Id", DataType::Integer).structure("L", "Loop");
        });
        assert!(matches!(builder.build(), Err(OrmError::SchemaError(_))));

        let mut builder = DomainBuilder::new();
        builder.entity("A", |t| {
            t.key("Id", DataType::Integer).reference("B", "Missing");
        });
        assert!(matches!(builder.build(), Err(OrmError::TypeNotFound(_))));
    }
}
