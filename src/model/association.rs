use crate::core::{AssociationId, FieldId, TypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Reference field without a reverse side
    ZeroToOne,
    /// Entity set without a reverse side, stored in a link table
    ZeroToMany,
    /// Entity set paired with a reference field of the item type
    OneToMany,
    /// Reference field paired with an entity set of the target type
    ManyToOne,
    /// Reference field paired with a reference field of the target type
    OneToOne,
    /// Two entity sets paired with each other, sharing a link table
    ManyToMany,
}

impl Multiplicity {
    pub fn is_to_many(self) -> bool {
        matches!(self, Self::ZeroToMany | Self::OneToMany | Self::ManyToMany)
    }
}

/// Link table of a set association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryInfo {
    pub link_type: TypeId,
    /// Link columns holding the key of the set owner
    pub master_columns: Vec<usize>,
    /// Link columns holding the key of the set item
    pub slave_columns: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationInfo {
    pub id: AssociationId,
    pub name: String,
    pub owner_type: TypeId,
    pub owner_field: FieldId,
    pub target_type: TypeId,
    pub multiplicity: Multiplicity,
    pub pair_to: Option<AssociationId>,
    pub auxiliary: Option<AuxiliaryInfo>,
}

impl AssociationInfo {
    pub fn is_paired(&self) -> bool {
        self.pair_to.is_some()
    }

    /// Owner-side and item-side link columns. The reverse side of a paired
    /// many-to-many association shares the link type with the roles swapped.
    pub fn link_columns(&self) -> Option<(&[usize], &[usize])> {
        self.auxiliary
            .as_ref()
            .map(|aux| (aux.master_columns.as_slice(), aux.slave_columns.as_slice()))
    }
}
