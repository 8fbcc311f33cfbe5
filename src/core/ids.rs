use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! model_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

model_id!(
    /// Identifier of a persistent type inside a [`crate::model::DomainModel`].
    TypeId, "T"
);
model_id!(
    /// Identifier of a (possibly nested) field.
    FieldId, "F"
);
model_id!(IndexId, "I");
model_id!(AssociationId, "A");
