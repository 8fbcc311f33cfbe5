pub mod error;
pub mod ids;
pub mod key;
pub mod tuple;
pub mod value;

pub use error::{OrmError, Result};
pub use ids::{AssociationId, FieldId, IndexId, TypeId};
pub use key::Key;
pub use tuple::Tuple;
pub use value::{DataType, Value};
