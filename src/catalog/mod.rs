pub mod data_type;
pub mod schema;

mod catalog;

pub use catalog::Catalog;
pub use data_type::{ColType, Value};
pub use schema::{ColumnMeta, DbMeta, IndexMeta, TableMeta};
