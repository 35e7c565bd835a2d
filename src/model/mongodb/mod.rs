mod bson;
mod collection;

pub use bson::{ApiId, Id};
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
