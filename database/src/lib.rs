pub mod portal_dbprovider;
pub mod portal_entities;
pub mod portal_pg;
pub mod portal_schema;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
