/// ETL Module
///
/// The stages of a pipeline run:
/// - Extract: fetch product catalogs from the retailer APIs
/// - Transform: flatten product JSON into row sets
/// - Load: write row sets into PostgreSQL under a write policy
pub mod extract;
pub mod load;
pub mod parsers;
pub mod schema;
pub mod transform;
