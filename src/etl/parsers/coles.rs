/// Coles Catalogue API Parser
///
/// Categories come from `catalogGroupView`. Each category is browsed through
/// a per-category JSON document whose `pageProps.searchResults` carries the
/// result count and the tiles on the page; only `PRODUCT` tiles are kept.
use super::{as_array, as_count, as_identifier, lookup, Category};
use crate::error::{IngestError, Result};
use serde_json::Value;

/// Products per category page
pub const PAGE_SIZE: u64 = 48;

const PRODUCT_TILE: &str = "PRODUCT";

pub fn parse_categories(body: &Value) -> Result<Vec<Category>> {
    let groups = as_array(lookup(body, &["catalogGroupView"])?, "catalogGroupView")?;

    groups
        .iter()
        .map(|group| {
            let slug = group
                .get("seoToken")
                .and_then(Value::as_str)
                .ok_or_else(|| IngestError::Parse("category is missing `seoToken`".to_string()))?;

            Ok(Category {
                id: group.get("id").and_then(as_identifier),
                slug: slug.to_string(),
                description: group.get("name").and_then(Value::as_str).unwrap_or(slug).to_string(),
            })
        })
        .collect()
}

/// First request for a category, used to read the result count
pub fn category_url(product_url: &str, slug: &str) -> String {
    format!("{}{}.json?slug={}", product_url, slug, slug)
}

pub fn page_url(product_url: &str, slug: &str, page: u64) -> String {
    format!("{}{}.json?page={}&slug={}", product_url, slug, page, slug)
}

pub fn parse_record_count(body: &Value) -> Result<u64> {
    as_count(lookup(body, &["pageProps", "searchResults", "noOfResults"])?, "noOfResults")
}

/// Product tiles on a page; ads and other tiles are dropped
pub fn parse_products(body: &Value) -> Result<Vec<Value>> {
    let results = as_array(lookup(body, &["pageProps", "searchResults", "results"])?, "results")?;

    Ok(results
        .iter()
        .filter(|item| item.get("_type").and_then(Value::as_str) == Some(PRODUCT_TILE))
        .cloned()
        .collect())
}
