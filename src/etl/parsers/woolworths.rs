/// Woolworths Browse API Parser
///
/// The category list comes from `ListTopLevelPiesCategories`. Products are
/// fetched by POSTing a browse payload; each response carries
/// `TotalRecordCount` and a list of bundles, each holding `Products`.
use super::{as_array, as_count, as_identifier, lookup, Category};
use crate::error::{IngestError, Result};
use serde_json::{json, Value};

/// Products per browse page
pub const PAGE_SIZE: u64 = 24;

/// Parse the category list response
pub fn parse_categories(body: &Value) -> Result<Vec<Category>> {
    let top_level = lookup(body, &["ListTopLevelPiesCategories"])?;

    // The list is either one object or an array of objects holding `Categories`
    let groups: Vec<&Value> = match top_level {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut categories = Vec::new();
    for group in groups {
        let entries = as_array(lookup(group, &["Categories"])?, "Categories")?;
        for entry in entries {
            let slug = entry
                .get("UrlFriendlyName")
                .and_then(Value::as_str)
                .ok_or_else(|| IngestError::Parse("category is missing `UrlFriendlyName`".to_string()))?;

            categories.push(Category {
                id: entry.get("NodeId").and_then(as_identifier),
                slug: slug.to_string(),
                description: entry.get("Description").and_then(Value::as_str).unwrap_or(slug).to_string(),
            });
        }
    }

    Ok(categories)
}

/// Request body for one page of a category
pub fn browse_payload(category: &Category, page_number: u64) -> Value {
    json!({
        "categoryId": category.id,
        "pageNumber": page_number,
        "pageSize": PAGE_SIZE,
        "sortType": "CUPAsc",
        "url": format!("/shop/browse/{}", category.slug),
        "location": format!("/shop/browse/{}", category.slug),
        "formatObject": json!({ "name": category.description }).to_string(),
        "isSpecial": null,
        "isBundle": false,
        "isMobile": false,
        "filters": [],
        "token": "",
        "enableGp": false,
        "isHideUnavailableProducts": false,
    })
}

pub fn parse_record_count(body: &Value) -> Result<u64> {
    as_count(lookup(body, &["TotalRecordCount"])?, "TotalRecordCount")
}

/// Product records from every bundle on a page
pub fn parse_products(body: &Value) -> Result<Vec<Value>> {
    let bundles = match lookup(body, &["Bundles"])? {
        Value::Null => return Ok(Vec::new()),
        other => as_array(other, "Bundles")?,
    };

    let mut products = Vec::new();
    for bundle in bundles {
        match bundle.get("Products") {
            Some(Value::Array(items)) => products.extend(items.iter().cloned()),
            Some(Value::Null) | None => {}
            Some(_) => return Err(IngestError::Parse("`Bundles[].Products` is not an array".to_string())),
        }
    }

    Ok(products)
}
