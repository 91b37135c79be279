/// Extract Module
///
/// Handles fetching product catalogs from the retailer APIs. Each extractor
/// walks the category list, pages through every category and returns one
/// row set per non-empty category.
use crate::client::RetailerClient;
use crate::config::{Config, FetchPolicy, Retailer};
use crate::error::{IngestError, Result};
use crate::etl::parsers::{self, coles, woolworths, Category};
use crate::etl::transform::{build_row_set, category_name};
use crate::models::RowSet;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use serde_json::Value;
use std::fmt::Display;

/// Cookie Woolworths requires on browse requests
const WOOLWORTHS_COOKIE: &str = "_abck";

/// Produces the row sets for one pipeline run
#[async_trait]
pub trait Extractor: Send {
    async fn run(&mut self) -> Result<Vec<RowSet>>;

    /// Counters accumulated by the last `run`
    fn stats(&self) -> &ExtractionStats;
}

/// Counters for one extraction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub categories_extracted: u64,
    pub categories_excluded: u64,
    pub categories_empty: u64,
    pub categories_failed: u64,
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub products: u64,
}

impl ExtractionStats {
    fn log_summary(&self) {
        tracing::info!(
            "Extraction complete: {} categories ({} excluded, {} empty, {} failed), {} pages ({} failed), {} products",
            self.categories_extracted,
            self.categories_excluded,
            self.categories_empty,
            self.categories_failed,
            self.pages_fetched,
            self.pages_failed,
            self.products
        );
    }
}

/// Settings shared by both retailers
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub category_url: String,
    pub product_url: String,
    pub excluded_categories: Vec<String>,
    pub policy: FetchPolicy,
}

impl ExtractSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            category_url: config.extract.category_url.clone(),
            product_url: config.extract.product_url.clone(),
            excluded_categories: config.excluded_categories(),
            policy: config.extract.on_fetch_error,
        }
    }

    fn is_excluded(&self, category: &Category) -> bool {
        self.excluded_categories.iter().any(|slug| slug == &category.slug)
    }
}

/// Build the extractor for the configured retailer
pub fn build_extractor(config: &Config) -> Result<Box<dyn Extractor>> {
    let settings = ExtractSettings::from_config(config);
    let client = RetailerClient::new()?;

    Ok(match config.retailer {
        Retailer::Woolworths => Box::new(WoolworthsExtractor::new(client, settings, config.extract.cookie.clone())),
        Retailer::Coles => {
            Box::new(ColesExtractor::new(client, settings, config.extract.subscription_key.clone()))
        }
    })
}

/// Apply the fetch policy to a failed request. Returns `None` when the failure is skipped.
fn skip_or_fail<T>(policy: FetchPolicy, result: Result<T>, what: impl Display) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ (IngestError::Network { .. } | IngestError::Parse(_))) if policy == FetchPolicy::BestEffort => {
            tracing::warn!("Skipping {}: {}", what, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| IngestError::Config(format!("invalid value for header {}: {}", name, e)))
}

pub struct WoolworthsExtractor {
    client: RetailerClient,
    settings: ExtractSettings,
    cookie: Option<String>,
    stats: ExtractionStats,
}

impl WoolworthsExtractor {
    pub fn new(client: RetailerClient, settings: ExtractSettings, cookie: Option<String>) -> Self {
        Self { client, settings, cookie, stats: ExtractionStats::default() }
    }

    /// Configured cookie, else the one the product endpoint hands out
    async fn resolve_cookie(&self) -> Result<Option<String>> {
        if let Some(cookie) = &self.cookie {
            return Ok(Some(cookie.clone()));
        }

        let fetched = self.client.fetch_cookie(&self.settings.product_url, WOOLWORTHS_COOKIE).await;
        let cookie = skip_or_fail(self.settings.policy, fetched, "cookie request")?.flatten();
        if cookie.is_none() {
            tracing::error!("Could not get cookie");
        }
        Ok(cookie)
    }

    fn product_headers(cookie: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            let value = format!("{}={}", WOOLWORTHS_COOKIE, cookie);
            headers.insert(COOKIE, header_value("cookie", &value)?);
        }
        Ok(headers)
    }

    async fn extract_category(&mut self, category: &Category, label: &str, headers: &HeaderMap) -> Result<Vec<Value>> {
        let url = self.settings.product_url.clone();

        let first_page = self.client.post_json(&url, headers.clone(), &woolworths::browse_payload(category, 1)).await;
        let count = first_page.and_then(|body| woolworths::parse_record_count(&body));
        let Some(count) = skip_or_fail(self.settings.policy, count, format!("category {}", label))? else {
            self.stats.categories_failed += 1;
            return Ok(Vec::new());
        };

        let pages = parsers::page_count(count, woolworths::PAGE_SIZE);
        let mut records = Vec::new();

        for page in 1..=pages {
            tracing::info!("Extracting page [{} / {}] of category [{}]", page, pages, label);

            let payload = woolworths::browse_payload(category, page);
            let products = self
                .client
                .post_json(&url, headers.clone(), &payload)
                .await
                .and_then(|body| woolworths::parse_products(&body));

            match skip_or_fail(self.settings.policy, products, format!("page {} of category {}", page, label))? {
                Some(products) => {
                    self.stats.pages_fetched += 1;
                    records.extend(products);
                }
                None => self.stats.pages_failed += 1,
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl Extractor for WoolworthsExtractor {
    fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    async fn run(&mut self) -> Result<Vec<RowSet>> {
        let body = self.client.get_json(&self.settings.category_url, HeaderMap::new()).await?;
        let categories = woolworths::parse_categories(&body)?;

        let cookie = self.resolve_cookie().await?;
        let headers = Self::product_headers(cookie.as_deref())?;

        let mut row_sets = Vec::new();
        for category in &categories {
            if self.settings.is_excluded(category) {
                self.stats.categories_excluded += 1;
                continue;
            }

            self.stats.categories_extracted += 1;
            let name = category_name(&category.slug);
            let label = format!("{}:{}", self.stats.categories_extracted, name);
            tracing::info!("Extracting products for category [{}]", label);

            let records = self.extract_category(category, &label, &headers).await?;
            if records.is_empty() {
                self.stats.categories_empty += 1;
                tracing::info!("{} has no products", name);
                continue;
            }

            self.stats.products += records.len() as u64;
            row_sets.push(build_row_set(&name, &records, true)?);
        }

        self.stats.log_summary();
        Ok(row_sets)
    }
}

pub struct ColesExtractor {
    client: RetailerClient,
    settings: ExtractSettings,
    subscription_key: Option<String>,
    stats: ExtractionStats,
}

impl ColesExtractor {
    pub fn new(client: RetailerClient, settings: ExtractSettings, subscription_key: Option<String>) -> Self {
        Self { client, settings, subscription_key, stats: ExtractionStats::default() }
    }

    fn category_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert("dsch-channel", HeaderValue::from_static("coles.online.1site.desktop"));
        headers.insert("referer", HeaderValue::from_static("https://www.coles.com.au/"));
        if let Some(key) = &self.subscription_key {
            headers.insert(
                HeaderName::from_static("ocp-apim-subscription-key"),
                header_value("ocp-apim-subscription-key", key)?,
            );
        }
        Ok(headers)
    }

    async fn extract_category(&mut self, category: &Category, label: &str) -> Result<Vec<Value>> {
        let product_url = self.settings.product_url.clone();

        let count = self
            .client
            .get_json(&coles::category_url(&product_url, &category.slug), HeaderMap::new())
            .await
            .and_then(|body| coles::parse_record_count(&body));
        let Some(count) = skip_or_fail(self.settings.policy, count, format!("category {}", label))? else {
            self.stats.categories_failed += 1;
            return Ok(Vec::new());
        };

        let pages = parsers::page_count(count, coles::PAGE_SIZE);
        let mut records = Vec::new();

        for page in 1..=pages {
            tracing::info!("Extracting page [{} / {}] of category [{}]", page, pages, label);

            let url = coles::page_url(&product_url, &category.slug, page);
            let products =
                self.client.get_json(&url, HeaderMap::new()).await.and_then(|body| coles::parse_products(&body));

            match skip_or_fail(self.settings.policy, products, format!("page {} of category {}", page, label))? {
                Some(products) => {
                    self.stats.pages_fetched += 1;
                    records.extend(products);
                }
                None => self.stats.pages_failed += 1,
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl Extractor for ColesExtractor {
    fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    async fn run(&mut self) -> Result<Vec<RowSet>> {
        let headers = self.category_headers()?;
        let body = self.client.get_json(&self.settings.category_url, headers).await?;
        let categories = coles::parse_categories(&body)?;

        let mut row_sets = Vec::new();
        for category in &categories {
            if self.settings.is_excluded(category) {
                self.stats.categories_excluded += 1;
                continue;
            }

            self.stats.categories_extracted += 1;
            let name = category_name(&category.slug);
            let label = format!("{}:{}", self.stats.categories_extracted, name);
            tracing::info!("Extracting products for category [{}]", label);

            let records = self.extract_category(category, &label).await?;
            if records.is_empty() {
                self.stats.categories_empty += 1;
                tracing::info!("{} has no products", name);
                continue;
            }

            self.stats.products += records.len() as u64;
            row_sets.push(build_row_set(&name, &records, false)?);
        }

        self.stats.log_summary();
        Ok(row_sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalarValue;
    use httpmock::prelude::*;
    use serde_json::json;

    fn settings(server: &MockServer, product_path: &str, policy: FetchPolicy, excluded: &[&str]) -> ExtractSettings {
        ExtractSettings {
            category_url: server.url("/categories"),
            product_url: server.url(product_path),
            excluded_categories: excluded.iter().map(|s| s.to_string()).collect(),
            policy,
        }
    }

    async fn mock_woolworths_categories(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/categories");
                then.status(200).json_body(json!({
                    "ListTopLevelPiesCategories": {
                        "Categories": [
                            { "NodeId": "specialsgroup", "UrlFriendlyName": "specials", "Description": "Specials" },
                            { "NodeId": "1_DEB537E", "UrlFriendlyName": "bakery", "Description": "Bakery" },
                            { "NodeId": "1-E5BEE36E", "UrlFriendlyName": "fruit-veg", "Description": "Fruit & Veg" }
                        ]
                    }
                }));
            })
            .await;
    }

    #[tokio::test]
    async fn test_woolworths_pages_and_flattens() {
        let server = MockServer::start_async().await;
        mock_woolworths_categories(&server).await;

        let page_one = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/browse")
                    .header("cookie", "_abck=abc")
                    .json_body_partial(r#"{ "categoryId": "1_DEB537E", "pageNumber": 1 }"#);
                then.status(200).json_body(json!({
                    "TotalRecordCount": 30,
                    "Bundles": [ { "Products": [
                        { "Stockcode": 1, "Name": "Loaf", "AdditionalAttributes": { "brand": "A" } }
                    ] } ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/browse")
                    .json_body_partial(r#"{ "categoryId": "1_DEB537E", "pageNumber": 2 }"#);
                then.status(200).json_body(json!({
                    "TotalRecordCount": 30,
                    "Bundles": [ { "Products": [ { "Stockcode": 2, "Name": "Roll" } ] } ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/browse").json_body_partial(r#"{ "categoryId": "1-E5BEE36E" }"#);
                then.status(200).json_body(json!({ "TotalRecordCount": 0, "Bundles": [] }));
            })
            .await;

        let client = RetailerClient::new().unwrap();
        let mut extractor = WoolworthsExtractor::new(
            client,
            settings(&server, "/browse", FetchPolicy::FailFast, &["specials"]),
            Some("abc".to_string()),
        );
        let row_sets = extractor.run().await.unwrap();

        // Page one is requested once for the count and once for its products
        page_one.assert_hits_async(2).await;

        assert_eq!(row_sets.len(), 1);
        assert_eq!(row_sets[0].name, "Bakery");
        assert_eq!(row_sets[0].len(), 2);
        assert_eq!(row_sets[0].columns(), vec!["Stockcode", "Name", "AddAttrbrand"]);
        assert_eq!(row_sets[0].rows[1]["Stockcode"], ScalarValue::Integer(2));

        let stats = extractor.stats();
        assert_eq!(stats.categories_excluded, 1);
        assert_eq!(stats.categories_empty, 1);
        assert_eq!(stats.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_woolworths_fetches_cookie() {
        let server = MockServer::start_async().await;
        mock_woolworths_categories(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/browse");
                then.status(200).header("set-cookie", "_abck=from-server; Path=/");
            })
            .await;
        let browse = server
            .mock_async(|when, then| {
                when.method(POST).path("/browse").header("cookie", "_abck=from-server");
                then.status(200).json_body(json!({ "TotalRecordCount": 0, "Bundles": null }));
            })
            .await;

        let client = RetailerClient::new().unwrap();
        let mut extractor = WoolworthsExtractor::new(
            client,
            settings(&server, "/browse", FetchPolicy::FailFast, &["specials"]),
            None,
        );
        let row_sets = extractor.run().await.unwrap();

        assert!(row_sets.is_empty());
        browse.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_woolworths_category_list_failure_propagates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/categories");
                then.status(500);
            })
            .await;

        let client = RetailerClient::new().unwrap();
        let mut extractor =
            WoolworthsExtractor::new(client, settings(&server, "/browse", FetchPolicy::BestEffort, &[]), None);

        let err = extractor.run().await.unwrap_err();
        assert!(matches!(err, IngestError::Network { status: Some(500), .. }));
    }

    async fn mock_coles(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/categories").header("ocp-apim-subscription-key", "key-123");
                then.status(200).json_body(json!({
                    "catalogGroupView": [
                        { "id": 1, "name": "Back to School", "seoToken": "back-to-school" },
                        { "id": 2, "name": "Bakery", "seoToken": "bakery" },
                        { "id": 3, "name": "Dairy", "seoToken": "dairy-eggs-fridge" }
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/browse/bakery.json").query_param("slug", "bakery");
                then.status(200).json_body(json!({
                    "pageProps": { "searchResults": {
                        "noOfResults": 2,
                        "results": [
                            { "_type": "PRODUCT", "id": 10, "name": "Loaf", "pricing": { "now": 4.5 } },
                            { "_type": "SINGLE_TILE", "adId": "promo" },
                            { "_type": "PRODUCT", "id": 11, "name": "Roll", "pricing": { "now": 1 } }
                        ]
                    } }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/browse/dairy-eggs-fridge.json");
                then.status(503);
            })
            .await;
    }

    #[tokio::test]
    async fn test_coles_best_effort_skips_failed_category() {
        let server = MockServer::start_async().await;
        mock_coles(&server).await;

        let client = RetailerClient::new().unwrap();
        let mut extractor = ColesExtractor::new(
            client,
            settings(&server, "/browse/", FetchPolicy::BestEffort, &["back-to-school"]),
            Some("key-123".to_string()),
        );
        let row_sets = extractor.run().await.unwrap();

        assert_eq!(row_sets.len(), 1);
        assert_eq!(row_sets[0].name, "Bakery");
        assert_eq!(row_sets[0].table_name(), "raw_BakeryProducts");
        assert_eq!(row_sets[0].len(), 2);
        assert_eq!(row_sets[0].columns(), vec!["_type", "id", "name", "pricing.now"]);

        let stats = extractor.stats();
        assert_eq!(stats.categories_extracted, 2);
        assert_eq!(stats.categories_failed, 1);
    }

    #[tokio::test]
    async fn test_coles_fail_fast_propagates() {
        let server = MockServer::start_async().await;
        mock_coles(&server).await;

        let client = RetailerClient::new().unwrap();
        let mut extractor = ColesExtractor::new(
            client,
            settings(&server, "/browse/", FetchPolicy::FailFast, &["back-to-school"]),
            Some("key-123".to_string()),
        );

        let err = extractor.run().await.unwrap_err();
        assert!(matches!(err, IngestError::Network { status: Some(503), .. }));
    }

    #[test]
    fn test_skip_or_fail() {
        let network: Result<()> = Err(IngestError::network("http://x", Some(500), "boom"));
        assert!(skip_or_fail(FetchPolicy::BestEffort, network, "page").unwrap().is_none());

        let network: Result<()> = Err(IngestError::network("http://x", Some(500), "boom"));
        assert!(skip_or_fail(FetchPolicy::FailFast, network, "page").is_err());

        // Database failures are never skipped
        let connection: Result<()> = Err(IngestError::Connection("down".to_string()));
        assert!(skip_or_fail(FetchPolicy::BestEffort, connection, "page").is_err());
    }
}
