use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::http::Request;

/// Extracted datum: field name to value, keys kept in order.
pub type Item = BTreeMap<String, Value>;

/// Output of an analyzer: either another request to crawl or an item to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Data {
    Request(Request),
    Item(Item),
}

impl From<Request> for Data {
    fn from(request: Request) -> Self {
        Data::Request(request)
    }
}

impl From<Item> for Data {
    fn from(item: Item) -> Self {
        Data::Item(item)
    }
}
