//! Item sinks and small item transforms, usable as pipeline processors.

pub mod disk;
pub mod logger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::module::{Item, ItemProcessor};
use crate::{CrawlError, CrawlResult, Stage};

pub use disk::DiskSink;
pub use logger::LogSink;

/// Declarative description of one pipeline step. Spider definitions carry a
/// list of these so they can be shipped to other nodes as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorSpec {
    Log,
    Disk { path: PathBuf },
    /// Fails items missing any of these fields, or holding an empty value there.
    /// With a fail-fast pipeline the later steps never see them.
    Require { fields: Vec<String> },
    Set { field: String, value: Value },
}

impl ProcessorSpec {
    pub async fn build(&self, spider_name: &str) -> CrawlResult<Arc<dyn ItemProcessor>> {
        let processor: Arc<dyn ItemProcessor> = match self {
            ProcessorSpec::Log => Arc::new(LogSink::new(spider_name)),
            ProcessorSpec::Disk { path } => Arc::new(DiskSink::new(path, spider_name).await?),
            ProcessorSpec::Require { fields } => Arc::new(RequireFields {
                fields: fields.clone(),
            }),
            ProcessorSpec::Set { field, value } => Arc::new(SetField {
                field: field.clone(),
                value: value.clone(),
            }),
        };
        Ok(processor)
    }
}

pub struct RequireFields {
    fields: Vec<String>,
}

#[async_trait]
impl ItemProcessor for RequireFields {
    async fn process(&self, item: &Item) -> CrawlResult<Item> {
        for field in &self.fields {
            let present = match item.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(values)) => !values.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(CrawlError::stage(
                    Stage::Process,
                    format!("missing field {:?}", field),
                    item_context(item),
                ));
            }
        }
        Ok(item.clone())
    }
}

pub struct SetField {
    field: String,
    value: Value,
}

#[async_trait]
impl ItemProcessor for SetField {
    async fn process(&self, item: &Item) -> CrawlResult<Item> {
        let mut item = item.clone();
        item.insert(self.field.clone(), self.value.clone());
        Ok(item)
    }
}

pub(crate) fn item_context(item: &Item) -> String {
    item.get("url")
        .and_then(Value::as_str)
        .unwrap_or("item")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_require_and_set() {
        let require = ProcessorSpec::Require {
            fields: vec!["title".into()],
        }
        .build("books")
        .await
        .unwrap();
        let set = ProcessorSpec::Set {
            field: "source".into(),
            value: json!("antnest"),
        }
        .build("books")
        .await
        .unwrap();

        let mut item = Item::new();
        item.insert("url".into(), json!("http://books.example.com/b/1"));
        let err = require.process(&item).await.unwrap_err();
        assert!(err.to_string().contains("title"));

        item.insert("title".into(), json!("One"));
        assert!(require.process(&item).await.is_ok());
        let item = set.process(&item).await.unwrap();
        assert_eq!(item["source"], "antnest");
    }

    #[test]
    fn test_processor_list_json() {
        let specs: Vec<ProcessorSpec> = serde_json::from_str(
            r#"[{"type":"log"},{"type":"disk","path":"data"},{"type":"require","fields":["a"]}]"#,
        )
        .unwrap();
        assert_eq!(specs[0], ProcessorSpec::Log);
        assert_eq!(specs[1], ProcessorSpec::Disk { path: "data".into() });
    }
}
