use serde::{Deserialize, Serialize};

use super::args::{DataArgs, RequestArgs};
use super::status::Status;
use crate::buffer::Pool;
use crate::module::ModuleSummary;
use crate::CrawlResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSummary {
    pub buffer_cap: usize,
    pub max_buffer_number: usize,
    pub buffer_number: usize,
    pub total: usize,
    pub closed: bool,
}

impl BufferSummary {
    pub fn of<T>(pool: &Pool<T>) -> Self {
        Self {
            buffer_cap: pool.buffer_cap(),
            max_buffer_number: pool.max_buffer_number(),
            buffer_number: pool.buffer_number(),
            total: pool.total(),
            closed: pool.is_closed(),
        }
    }
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedSummary {
    pub status: Status,
    pub request_args: Option<RequestArgs>,
    pub data_args: Option<DataArgs>,
    pub downloaders: Vec<ModuleSummary>,
    pub analyzers: Vec<ModuleSummary>,
    pub pipelines: Vec<ModuleSummary>,
    pub req_buffer: Option<BufferSummary>,
    pub resp_buffer: Option<BufferSummary>,
    pub item_buffer: Option<BufferSummary>,
    pub error_buffer: Option<BufferSummary>,
    pub url_number: usize,
    pub in_flight: usize,
}

impl SchedSummary {
    pub fn to_json_pretty(&self) -> CrawlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
