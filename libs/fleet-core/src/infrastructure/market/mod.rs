//! The marketplace-facing action layer: normalized operations, retry
//! policy, and the tag/price wire conversions. The real RPC/CLI wire
//! protocol is out of scope; [`HttpMarketApi`] is a thin, deliberately
//! opaque adapter and [`MockMarketApi`] is the programmable double the
//! state-machine tests drive.

mod http;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub use http::HttpMarketApi;
pub use mock::{MockMarketApi, RecordedCall};

use crate::domain::MarketResult;

pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_SLEEP: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatusKind {
    Unknown,
    Spooling,
    Spawning,
    Running,
    Finished,
    Broken,
}

impl TaskStatusKind {
    pub fn from_wire(code: i64) -> Self {
        match code {
            1 => TaskStatusKind::Spooling,
            2 => TaskStatusKind::Spawning,
            3 => TaskStatusKind::Running,
            4 => TaskStatusKind::Finished,
            5 => TaskStatusKind::Broken,
            _ => TaskStatusKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub id: String,
    pub tag: String,
    pub price_wei_per_sec: u128,
}

#[derive(Debug, Clone)]
pub struct OrderStatus {
    /// `false` == still open.
    pub closed: bool,
    pub tag: String,
    pub deal_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DealStatus {
    pub closed: bool,
    pub bid_id: String,
    pub running_task_ids: Vec<String>,
    pub worker_offline: bool,
    pub price_wei_per_sec: u128,
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub status: TaskStatusKind,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BidDescriptor {
    pub duration_secs: u64,
    pub identity: String,
    pub tag: String,
    pub price_wei_per_sec: u128,
    pub network: String,
    pub gpu_count: u32,
    pub gpu_mem: u64,
    pub eth_hashrate: u64,
    pub counterparty: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub rendered_yaml: String,
}

/// The normalized operations the state machine and fleet supervisor rely
/// on. All ten operations from the marketplace's order/deal/task/predict
/// surface live behind this one trait.
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn order_create(&self, bid: &BidDescriptor) -> MarketResult<Option<String>>;
    async fn order_list(&self, limit: u32) -> MarketResult<Vec<OrderSummary>>;
    async fn order_status(&self, id: &str) -> MarketResult<Option<OrderStatus>>;
    async fn deal_list(&self, limit: u32) -> MarketResult<Vec<String>>;
    async fn deal_status(&self, id: &str) -> MarketResult<Option<DealStatus>>;
    async fn deal_close(&self, id: &str, blacklist: bool) -> MarketResult<()>;
    async fn task_start(&self, deal_id: &str, task: &TaskDescriptor) -> MarketResult<Option<String>>;
    async fn task_status(&self, deal_id: &str, task_id: &str) -> MarketResult<Option<TaskStatus>>;
    async fn predict_bid(&self, resources_doc: &str) -> MarketResult<Option<f64>>;
    async fn task_logs(&self, deal_id: &str, task_id: &str, n: u64, path: &str) -> MarketResult<()>;
}

/// Base64-decode a wire tag, stripping trailing NULs.
pub fn decode_tag(wire: &str) -> MarketResult<String> {
    let bytes = BASE64
        .decode(wire)
        .map_err(|e| crate::domain::MarketError::Logical(format!("bad tag encoding: {e}")))?;
    let trimmed: Vec<u8> = bytes.into_iter().rev().skip_while(|b| *b == 0).collect();
    let trimmed: Vec<u8> = trimmed.into_iter().rev().collect();
    String::from_utf8(trimmed)
        .map_err(|e| crate::domain::MarketError::Logical(format!("tag is not valid UTF-8: {e}")))
}

/// Base64-encode a tag for the wire, as the marketplace expects it.
pub fn encode_tag(tag: &str) -> String {
    BASE64.encode(tag.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_strips_trailing_nul_padding() {
        let padded = BASE64.encode(b"gpu-worker-1\0\0\0\0");
        assert_eq!(decode_tag(&padded).unwrap(), "gpu-worker-1");
    }

    proptest! {
        #[test]
        fn tag_round_trips(tag in "[a-zA-Z0-9_-]{1,32}") {
            let wire = encode_tag(&tag);
            let back = decode_tag(&wire).unwrap();
            prop_assert_eq!(back, tag);
        }
    }
}
