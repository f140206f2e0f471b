//! Programmable in-memory double for driving the state machine in tests
//! without a real marketplace. Not gated behind `#[cfg(test)]` so both
//! this crate's unit tests and the binary's integration tests can use it.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    BidDescriptor, DealStatus, MarketApi, OrderStatus, OrderSummary, TaskDescriptor, TaskStatus,
};
use crate::domain::MarketResult;

#[derive(Debug, Clone)]
pub enum RecordedCall {
    OrderCreate,
    OrderStatus(String),
    DealStatus(String),
    DealClose { id: String, blacklist: bool },
    TaskStart { deal_id: String },
    TaskStatus { deal_id: String, task_id: String },
    TaskLogs { deal_id: String, task_id: String, path: String },
}

#[derive(Default)]
struct Queues {
    order_create: VecDeque<MarketResult<Option<String>>>,
    order_status: VecDeque<MarketResult<Option<OrderStatus>>>,
    deal_status: VecDeque<MarketResult<Option<DealStatus>>>,
    task_start: VecDeque<MarketResult<Option<String>>>,
    task_status: VecDeque<MarketResult<Option<TaskStatus>>>,
}

/// A queue-backed [`MarketApi`]: push expected responses with the
/// `push_*` methods, then drive a `WorkNode` against it. Every call is
/// recorded so scenario tests can assert on the exact sequence observed
/// (e.g. "`DealClose` with `blacklist=true` exactly once").
pub struct MockMarketApi {
    queues: Mutex<Queues>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockMarketApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketApi {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_order_create(&self, result: MarketResult<Option<String>>) {
        self.queues.lock().unwrap().order_create.push_back(result);
    }

    pub fn push_order_status(&self, result: MarketResult<Option<OrderStatus>>) {
        self.queues.lock().unwrap().order_status.push_back(result);
    }

    pub fn push_deal_status(&self, result: MarketResult<Option<DealStatus>>) {
        self.queues.lock().unwrap().deal_status.push_back(result);
    }

    pub fn push_task_start(&self, result: MarketResult<Option<String>>) {
        self.queues.lock().unwrap().task_start.push_back(result);
    }

    pub fn push_task_status(&self, result: MarketResult<Option<TaskStatus>>) {
        self.queues.lock().unwrap().task_status.push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl MarketApi for MockMarketApi {
    async fn order_create(&self, _bid: &BidDescriptor) -> MarketResult<Option<String>> {
        self.calls.lock().unwrap().push(RecordedCall::OrderCreate);
        self.queues
            .lock()
            .unwrap()
            .order_create
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn order_list(&self, _limit: u32) -> MarketResult<Vec<OrderSummary>> {
        Ok(Vec::new())
    }

    async fn order_status(&self, id: &str) -> MarketResult<Option<OrderStatus>> {
        self.calls.lock().unwrap().push(RecordedCall::OrderStatus(id.to_string()));
        self.queues
            .lock()
            .unwrap()
            .order_status
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn deal_list(&self, _limit: u32) -> MarketResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn deal_status(&self, id: &str) -> MarketResult<Option<DealStatus>> {
        self.calls.lock().unwrap().push(RecordedCall::DealStatus(id.to_string()));
        self.queues
            .lock()
            .unwrap()
            .deal_status
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn deal_close(&self, id: &str, blacklist: bool) -> MarketResult<()> {
        self.calls.lock().unwrap().push(RecordedCall::DealClose {
            id: id.to_string(),
            blacklist,
        });
        Ok(())
    }

    async fn task_start(&self, deal_id: &str, _task: &TaskDescriptor) -> MarketResult<Option<String>> {
        self.calls.lock().unwrap().push(RecordedCall::TaskStart {
            deal_id: deal_id.to_string(),
        });
        self.queues
            .lock()
            .unwrap()
            .task_start
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn task_status(&self, deal_id: &str, task_id: &str) -> MarketResult<Option<TaskStatus>> {
        self.calls.lock().unwrap().push(RecordedCall::TaskStatus {
            deal_id: deal_id.to_string(),
            task_id: task_id.to_string(),
        });
        self.queues
            .lock()
            .unwrap()
            .task_status
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn predict_bid(&self, _resources_doc: &str) -> MarketResult<Option<f64>> {
        Ok(None)
    }

    async fn task_logs(&self, deal_id: &str, task_id: &str, _n: u64, path: &str) -> MarketResult<()> {
        self.calls.lock().unwrap().push(RecordedCall::TaskLogs {
            deal_id: deal_id.to_string(),
            task_id: task_id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }
}

