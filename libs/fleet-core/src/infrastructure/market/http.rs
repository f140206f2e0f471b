//! `reqwest`-based adapter. The wire document shapes are intentionally
//! unspecified beyond what the normalized types need — rendering and the
//! real RPC/CLI protocol are external collaborators' concern.

use std::future::Future;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{
    decode_tag, BidDescriptor, DealStatus, MarketApi, OrderStatus, OrderSummary, TaskDescriptor,
    TaskStatus, TaskStatusKind, RETRY_ATTEMPTS, RETRY_SLEEP,
};
use crate::domain::{MarketError, MarketResult};

pub struct HttpMarketApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Run `f` up to [`RETRY_ATTEMPTS`] times, sleeping [`RETRY_SLEEP`]
    /// between attempts, returning the first success or `None` once
    /// attempts are exhausted. Never propagates the error across the
    /// MarketAPI boundary, per the retry policy.
    async fn retry_read<T, F, Fut>(&self, op: &str, mut f: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MarketResult<T>>,
    {
        for attempt in 1..=RETRY_ATTEMPTS {
            match f().await {
                Ok(value) => return Some(value),
                Err(e) if attempt < RETRY_ATTEMPTS => {
                    warn!(op, attempt, error = %e, "marketplace call failed, retrying");
                    tokio::time::sleep(RETRY_SLEEP).await;
                }
                Err(e) => {
                    warn!(op, attempt, error = %e, "marketplace call exhausted retries");
                }
            }
        }
        None
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> MarketResult<serde_json::Value> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl MarketApi for HttpMarketApi {
    async fn order_create(&self, bid: &BidDescriptor) -> MarketResult<Option<String>> {
        let body = json!({
            "duration": bid.duration_secs,
            "identity": bid.identity,
            "tag": super::encode_tag(&bid.tag),
            "price": bid.price_wei_per_sec.to_string(),
            "resources": {
                "network": bid.network,
                "benchmarks": {
                    "gpucount": bid.gpu_count,
                    "gpumem": bid.gpu_mem,
                    "ethhashrate": bid.eth_hashrate,
                }
            },
            "counterparty": bid.counterparty,
        });
        let resp = self.post_json("order/create", body).await?;
        Ok(resp.get("id").and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn order_list(&self, limit: u32) -> MarketResult<Vec<OrderSummary>> {
        let orders = self
            .retry_read("order_list", || {
                self.post_json("order/list", json!({ "limit": limit }))
            })
            .await
            .unwrap_or(serde_json::Value::Null);

        let Some(arr) = orders.get("orders").and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(arr.len());
        for o in arr {
            let (Some(id), Some(tag_wire), Some(price)) = (
                o.get("id").and_then(|v| v.as_str()),
                o.get("tag").and_then(|v| v.as_str()),
                o.get("price").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let tag = decode_tag(tag_wire)?;
            let price_wei_per_sec = price.parse().unwrap_or(0);
            out.push(OrderSummary {
                id: id.to_string(),
                tag,
                price_wei_per_sec,
            });
        }
        Ok(out)
    }

    async fn order_status(&self, id: &str) -> MarketResult<Option<OrderStatus>> {
        let resp = self
            .retry_read("order_status", || {
                self.post_json("order/status", json!({ "id": id }))
            })
            .await;
        let Some(resp) = resp else { return Ok(None) };

        let order_status = resp.get("orderStatus").and_then(|v| v.as_i64()).unwrap_or(0);
        let tag_wire = resp.get("tag").and_then(|v| v.as_str()).unwrap_or("");
        let deal_id = resp.get("dealID").and_then(|v| v.as_str()).unwrap_or("0");

        Ok(Some(OrderStatus {
            closed: order_status == 1,
            tag: decode_tag(tag_wire)?,
            deal_id: if deal_id == "0" { None } else { Some(deal_id.to_string()) },
        }))
    }

    async fn deal_list(&self, limit: u32) -> MarketResult<Vec<String>> {
        let resp = self
            .retry_read("deal_list", || {
                self.post_json("deal/list", json!({ "limit": limit }))
            })
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok(resp
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|d| d.get("id").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn deal_status(&self, id: &str) -> MarketResult<Option<DealStatus>> {
        let resp = self
            .retry_read("deal_status", || {
                self.post_json("deal/status", json!({ "id": id }))
            })
            .await;
        let Some(resp) = resp else { return Ok(None) };

        let status = resp.get("status").and_then(|v| v.as_i64()).unwrap_or(0);
        let bid_id = resp.get("bidID").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let running_task_ids = resp
            .get("running")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let worker_offline = resp.get("workerOffline").and_then(|v| v.as_bool()).unwrap_or(false);
        let price_wei_per_sec = resp
            .get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(Some(DealStatus {
            closed: status == 2,
            bid_id,
            running_task_ids,
            worker_offline,
            price_wei_per_sec,
        }))
    }

    async fn deal_close(&self, id: &str, blacklist: bool) -> MarketResult<()> {
        let result = self
            .retry_read("deal_close", || {
                self.post_json("deal/close", json!({ "id": id, "blacklist": blacklist }))
            })
            .await;
        if result.is_none() {
            return Err(MarketError::Transient(format!("deal_close({id}) exhausted retries")));
        }
        Ok(())
    }

    async fn task_start(&self, deal_id: &str, task: &TaskDescriptor) -> MarketResult<Option<String>> {
        // TaskStart is non-retryable at the transport level; the state
        // machine retries the whole step by staying in STARTING_TASK.
        let resp = self
            .post_json(
                "task/start",
                json!({ "dealId": deal_id, "task": task.rendered_yaml }),
            )
            .await?;
        Ok(resp.get("id").and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn task_status(&self, deal_id: &str, task_id: &str) -> MarketResult<Option<TaskStatus>> {
        let resp = self
            .retry_read("task_status", || {
                self.post_json("task/status", json!({ "dealId": deal_id, "taskId": task_id }))
            })
            .await;
        let Some(resp) = resp else { return Ok(None) };

        let status = resp.get("status").and_then(|v| v.as_i64()).unwrap_or(0);
        let uptime_secs = resp.get("uptime").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(Some(TaskStatus {
            status: TaskStatusKind::from_wire(status),
            uptime_secs,
        }))
    }

    async fn predict_bid(&self, resources_doc: &str) -> MarketResult<Option<f64>> {
        let resp = self
            .retry_read("predict_bid", || {
                self.post_json("predict/bid", json!({ "resources": resources_doc }))
            })
            .await;
        Ok(resp.and_then(|v| v.get("perHourUSD").and_then(|v| v.as_f64())))
    }

    async fn task_logs(&self, deal_id: &str, task_id: &str, n: u64, path: &str) -> MarketResult<()> {
        let _ = self
            .post_json(
                "task/logs",
                json!({ "dealId": deal_id, "taskId": task_id, "n": n, "path": path }),
            )
            .await;
        Ok(())
    }
}
