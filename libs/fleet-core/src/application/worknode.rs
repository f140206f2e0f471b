//! The per-node lifecycle state machine. One `WorkNode` drives one
//! configured node from `START` through to `WORK_COMPLETED`, retrying and
//! recovering on every external call per its own status.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::{Id, NodeTag, PriceHuman, State, WorkNodeState};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::descriptor::{build_bid, build_task, write_bid_file, write_task_file};
use crate::infrastructure::market::{MarketApi, TaskStatusKind};
use crate::infrastructure::pricing::{decide_order_price, usd_per_hour_to_wei_per_second};
use crate::infrastructure::ShutdownManager;

const LOG_TAIL_LINES: u64 = 1_000_000;

pub struct WorkNode {
    state: WorkNodeState,
    shared: Arc<RwLock<WorkNodeState>>,
    retire: Arc<AtomicBool>,
    out_dir: PathBuf,
    market: Arc<dyn MarketApi>,
    config: Arc<ConfigManager>,
    shutdown: Arc<ShutdownManager>,
}

impl WorkNode {
    pub fn new(
        initial: WorkNodeState,
        out_dir: PathBuf,
        market: Arc<dyn MarketApi>,
        config: Arc<ConfigManager>,
        shutdown: Arc<ShutdownManager>,
    ) -> Self {
        let shared = Arc::new(RwLock::new(initial.clone()));
        Self {
            state: initial,
            shared,
            retire: Arc::new(AtomicBool::new(true)),
            out_dir,
            market,
            config,
            shutdown,
        }
    }

    pub fn tag(&self) -> &NodeTag {
        &self.state.tag
    }

    pub fn snapshot(&self) -> WorkNodeState {
        self.state.clone()
    }

    /// A handle the fleet supervisor's printer can read from another task,
    /// updated after every tick. Cloning is what lets the printer survive
    /// past this `WorkNode` moving into its own spawned task.
    pub fn shared_state(&self) -> Arc<RwLock<WorkNodeState>> {
        Arc::clone(&self.shared)
    }

    /// A handle the supervisor flips to `false` on config reload when this
    /// node's tag has disappeared, independent of the process-wide shutdown
    /// flag (spec.md §4.5: retirement is per-node, not a full shutdown).
    pub fn retire_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.retire)
    }

    /// Drives the node to completion or until the supervisor signals stop.
    /// Never propagates an error across itself: an `Err` here means a true
    /// internal bug, not a marketplace hiccup, and the caller logs it and
    /// drops the node.
    pub async fn watch(&mut self) -> Result<(), String> {
        while self.shutdown.is_running()
            && self.retire.load(Ordering::Acquire)
            && self.state.status != State::WorkCompleted
        {
            let sleep = self.tick().await?;
            *self.shared.write() = self.state.clone();
            self.interruptible_sleep(sleep).await;
        }
        *self.shared.write() = self.state.clone();
        Ok(())
    }

    /// Like `ShutdownManager::interruptible_sleep`, but also wakes early
    /// when the supervisor retires this node on a config reload —
    /// retirement must not wait out the current tick's full sleep.
    async fn interruptible_sleep(&self, duration: Duration) {
        let check_interval = Duration::from_millis(50);
        let mut elapsed = Duration::ZERO;
        while elapsed < duration && self.shutdown.is_running() && self.retire.load(Ordering::Acquire) {
            tokio::time::sleep(check_interval.min(duration - elapsed)).await;
            elapsed += check_interval;
        }
    }

    /// Advance the state machine by exactly one step, returning the sleep
    /// duration the caller would normally wait before the next tick. Public
    /// so scenario tests can drive a node tick-by-tick without the real
    /// sleeps `watch` performs between steps.
    pub async fn tick(&mut self) -> Result<Duration, String> {
        match self.state.status {
            State::Start | State::CreateOrder => self.step_create_order().await,
            State::PlacingOrder => Ok(Duration::from_secs(60)),
            State::AwaitingDeal => self.step_awaiting_deal().await,
            State::DealOpened => self.step_deal_opened().await,
            State::DealDisappeared => {
                self.state.enter(State::CreateOrder);
                Ok(Duration::from_secs(1))
            }
            State::StartingTask | State::TaskRunning => self.step_task_running().await,
            State::TaskFailedToStart => {
                self.close_deal(true).await;
                self.state.enter(State::CreateOrder);
                Ok(Duration::from_secs(1))
            }
            State::TaskFailed | State::TaskBroken => {
                self.close_deal(false).await;
                self.state.enter(State::CreateOrder);
                Ok(Duration::from_secs(1))
            }
            State::TaskFinished => {
                self.close_deal(false).await;
                self.state.enter(State::WorkCompleted);
                Ok(Duration::from_secs(0))
            }
            State::WorkCompleted => Ok(Duration::from_secs(0)),
        }
    }

    fn task_config(&self) -> Option<crate::infrastructure::config::TaskConfig> {
        self.config.snapshot().nodes.get(&self.state.tag).cloned()
    }

    async fn step_create_order(&mut self) -> Result<Duration, String> {
        let Some(task) = self.task_config() else {
            warn!(tag = %self.state.tag, "node's tag no longer present in config, stopping");
            self.retire.store(false, Ordering::Release);
            return Ok(Duration::from_secs(0));
        };

        let predicted = self
            .market
            .predict_bid(&format!(
                "{{gpucount:{},gpumem:{},ethhashrate:{}}}",
                task.gpucount, task.gpumem, task.ethhashrate
            ))
            .await
            .unwrap_or(None)
            .and_then(Decimal::from_f64_retain);

        let max_price = task.max_price.and_then(Decimal::from_f64_retain);

        let price = match decide_order_price(self.state.tag.as_str(), predicted, max_price, task.price_coefficient) {
            Ok(p) => p,
            Err(e) => {
                warn!(tag = %self.state.tag, error = %e, "cannot price order this tick");
                return Ok(Duration::from_secs(60));
            }
        };
        let price_wei_per_sec = usd_per_hour_to_wei_per_second(price);

        let bid = build_bid(&self.state.tag, price_wei_per_sec, &task);
        let _ = write_bid_file(&self.out_dir, &self.state.tag, &bid);

        self.state.enter(State::PlacingOrder);
        match self.market.order_create(&bid).await {
            Ok(Some(id)) => {
                info!(tag = %self.state.tag, order_id = %id, "order created");
                self.state.order_id = Id::some(id);
                self.state.price = Some(PriceHuman(price));
                self.state.enter(State::AwaitingDeal);
                Ok(Duration::from_secs(60))
            }
            _ => {
                self.state.enter(State::CreateOrder);
                Ok(Duration::from_secs(60))
            }
        }
    }

    async fn step_awaiting_deal(&mut self) -> Result<Duration, String> {
        let Some(order_id) = self.state.order_id.as_deref().map(str::to_string) else {
            self.state.enter(State::CreateOrder);
            return Ok(Duration::from_secs(1));
        };

        let Ok(Some(status)) = self.market.order_status(&order_id).await else {
            return Ok(Duration::from_secs(60));
        };

        if status.closed {
            match status.deal_id {
                Some(deal_id) => {
                    info!(tag = %self.state.tag, deal_id = %deal_id, "deal opened");
                    self.state.deal_id = Id::some(deal_id);
                    self.state.status = State::DealOpened;
                    Ok(Duration::from_secs(15))
                }
                None => {
                    self.state.order_id = Id::none();
                    self.state.enter(State::CreateOrder);
                    Ok(Duration::from_secs(1))
                }
            }
        } else {
            Ok(Duration::from_secs(60))
        }
    }

    async fn step_deal_opened(&mut self) -> Result<Duration, String> {
        let Some(deal_id) = self.state.deal_id.as_deref().map(str::to_string) else {
            return Err("DEAL_OPENED with no dealId".to_string());
        };
        let Some(task) = self.task_config() else {
            return Ok(Duration::from_secs(60));
        };

        let task_doc = build_task(&task.template_file, &self.state.tag)
            .map_err(|e| format!("building task descriptor: {e}"))?;
        let _ = write_task_file(&self.out_dir, &self.state.tag, &task_doc);

        match self.market.task_start(&deal_id, &task_doc).await {
            Ok(Some(task_id)) => {
                info!(tag = %self.state.tag, task_id = %task_id, "task started");
                self.state.task_id = Id::some(task_id);
                self.state.status = State::TaskRunning;
                Ok(Duration::from_secs(60))
            }
            _ => {
                self.state.status = State::TaskFailedToStart;
                Ok(Duration::from_secs(1))
            }
        }
    }

    async fn step_task_running(&mut self) -> Result<Duration, String> {
        let Some(deal_id) = self.state.deal_id.as_deref().map(str::to_string) else {
            return Err("TASK_RUNNING with no dealId".to_string());
        };
        let Some(task_id) = self.state.task_id.as_deref().map(str::to_string) else {
            return Err("TASK_RUNNING with no taskId".to_string());
        };

        match self.market.deal_status(&deal_id).await {
            Ok(Some(deal)) if deal.closed => {
                info!(tag = %self.state.tag, "deal disappeared underneath the running task");
                self.state.enter(State::DealDisappeared);
                return Ok(Duration::from_secs(1));
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return Ok(Duration::from_secs(60)),
        }

        let Ok(Some(task_status)) = self.market.task_status(&deal_id, &task_id).await else {
            self.state.status = State::TaskFailed;
            return Ok(Duration::from_secs(1));
        };

        let ets = self.task_config().map(|t| t.ets).unwrap_or(300);

        match task_status.status {
            TaskStatusKind::Running => {
                self.state.task_uptime_secs = task_status.uptime_secs;
                debug!(tag = %self.state.tag, uptime = task_status.uptime_secs, "task running");
                self.state.status = State::TaskRunning;
                Ok(Duration::from_secs(60))
            }
            TaskStatusKind::Spooling => {
                self.state.status = State::StartingTask;
                Ok(Duration::from_secs(60))
            }
            TaskStatusKind::Broken => {
                if task_status.uptime_secs < ets {
                    self.state.status = State::TaskFailedToStart;
                } else {
                    self.state.status = State::TaskBroken;
                }
                Ok(Duration::from_secs(0))
            }
            TaskStatusKind::Finished => {
                self.state.status = State::TaskFinished;
                Ok(Duration::from_secs(0))
            }
            TaskStatusKind::Unknown | TaskStatusKind::Spawning => Ok(Duration::from_secs(60)),
        }
    }

    /// Close-deal step: fetch status first (skip the close call if already
    /// closed, but still capture logs), then clear deal-scoped ids.
    async fn close_deal(&mut self, blacklist: bool) {
        let Some(deal_id) = self.state.deal_id.as_deref().map(str::to_string) else {
            return;
        };
        let task_id = self.state.task_id.as_deref().map(str::to_string);

        if let Some(task_id) = &task_id {
            let failure = blacklist
                || self.state.status == State::TaskBroken
                || self.state.status == State::TaskFailed;
            let log_path = self.log_path(&deal_id, failure);
            let _ = self
                .market
                .task_logs(&deal_id, task_id, LOG_TAIL_LINES, &log_path)
                .await;
        }

        let already_closed = matches!(self.market.deal_status(&deal_id).await, Ok(Some(d)) if d.closed);
        if !already_closed {
            if let Err(e) = self.market.deal_close(&deal_id, blacklist).await {
                warn!(tag = %self.state.tag, deal_id = %deal_id, error = %e, "deal_close failed");
            } else {
                info!(tag = %self.state.tag, deal_id = %deal_id, blacklist, "deal closed");
            }
        }
    }

    fn log_path(&self, deal_id: &str, failure: bool) -> String {
        let prefix = if failure { "fail" } else { "success" };
        self.out_dir
            .join(format!("{prefix}_{}-deal-{deal_id}.log", self.state.tag))
            .display()
            .to_string()
    }
}
