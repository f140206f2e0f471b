//! The fleet supervisor: startup reconciliation against the marketplace,
//! one concurrent worker per configured node, a periodic snapshot printer,
//! and hot config reload that adds or retires nodes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tabled::Tabled;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::worknode::WorkNode;
use crate::domain::{FleetError, Id, NodeTag, State, WorkNodeState};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::market::MarketApi;
use crate::infrastructure::ShutdownManager;

const RELOAD_INTERVAL: Duration = Duration::from_secs(60);
const PRINT_INTERVAL: Duration = Duration::from_secs(60);

/// Keyed by tag, shared with the printer task so it can read live state
/// without owning the `WorkNode` itself.
type SharedStates = Arc<RwLock<HashMap<NodeTag, Arc<RwLock<WorkNodeState>>>>>;

pub struct Fleet {
    market: Arc<dyn MarketApi>,
    config: Arc<ConfigManager>,
    shutdown: Arc<ShutdownManager>,
    out_dir: PathBuf,
}

impl Fleet {
    pub fn new(
        market: Arc<dyn MarketApi>,
        config: Arc<ConfigManager>,
        shutdown: Arc<ShutdownManager>,
        out_dir: PathBuf,
    ) -> Self {
        Self {
            market,
            config,
            shutdown,
            out_dir,
        }
    }

    /// Reconciles against the marketplace, runs every node to completion or
    /// until the operator interrupts, and returns once every worker has
    /// exited.
    pub async fn run(&self) -> Result<(), FleetError> {
        let states: SharedStates = Arc::new(RwLock::new(HashMap::new()));
        let mut handles: HashMap<NodeTag, JoinHandle<()>> = HashMap::new();
        let mut retire_flags: HashMap<NodeTag, Arc<AtomicBool>> = HashMap::new();

        let initial = self.reconcile().await?;
        info!(nodes = initial.len(), "startup reconciliation complete");
        for state in initial {
            self.spawn_worker(state, &states, &mut handles, &mut retire_flags);
        }

        let printer_done = Arc::new(AtomicBool::new(false));
        let printer = self.spawn_printer(Arc::clone(&states), Arc::clone(&printer_done));

        loop {
            if handles.is_empty() {
                info!("every configured node reached WORK_COMPLETED, fleet finished");
                break;
            }
            if !self.shutdown.is_running() {
                break;
            }
            self.shutdown.interruptible_sleep(RELOAD_INTERVAL).await;
            if !self.shutdown.is_running() {
                break;
            }

            self.reload_and_rebalance(&states, &mut handles, &mut retire_flags);

            handles.retain(|tag, handle| {
                let finished = handle.is_finished();
                if finished {
                    debug!(tag = %tag, "node task finished, dropping from tracker");
                }
                !finished
            });
        }

        printer_done.store(true, Ordering::Release);
        printer.abort();

        for (tag, handle) in handles.drain() {
            if let Err(e) = handle.await {
                warn!(tag = %tag, error = %e, "node task failed to join");
            }
        }

        Ok(())
    }

    /// spec.md §4.5: query active deals first and adopt their tags, then
    /// unmatched open orders, then any configured node still untouched.
    async fn reconcile(&self) -> Result<Vec<WorkNodeState>, FleetError> {
        let snapshot = self.config.snapshot();
        let mut adopted: HashMap<NodeTag, WorkNodeState> = HashMap::new();

        let deal_ids = self
            .market
            .deal_list(10_000)
            .await
            .map_err(|e| FleetError::Reconciliation(format!("DealList failed: {e}")))?;

        for deal_id in deal_ids {
            let Ok(Some(deal)) = self.market.deal_status(&deal_id).await else {
                continue;
            };
            let Ok(Some(order)) = self.market.order_status(&deal.bid_id).await else {
                continue;
            };
            let tag = NodeTag::new(order.tag.clone());
            if !snapshot.nodes.contains_key(&tag) {
                continue;
            }
            if let Some(existing) = adopted.get(&tag) {
                warn!(
                    tag = %tag,
                    kept_deal = %existing.deal_id,
                    other_deal = %deal_id,
                    "duplicate deal match for tag during reconciliation, keeping the first seen"
                );
                continue;
            }

            let mut state = WorkNodeState::fresh(tag.clone());
            state.order_id = Id::some(deal.bid_id.clone());
            state.deal_id = Id::some(deal_id.clone());
            state.status = if let Some(task_id) = deal.running_task_ids.first() {
                state.task_id = Id::some(task_id.clone());
                State::TaskRunning
            } else if deal.worker_offline {
                State::TaskFailed
            } else {
                State::DealOpened
            };
            adopted.insert(tag, state);
        }

        let mut seen: HashSet<NodeTag> = adopted.keys().cloned().collect();
        let mut result: Vec<WorkNodeState> = adopted.into_values().collect();

        let orders = self
            .market
            .order_list(10_000)
            .await
            .map_err(|e| FleetError::Reconciliation(format!("OrderList failed: {e}")))?;
        for order in orders {
            let tag = NodeTag::new(order.tag.clone());
            if seen.contains(&tag) || !snapshot.nodes.contains_key(&tag) {
                continue;
            }
            let mut state = WorkNodeState::fresh(tag.clone());
            state.order_id = Id::some(order.id);
            state.status = State::AwaitingDeal;
            seen.insert(tag);
            result.push(state);
        }

        for tag in snapshot.nodes.keys() {
            if !seen.contains(tag) {
                result.push(WorkNodeState::fresh(tag.clone()));
            }
        }

        Ok(result)
    }

    fn spawn_worker(
        &self,
        state: WorkNodeState,
        states: &SharedStates,
        handles: &mut HashMap<NodeTag, JoinHandle<()>>,
        retire_flags: &mut HashMap<NodeTag, Arc<AtomicBool>>,
    ) {
        let tag = state.tag.clone();
        let mut node = WorkNode::new(
            state,
            self.out_dir.clone(),
            Arc::clone(&self.market),
            Arc::clone(&self.config),
            Arc::clone(&self.shutdown),
        );

        states.write().insert(tag.clone(), node.shared_state());
        retire_flags.insert(tag.clone(), node.retire_handle());

        let log_tag = tag.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = node.watch().await {
                error!(tag = %log_tag, error = %e, "node loop failed");
            }
        });
        handles.insert(tag, handle);
    }

    /// Every 60s: reload config, retire nodes whose tag disappeared, spawn
    /// workers for newly added tags. Nodes that keep their tag pick up any
    /// changed pricing/resource fields on their own next time they read the
    /// config snapshot from `CREATE_ORDER`.
    fn reload_and_rebalance(
        &self,
        states: &SharedStates,
        handles: &mut HashMap<NodeTag, JoinHandle<()>>,
        retire_flags: &mut HashMap<NodeTag, Arc<AtomicBool>>,
    ) {
        if let Err(e) = self.config.reload() {
            error!(error = %e, "config reload failed, keeping previous snapshot");
            return;
        }

        let snapshot = self.config.snapshot();
        let configured: HashSet<NodeTag> = snapshot.nodes.keys().cloned().collect();

        let retiring: Vec<NodeTag> = handles.keys().filter(|t| !configured.contains(*t)).cloned().collect();
        for tag in retiring {
            if let Some(flag) = retire_flags.remove(&tag) {
                flag.store(false, Ordering::Release);
            }
            states.write().remove(&tag);
            info!(tag = %tag, "retiring node absent from reloaded config");
        }

        let new_tags: Vec<NodeTag> = configured.into_iter().filter(|t| !handles.contains_key(t)).collect();
        for tag in new_tags {
            info!(tag = %tag, "spawning worker for newly added tag");
            self.spawn_worker(WorkNodeState::fresh(tag), states, handles, retire_flags);
        }
    }

    fn spawn_printer(&self, states: SharedStates, done: Arc<AtomicBool>) -> JoinHandle<()> {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            while shutdown.is_running() && !done.load(Ordering::Acquire) {
                shutdown.interruptible_sleep(PRINT_INTERVAL).await;
                if !shutdown.is_running() || done.load(Ordering::Acquire) {
                    break;
                }
                print_snapshot(&states);
            }
        })
    }
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "tag")]
    tag: String,
    #[tabled(rename = "order id")]
    order_id: String,
    #[tabled(rename = "price")]
    price: String,
    #[tabled(rename = "deal id")]
    deal_id: String,
    #[tabled(rename = "task id")]
    task_id: String,
    #[tabled(rename = "task uptime (s)")]
    task_uptime: String,
    #[tabled(rename = "status")]
    status: String,
}

fn print_snapshot(states: &SharedStates) {
    let mut entries: Vec<(NodeTag, WorkNodeState)> = states
        .read()
        .iter()
        .map(|(tag, s)| (tag.clone(), s.read().clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if entries.is_empty() {
        info!("fleet snapshot: no active nodes");
        return;
    }

    let rows: Vec<Row> = entries
        .into_iter()
        .map(|(tag, s)| Row {
            tag: tag.0,
            order_id: s.order_id.to_string(),
            price: s.price.map(|p| p.to_string()).unwrap_or_default(),
            deal_id: s.deal_id.to_string(),
            task_id: s.task_id.to_string(),
            task_uptime: s.task_uptime_secs.to_string(),
            status: s.status.to_string(),
        })
        .collect();

    let table = tabled::Table::new(rows).to_string();
    info!("fleet snapshot:\n{table}");
}
