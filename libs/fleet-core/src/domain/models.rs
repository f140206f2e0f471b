//! Core data model: node identity, lifecycle state, and the fleet-wide
//! per-node record the supervisor and state machine share.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A node's tag, formed as `<task-tag>_<ordinal>`. Natural string order is
/// the sort order the fleet printer uses, except when two tags share a
/// base name and differ only by a numeric ordinal suffix (`gpu_2` vs.
/// `gpu_10`), in which case the ordinal is compared numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTag(pub String);

impl NodeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into (base, ordinal) if the tag ends in a numeric suffix.
    fn split_ordinal(&self) -> (&str, Option<u32>) {
        let digits_at = self.0.len() - self.0.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits_at == 0 {
            return (&self.0, None);
        }
        let (base, digits) = self.0.split_at(self.0.len() - digits_at);
        (base, digits.parse().ok())
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for NodeTag {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeTag {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let (base_a, ord_a) = self.split_ordinal();
        let (base_b, ord_b) = other.split_ordinal();
        match (base_a == base_b, ord_a, ord_b) {
            (true, Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

/// An order, deal, or task identifier as returned by the marketplace. The
/// empty string on the wire becomes `None` here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Id(pub Option<String>);

impl Id {
    pub const fn none() -> Self {
        Self(None)
    }

    pub fn some(id: impl Into<String>) -> Self {
        Self(Some(id.into()))
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_deref().unwrap_or(""))
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::none()
    }
}

/// A price expressed in USD/hour for humans, backed by an exact decimal so
/// the wei<->USD round trip in the pricing module never drifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHuman(pub Decimal);

impl fmt::Display for PriceHuman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} USD/h", self.0)
    }
}

/// The thirteen lifecycle states a work node moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Start,
    CreateOrder,
    PlacingOrder,
    AwaitingDeal,
    DealOpened,
    DealDisappeared,
    StartingTask,
    TaskRunning,
    TaskFailed,
    TaskFailedToStart,
    TaskBroken,
    TaskFinished,
    WorkCompleted,
}

impl State {
    /// Invariant 1: these statuses require a live `dealId`.
    pub fn requires_deal(self) -> bool {
        matches!(
            self,
            State::DealOpened
                | State::StartingTask
                | State::TaskRunning
                | State::TaskFailed
                | State::TaskFailedToStart
                | State::TaskBroken
                | State::TaskFinished
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Start => "START",
            State::CreateOrder => "CREATE_ORDER",
            State::PlacingOrder => "PLACING_ORDER",
            State::AwaitingDeal => "AWAITING_DEAL",
            State::DealOpened => "DEAL_OPENED",
            State::DealDisappeared => "DEAL_DISAPPEARED",
            State::StartingTask => "STARTING_TASK",
            State::TaskRunning => "TASK_RUNNING",
            State::TaskFailed => "TASK_FAILED",
            State::TaskFailedToStart => "TASK_FAILED_TO_START",
            State::TaskBroken => "TASK_BROKEN",
            State::TaskFinished => "TASK_FINISHED",
            State::WorkCompleted => "WORK_COMPLETED",
        };
        write!(f, "{s}")
    }
}

/// The full per-node record the state machine owns and the fleet printer
/// reads. Field-clearing on transition is enforced by
/// `WorkNodeState::enter`, never by callers mutating fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkNodeState {
    pub tag: NodeTag,
    pub status: State,
    pub order_id: Id,
    pub deal_id: Id,
    pub task_id: Id,
    pub price: Option<PriceHuman>,
    pub task_uptime_secs: u64,
}

impl WorkNodeState {
    pub fn fresh(tag: NodeTag) -> Self {
        Self {
            tag,
            status: State::Start,
            order_id: Id::none(),
            deal_id: Id::none(),
            task_id: Id::none(),
            price: None,
            task_uptime_secs: 0,
        }
    }

    /// Move to `next`, clearing whatever fields that state's invariants say
    /// must be empty on entry (spec invariant 2: `CREATE_ORDER` and
    /// `WORK_COMPLETED` clear `dealId`, `orderId`, `taskId`, `taskUptime`;
    /// `DEAL_DISAPPEARED` clears `dealId`/`taskId`/`taskUptime` but leaves
    /// `orderId` alone, since it is still meaningful there until the retry
    /// path re-enters `CREATE_ORDER`).
    pub fn enter(&mut self, next: State) {
        match next {
            State::CreateOrder | State::WorkCompleted => {
                self.order_id = Id::none();
                self.deal_id = Id::none();
                self.task_id = Id::none();
                self.task_uptime_secs = 0;
            }
            State::DealDisappeared => {
                self.deal_id = Id::none();
                self.task_id = Id::none();
                self.task_uptime_secs = 0;
            }
            _ => {}
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_aware_ordering() {
        let mut tags = vec![
            NodeTag::new("gpu-worker-10"),
            NodeTag::new("gpu-worker-2"),
            NodeTag::new("gpu-worker-1"),
        ];
        tags.sort();
        assert_eq!(
            tags,
            vec![
                NodeTag::new("gpu-worker-1"),
                NodeTag::new("gpu-worker-2"),
                NodeTag::new("gpu-worker-10"),
            ]
        );
    }

    #[test]
    fn different_base_falls_back_to_string_order() {
        let mut tags = vec![NodeTag::new("zeta-1"), NodeTag::new("alpha-1")];
        tags.sort();
        assert_eq!(tags, vec![NodeTag::new("alpha-1"), NodeTag::new("zeta-1")]);
    }

    #[test]
    fn entering_create_order_clears_downstream_ids() {
        let mut node = WorkNodeState::fresh(NodeTag::new("n1"));
        node.order_id = Id::some("order-1");
        node.deal_id = Id::some("deal-1");
        node.task_id = Id::some("task-1");
        node.task_uptime_secs = 120;

        node.enter(State::CreateOrder);

        assert_eq!(node.order_id, Id::none());
        assert_eq!(node.deal_id, Id::none());
        assert_eq!(node.task_id, Id::none());
        assert_eq!(node.task_uptime_secs, 0);
    }

    #[test]
    fn entering_work_completed_clears_order_id_too() {
        let mut node = WorkNodeState::fresh(NodeTag::new("n1"));
        node.order_id = Id::some("order-1");
        node.deal_id = Id::some("deal-1");
        node.task_id = Id::some("task-1");
        node.task_uptime_secs = 120;

        node.enter(State::WorkCompleted);

        assert_eq!(node.order_id, Id::none());
        assert_eq!(node.deal_id, Id::none());
        assert_eq!(node.task_id, Id::none());
        assert_eq!(node.task_uptime_secs, 0);
    }

    #[test]
    fn entering_deal_disappeared_leaves_order_id_alone() {
        let mut node = WorkNodeState::fresh(NodeTag::new("n1"));
        node.order_id = Id::some("order-1");
        node.deal_id = Id::some("deal-1");
        node.task_id = Id::some("task-1");
        node.task_uptime_secs = 120;

        node.enter(State::DealDisappeared);

        assert_eq!(node.order_id, Id::some("order-1"));
        assert_eq!(node.deal_id, Id::none());
        assert_eq!(node.task_id, Id::none());
        assert_eq!(node.task_uptime_secs, 0);
    }

    #[test]
    fn requires_deal_matches_invariant_1_exactly() {
        let expect_true = [
            State::DealOpened,
            State::StartingTask,
            State::TaskRunning,
            State::TaskFailed,
            State::TaskFailedToStart,
            State::TaskBroken,
            State::TaskFinished,
        ];
        let expect_false = [
            State::Start,
            State::CreateOrder,
            State::PlacingOrder,
            State::AwaitingDeal,
            State::DealDisappeared,
            State::WorkCompleted,
        ];

        for state in expect_true {
            assert!(state.requires_deal(), "{state} should require a live dealId");
        }
        for state in expect_false {
            assert!(!state.requires_deal(), "{state} should not require a live dealId");
        }
    }

    #[test]
    fn id_display_empty_for_none() {
        assert_eq!(Id::none().to_string(), "");
        assert_eq!(Id::some("abc").to_string(), "abc");
    }
}
