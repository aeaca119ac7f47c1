use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::models::{CapitalRecord, ClosedPeriod, Expense, Settings, Trade};
use crate::stats::{AnalyticsReport, SummaryReport};
use crate::yen::YenProfitLossRecord;

/// A mutation of the trade collection.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeChange {
    Added(Trade),
    BulkAdded(Vec<Trade>),
    Updated(Trade),
    Deleted(Trade),
}

impl TradeChange {
    pub fn action(&self) -> &'static str {
        match self {
            TradeChange::Added(_) => "add",
            TradeChange::BulkAdded(_) => "bulk-add",
            TradeChange::Updated(_) => "update",
            TradeChange::Deleted(_) => "delete",
        }
    }

    pub fn trades(&self) -> &[Trade] {
        match self {
            TradeChange::Added(t) | TradeChange::Updated(t) | TradeChange::Deleted(t) => {
                std::slice::from_ref(t)
            }
            TradeChange::BulkAdded(ts) => ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JournalEvent {
    Trade(TradeChange),
    YenProfitLossUpdated {
        trade_id: String,
        record: YenProfitLossRecord,
    },
    YenProfitLossDeleted {
        trade_id: String,
    },
    SummaryCalculated(SummaryReport),
    AnalyticsCalculated(AnalyticsReport),
    CapitalRecordAdded {
        record: CapitalRecord,
        balance: f64,
    },
    CapitalRecordDeleted {
        id: String,
        balance: f64,
    },
    ExpenseAdded(Expense),
    ExpenseDeleted {
        id: String,
    },
    PeriodClosed(ClosedPeriod),
    SettingsUpdated(Settings),
}

impl JournalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JournalEvent::Trade(TradeChange::Added(_)) => "trade:added",
            JournalEvent::Trade(TradeChange::BulkAdded(_)) => "trade:bulkAdded",
            JournalEvent::Trade(TradeChange::Updated(_)) => "trade:updated",
            JournalEvent::Trade(TradeChange::Deleted(_)) => "trade:deleted",
            JournalEvent::YenProfitLossUpdated { .. } => "yenProfitLoss:updated",
            JournalEvent::YenProfitLossDeleted { .. } => "yenProfitLoss:deleted",
            JournalEvent::SummaryCalculated(_) => "summary:calculated",
            JournalEvent::AnalyticsCalculated(_) => "analytics:calculated",
            JournalEvent::CapitalRecordAdded { .. } => "capital:recordAdded",
            JournalEvent::CapitalRecordDeleted { .. } => "capital:recordDeleted",
            JournalEvent::ExpenseAdded(_) => "expense:added",
            JournalEvent::ExpenseDeleted { .. } => "expense:deleted",
            JournalEvent::PeriodClosed(_) => "closing:completed",
            JournalEvent::SettingsUpdated(_) => "settings:updated",
        }
    }
}

type Handler = Arc<dyn Fn(&JournalEvent) -> anyhow::Result<()> + Send + Sync>;

/// Typed publish/subscribe channel shared by every journal service.
///
/// Each handler runs in isolation: an `Err` or a panic is logged and the
/// remaining handlers still receive the event.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, Handler)>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&JournalEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push((id, Arc::new(handler))),
            Err(poisoned) => poisoned.into_inner().push((id, Arc::new(handler))),
        }

        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn emit(&self, event: &JournalEvent) {
        // Handlers may subscribe or unsubscribe while being called.
        let handlers: Vec<Handler> = match self.handlers.read() {
            Ok(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, h)| Arc::clone(h)).collect(),
        };

        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Subscriber failed on '{}': {:#}", event.name(), e),
                Err(_) => log::error!("Subscriber panicked on '{}'", event.name()),
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    fn remove(&self, id: u64) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.retain(|(hid, _)| *hid != id),
            Err(poisoned) => poisoned.into_inner().retain(|(hid, _)| *hid != id),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to end it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn deleted_event() -> JournalEvent {
        JournalEvent::ExpenseDeleted { id: "E1".into() }
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let _ = env_logger::builder().is_test(true).try_init();
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _a = bus.subscribe(|_| anyhow::bail!("broken view"));
        let _b = bus.subscribe(|_| panic!("worse view"));
        let sink = seen.clone();
        let _c = bus.subscribe(move |e| {
            sink.lock().unwrap().push(e.name());
            Ok(())
        });

        bus.emit(&deleted_event());
        assert_eq!(*seen.lock().unwrap(), vec!["expense:deleted"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(&deleted_event());
        sub.unsubscribe();
        bus.emit(&deleted_event());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_trade_change_action_names() {
        assert_eq!(TradeChange::BulkAdded(Vec::new()).action(), "bulk-add");
        assert!(TradeChange::BulkAdded(Vec::new()).trades().is_empty());
    }
}
