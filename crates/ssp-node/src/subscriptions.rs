//! Report subscriptions held by this node on remote objects.
//!
//! Many local callbacks may watch the same remote symbol. Only the first
//! callback for a symbol causes a `sub` on the network and only the last
//! one to leave causes an `unsub`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ssp_codec::Symbol;
use ssp_wire::NameMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One received `rep` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Reported values per object id.
    pub reports: Vec<(u8, NameMap)>,
    pub received_at: DateTime<Utc>,
}

impl Report {
    /// The value of `symbol` reported by `object`, if present.
    pub fn value(&self, object: u8, symbol: &str) -> Option<&ssp_codec::Value> {
        self.reports
            .iter()
            .filter(|(oid, _)| *oid == object)
            .flat_map(|(_, map)| map.iter())
            .find(|(sym, _)| sym.name() == symbol)
            .map(|(_, v)| v)
    }
}

pub type ReportCallback = Arc<dyn Fn(&Report) + Send + Sync>;

/// Handle returned by a subscription, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    object: u8,
    symbols: Vec<Symbol>,
    callback: ReportCallback,
}

/// All local subscriptions, indexed by remote object and symbol.
#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    by_id: DashMap<SubscriptionId, Subscription>,
    /// object id → symbol → subscriptions watching it
    by_object: DashMap<u8, HashMap<Symbol, BTreeSet<SubscriptionId>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback. Returns its id and the symbols nobody watched
    /// before, which must be subscribed on the network.
    pub fn add(
        &self,
        object: u8,
        symbols: Vec<Symbol>,
        callback: ReportCallback,
    ) -> (SubscriptionId, Vec<Symbol>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut fresh = Vec::new();
        {
            let mut watched = self.by_object.entry(object).or_default();
            for symbol in &symbols {
                let subs = watched.entry(symbol.clone()).or_default();
                if subs.is_empty() && !fresh.contains(symbol) {
                    fresh.push(symbol.clone());
                }
                subs.insert(id);
            }
        }
        self.by_id.insert(
            id,
            Subscription {
                object,
                symbols,
                callback,
            },
        );
        (id, fresh)
    }

    /// Cancels a subscription. Returns the object and the symbols nobody
    /// watches anymore, which must be unsubscribed on the network.
    pub fn remove(&self, id: SubscriptionId) -> Option<(u8, Vec<Symbol>)> {
        let (_, sub) = self.by_id.remove(&id)?;
        let mut stale = Vec::new();
        if let Some(mut watched) = self.by_object.get_mut(&sub.object) {
            for symbol in &sub.symbols {
                if let Some(subs) = watched.get_mut(symbol) {
                    subs.remove(&id);
                    if subs.is_empty() {
                        watched.remove(symbol);
                        stale.push(symbol.clone());
                    }
                }
            }
        }
        self.by_object.remove_if(&sub.object, |_, watched| watched.is_empty());
        Some((sub.object, stale))
    }

    /// Callbacks interested in any value of `report`, each once.
    pub fn callbacks_for(&self, report: &Report) -> Vec<ReportCallback> {
        let mut ids = BTreeSet::new();
        for (object, values) in &report.reports {
            if let Some(watched) = self.by_object.get(object) {
                for (symbol, _) in values {
                    if let Some(subs) = watched.get(symbol) {
                        ids.extend(subs.iter().copied());
                    }
                }
            }
        }
        ids.into_iter()
            .filter_map(|id| self.by_id.get(&id).map(|s| s.callback.clone()))
            .collect()
    }

    /// Symbols currently watched on `object`.
    pub fn watched(&self, object: u8) -> Vec<Symbol> {
        self.by_object
            .get(&object)
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssp_codec::Value;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, ReportCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, Arc::new(move |_: &Report| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_network_subscription_is_shared() {
        let subs = Subscriptions::new();
        let (_, cb) = counter();
        let (first, fresh) = subs.add(5, vec!["temp".into(), "rh".into()], cb.clone());
        assert_eq!(fresh, vec![Symbol::new("temp"), Symbol::new("rh")]);

        let (second, fresh) = subs.add(5, vec!["temp".into()], cb);
        assert!(fresh.is_empty());

        assert_eq!(subs.remove(second), Some((5, vec![])));
        assert_eq!(
            subs.remove(first),
            Some((5, vec![Symbol::new("temp"), Symbol::new("rh")]))
        );
        assert!(subs.watched(5).is_empty());
        assert_eq!(subs.remove(first), None);
    }

    #[test]
    fn test_callbacks_for_report() {
        let subs = Subscriptions::new();
        let (temp_hits, temp_cb) = counter();
        let (rh_hits, rh_cb) = counter();
        subs.add(5, vec!["temp".into()], temp_cb);
        subs.add(5, vec!["rh".into()], rh_cb);

        let report = Report {
            reports: vec![(
                5,
                vec![
                    (Symbol::new("temp"), Value::Float(21.5)),
                    (Symbol::new("pressure"), Value::Int(1013)),
                ],
            )],
            received_at: Utc::now(),
        };
        for cb in subs.callbacks_for(&report) {
            cb(&report);
        }
        assert_eq!(temp_hits.load(Ordering::SeqCst), 1);
        assert_eq!(rh_hits.load(Ordering::SeqCst), 0);
        assert_eq!(report.value(5, "temp"), Some(&Value::Float(21.5)));
        assert_eq!(report.value(6, "temp"), None);
    }
}
