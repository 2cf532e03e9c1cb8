//! In-memory usage source for pool tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use key_registry::Credential;
use provider::{ProviderError, UsageSnapshot, UsageSource};

/// Reports a fixed cost per key; keys without an entry fail the query.
#[derive(Default)]
pub struct FakeSource {
    costs: Mutex<HashMap<String, f64>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_costs(costs: &[(&str, f64)]) -> Self {
        let source = Self::default();
        for (key, cost) in costs {
            source.set_cost(key, *cost);
        }
        source
    }

    pub fn set_cost(&self, key: &str, cost: f64) {
        self.costs.lock().unwrap().insert(key.to_string(), cost);
    }

    pub fn remove(&self, key: &str) {
        self.costs.lock().unwrap().remove(key);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UsageSource for FakeSource {
    fn fetch_usage<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = provider::Result<UsageSnapshot>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let cost = self.costs.lock().unwrap().get(credential.key()).copied();
            match cost {
                Some(cost) => Ok(UsageSnapshot {
                    total_cost_usd: cost,
                    total_calls: 1,
                    fetched_at: Utc::now(),
                }),
                None => Err(ProviderError::Status {
                    status: 500,
                    body: "unavailable".into(),
                }),
            }
        })
    }
}
