use std::any::Any;
use std::collections::HashMap;

use crate::types::TimeFrame;

#[derive(Hash, Eq, PartialEq, Clone)]
struct CacheKey {
    indicator: &'static str,
    pair: String,
    timeframe: TimeFrame,
    params: Vec<u64>,
}

/// Scan-scoped memoization so every strategy sharing a (pair, timeframe)
/// computes a given indicator at most once per scan.
#[derive(Default)]
pub struct IndicatorCache {
    entries: HashMap<CacheKey, Box<dyn Any + Send + Sync>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get_or_compute<T, F>(
        &mut self,
        indicator: &'static str,
        pair: &str,
        timeframe: TimeFrame,
        params: &[u64],
        compute: F,
    ) -> &T
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let key = CacheKey {
            indicator,
            pair: pair.to_string(),
            timeframe,
            params: params.to_vec(),
        };
        self.entries
            .entry(key)
            .or_insert_with(|| Box::new(compute()))
            .downcast_ref::<T>()
            .expect("indicator cache type mismatch for key")
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_with_same_key_compute_only_once() {
        let mut cache = IndicatorCache::new();
        let mut calls = 0;
        {
            let _v: &Vec<f64> = cache.get_or_compute("ema", "BTC/USDT", TimeFrame::M5, &[20], || {
                calls += 1;
                vec![1.0, 2.0, 3.0]
            });
        }
        {
            let _v: &Vec<f64> = cache.get_or_compute("ema", "BTC/USDT", TimeFrame::M5, &[20], || {
                calls += 1;
                vec![1.0, 2.0, 3.0]
            });
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_params_are_distinct_entries() {
        let mut cache = IndicatorCache::new();
        let _a: &Vec<f64> = cache.get_or_compute("ema", "BTC/USDT", TimeFrame::M5, &[20], || vec![1.0]);
        let _b: &Vec<f64> = cache.get_or_compute("ema", "BTC/USDT", TimeFrame::M5, &[50], || vec![2.0]);
        assert_eq!(cache.len(), 2);
    }
}
