use log::info;
use moka::sync::Cache;
use serde_json::Value;
use std::time::Duration;

const MAX_PAGES: u64 = 1_000;

/// Rendered index pages keyed by the raw page parameter. A TTL of zero
/// switches caching off.
pub struct PageCache {
    pages: Option<Cache<String, Value>>,
}

impl PageCache {
    pub fn new(ttl_secs: u64) -> Self {
        let pages = (ttl_secs > 0).then(|| {
            Cache::builder()
                .max_capacity(MAX_PAGES)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build()
        });
        PageCache { pages }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.pages.as_ref()?.get(key)
    }

    pub fn put(&self, key: &str, value: Value) {
        if let Some(pages) = &self.pages {
            pages.insert(key.to_string(), value);
        }
    }

    /// Returns the cached value for `key` or renders, stores and returns it.
    pub fn get_or_insert_with<E, F>(&self, key: &str, render: F) -> Result<Value, E>
    where
        F: FnOnce() -> Result<Value, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = render()?;
        self.put(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self) {
        if let Some(pages) = &self.pages {
            pages.invalidate_all();
            info!("index cache cleared");
        }
    }
}
