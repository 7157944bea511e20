//! Public-holiday lookups backed by the government holiday API.
//!
//! Lists are fetched per year and cached twice: in memory for the life of the
//! process and in the local store for 30 days. Any failure degrades to
//! "no holidays" so expansion never blocks on the lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::local::{keys, load_json, save_json, LocalStore};

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn is_holiday(&self, date: NaiveDate) -> bool;
}

#[async_trait]
pub trait HolidaySource: Send + Sync {
    async fn fetch_year(&self, year: i32) -> anyhow::Result<Vec<Holiday>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedYear {
    timestamp: DateTime<Utc>,
    data: Vec<Holiday>,
}

pub struct HolidayCache {
    memory: Mutex<HashMap<i32, Vec<Holiday>>>,
    store: Option<Arc<dyn LocalStore>>,
    ttl: chrono::Duration,
}

impl HolidayCache {
    pub fn new(store: Option<Arc<dyn LocalStore>>, ttl: chrono::Duration) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            ttl,
        }
    }

    fn key(year: i32) -> String {
        format!("{}{}", keys::HOLIDAY_CACHE_PREFIX, year)
    }

    pub fn get(&self, year: i32) -> Option<Vec<Holiday>> {
        if let Some(hit) = self.memory.lock().ok()?.get(&year) {
            return Some(hit.clone());
        }

        let store = self.store.as_ref()?;
        let key = Self::key(year);
        let cached: CachedYear = match load_json(store.as_ref(), &key) {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(year, error = %e, "Ignoring unreadable holiday cache entry");
                return None;
            }
        };

        if Utc::now() - cached.timestamp > self.ttl {
            tracing::debug!(year, "Holiday cache entry expired");
            if let Err(e) = store.remove(&key) {
                tracing::debug!(year, error = %e, "Failed to drop expired holiday cache entry");
            }
            return None;
        }

        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(year, cached.data.clone());
        }
        Some(cached.data)
    }

    pub fn put(&self, year: i32, holidays: Vec<Holiday>) {
        if let Some(store) = &self.store {
            let cached = CachedYear {
                timestamp: Utc::now(),
                data: holidays.clone(),
            };
            if let Err(e) = save_json(store.as_ref(), &Self::key(year), &cached) {
                tracing::debug!(year, error = %e, "Failed to persist holiday cache");
            }
        }
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(year, holidays);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
        let Some(store) = &self.store else { return };
        match store.keys() {
            Ok(names) => {
                for key in names
                    .iter()
                    .filter(|k| k.starts_with(keys::HOLIDAY_CACHE_PREFIX))
                {
                    if let Err(e) = store.remove(key) {
                        tracing::debug!(key = key.as_str(), error = %e, "Failed to clear holiday cache entry");
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "Failed to enumerate holiday cache"),
        }
    }
}

pub struct HolidayService {
    source: Option<Arc<dyn HolidaySource>>,
    cache: HolidayCache,
    fetch_lock: tokio::sync::Mutex<()>,
}

impl HolidayService {
    /// Without a source (no API key configured) every date is a regular day.
    pub fn new(source: Option<Arc<dyn HolidaySource>>, cache: HolidayCache) -> Self {
        Self {
            source,
            cache,
            fetch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn holidays(&self, year: i32) -> Vec<Holiday> {
        if let Some(hit) = self.cache.get(year) {
            return hit;
        }
        let Some(source) = &self.source else {
            return Vec::new();
        };

        // Concurrent lookups for the same year wait for the first fetch
        let _guard = self.fetch_lock.lock().await;
        if let Some(hit) = self.cache.get(year) {
            return hit;
        }

        match source.fetch_year(year).await {
            Ok(holidays) => {
                if !holidays.is_empty() {
                    self.cache.put(year, holidays.clone());
                }
                tracing::debug!(year, count = holidays.len(), "Holiday list fetched");
                holidays
            }
            Err(e) => {
                tracing::warn!(year, error = %e, "Holiday lookup failed; treating year as holiday-free");
                Vec::new()
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl HolidayCalendar for HolidayService {
    async fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays(date.year())
            .await
            .iter()
            .any(|h| h.date == date)
    }
}

/// Client for the public data portal's rest-day endpoint.
pub struct PublicHolidayApi {
    client: Client,
    url: String,
    api_key: String,
}

impl PublicHolidayApi {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl HolidaySource for PublicHolidayApi {
    async fn fetch_year(&self, year: i32) -> anyhow::Result<Vec<Holiday>> {
        let body = retry_with_backoff(FETCH_ATTEMPTS, FETCH_BASE_DELAY, || async move {
            let response = self
                .client
                .get(&self.url)
                .query(&[
                    ("serviceKey", self.api_key.clone()),
                    ("solYear", year.to_string()),
                    ("numOfRows", "100".to_string()),
                    ("_type", "json".to_string()),
                ])
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!("holiday API returned {}", response.status());
            }
            Ok::<_, anyhow::Error>(response.text().await?)
        })
        .await?;

        Ok(parse_holiday_response(&body))
    }
}

/// Run `op` up to `max_attempts` times, doubling the delay after each failure.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }
                let delay = base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying request");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Extract holidays from an API response. `item` is an array, or a bare
/// object when the year has a single entry. Anything unexpected yields nothing.
pub fn parse_holiday_response(body: &str) -> Vec<Holiday> {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Holiday API returned a non-JSON body");
            return Vec::new();
        }
    };

    let response = &value["response"];
    if response["header"]["resultCode"].as_str() != Some("00") {
        tracing::warn!(
            result = %response["header"]["resultMsg"],
            "Holiday API reported an error"
        );
        return Vec::new();
    }

    let items = &response["body"]["items"]["item"];
    let items: Vec<&Value> = match items {
        Value::Array(list) => list.iter().collect(),
        Value::Object(_) => vec![items],
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let locdate = match &item["locdate"] {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return None,
            };
            let date = NaiveDate::parse_from_str(&locdate, "%Y%m%d").ok()?;
            Some(Holiday {
                date,
                name: item["dateName"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
