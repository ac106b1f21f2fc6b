//! Connection cache (§5, §9, ambient): process-wide, keyed by
//! `(driver, connect-string)`, refcounted, idle-capped. Hand-rolled per the
//! explicit design note in §9 rather than pulled from `r2d2` — see
//! DESIGN.md for why `r2d2`'s `ManageConnection` doesn't fit a `Box<dyn
//! SqlConnection>` behind the out-of-scope driver contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::driver::SqlConnection;

const DEFAULT_IDLE_CAP: usize = 10;

struct CacheEntry {
    conn: Arc<Mutex<dyn SqlConnection + Send>>,
    refcount: usize,
}

/// A single process-wide cache. In the crate's single-threaded event-loop
/// model (§5) this would normally be one global; it's exposed as a value
/// here so tests can construct independent instances.
pub struct ConnectionCache {
    idle_cap: usize,
    entries: HashMap<(String, String), CacheEntry>,
    /// Entries whose refcount dropped to zero but are kept warm under the
    /// idle cap.
    idle_order: Vec<(String, String)>,
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_CAP)
    }
}

impl ConnectionCache {
    pub fn new(idle_cap: usize) -> Self {
        ConnectionCache {
            idle_cap,
            entries: HashMap::new(),
            idle_order: Vec::new(),
        }
    }

    /// Acquire a connection for `(driver, connect_string)`, calling
    /// `make` only on a cache miss. Bumps the refcount on a hit.
    pub fn acquire<F>(
        &mut self,
        driver: &str,
        connect_string: &str,
        make: F,
    ) -> Arc<Mutex<dyn SqlConnection + Send>>
    where
        F: FnOnce() -> Arc<Mutex<dyn SqlConnection + Send>>,
    {
        let key = (driver.to_string(), connect_string.to_string());
        self.idle_order.retain(|k| k != &key);

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refcount += 1;
            return entry.conn.clone();
        }

        let conn = make();
        self.entries.insert(
            key,
            CacheEntry {
                conn: conn.clone(),
                refcount: 1,
            },
        );
        conn
    }

    /// Release a previously-acquired connection. When the refcount reaches
    /// zero the entry moves to the idle set; if the idle set is over cap,
    /// the oldest idle entry is evicted (lazy-on-release, §9).
    pub fn release(&mut self, driver: &str, connect_string: &str) {
        let key = (driver.to_string(), connect_string.to_string());
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            self.idle_order.push(key.clone());
            while self.idle_order.len() > self.idle_cap {
                let evict = self.idle_order.remove(0);
                self.entries.remove(&evict);
            }
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle_order.len()
    }

    pub fn active_count(&self) -> usize {
        self.entries.len() - self.idle_order.len()
    }
}
