use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub processed: usize,
    pub total: usize,
    pub item: String,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

pub struct Progress {
    callback: Option<ProgressCallback>,
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Progress {
    pub fn new<F>(callback: F, min_interval: Duration) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self {
            callback: None,
            min_interval: Duration::ZERO,
            last: Mutex::new(None),
        }
    }

    /// Delivers at most one update per interval; the final one always goes out.
    pub fn report(&self, processed: usize, total: usize, item: &str) {
        let callback = match &self.callback {
            Some(callback) => callback,
            None => return,
        };
        let finished = processed >= total;
        {
            let mut last = self.last.lock();
            let now = Instant::now();
            if let Some(previous) = *last {
                if !finished && now.duration_since(previous) < self.min_interval {
                    return;
                }
            }
            *last = Some(now);
        }
        callback(&ProgressUpdate {
            processed,
            total,
            item: item.to_string(),
        });
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.callback.is_some())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
