//! Time sources.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

/// A source of time.
///
/// All timestamps are expressed in nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> u64;

    /// Creates a ticker that fires once every `period`, starting one period from now.
    fn ticker(&self, period: Duration) -> Ticker;
}

/// A periodic tick source created by a [`Clock`].
pub struct Ticker {
    inner: TickerInner,
}

enum TickerInner {
    Interval(Interval),
    Manual(mpsc::UnboundedReceiver<()>),
}

impl Ticker {
    /// Waits for the next tick.
    ///
    /// This method is cancel safe.
    pub async fn tick(&mut self) {
        match &mut self.inner {
            TickerInner::Interval(interval) => {
                interval.tick().await;
            }
            TickerInner::Manual(rx) => {
                if rx.recv().await.is_none() {
                    // The clock is gone, so time can no longer advance.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// A [`Clock`] backed by the system clock and the Tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    }

    fn ticker(&self, period: Duration) -> Ticker {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ticker {
            inner: TickerInner::Interval(interval),
        }
    }
}

struct ManualTicker {
    period: u64,
    next: u64,
    tx: mpsc::UnboundedSender<()>,
}

struct ManualClockInner {
    now: AtomicU64,
    tickers: Mutex<Vec<ManualTicker>>,
}

/// A [`Clock`] that only moves when told to.
///
/// Cloning a `ManualClock` yields a handle to the same underlying time.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualClockInner>,
}

impl ManualClock {
    /// Creates a new `ManualClock` starting at the given time.
    pub fn new(now: u64) -> Self {
        Self {
            inner: Arc::new(ManualClockInner {
                now: AtomicU64::new(now),
                tickers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Moves time forward, firing every ticker whose period elapsed in the meantime.
    ///
    /// A ticker fires once for every period boundary that was crossed.
    pub fn advance(&self, duration: Duration) {
        let now = self.inner.now.fetch_add(duration.as_nanos() as u64, Relaxed) + duration.as_nanos() as u64;

        let mut tickers = self.inner.tickers.lock().unwrap_or_else(|e| e.into_inner());
        tickers.retain_mut(|ticker| {
            while ticker.next <= now {
                if ticker.tx.send(()).is_err() {
                    return false;
                }
                ticker.next += ticker.period;
            }
            true
        });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.inner.now.load(Relaxed)
    }

    fn ticker(&self, period: Duration) -> Ticker {
        let period = (period.as_nanos() as u64).max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let ticker = ManualTicker {
            period,
            next: self.now() + period,
            tx,
        };
        self.inner
            .tickers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ticker);

        Ticker {
            inner: TickerInner::Manual(rx),
        }
    }
}
