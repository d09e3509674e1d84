//! Trailing-edge throttle for bursty live updates.
//!
//! Items are pushed into an unbounded input channel and forwarded to a
//! bounded output channel at most once per interval. The newest item seen
//! during an interval replaces any older pending one and is delivered when
//! the interval elapses, so only superseded items are ever collapsed.
//!
//! Backpressure: delivery awaits space in the output channel. While the
//! consumer is busy at most one item waits on the output; everything that
//! arrives meanwhile is collapsed into a single pending slot once the
//! consumer catches up (coalesce-and-wait). Delivery order always follows
//! push order.

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::error::{Result, TrackerError};

/// Cloneable producer side of a [`ThrottleBuffer`]
#[derive(Debug)]
pub struct ThrottleHandle<T> {
    input: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ThrottleHandle<T> {
    fn clone(&self) -> Self {
        ThrottleHandle {
            input: self.input.clone(),
        }
    }
}

impl<T> ThrottleHandle<T> {
    pub fn push(&self, item: T) -> Result<()> {
        self.input.send(item).map_err(|_| TrackerError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.input.is_closed()
    }
}

/// Rate limiter owning one background task
pub struct ThrottleBuffer<T> {
    handle: ThrottleHandle<T>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> ThrottleBuffer<T> {
    /// Spawn the throttle task. Must be called inside a tokio runtime.
    pub fn spawn(interval: Duration, output: mpsc::Sender<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(throttle_loop(interval, rx, output));
        ThrottleBuffer {
            handle: ThrottleHandle { input: tx },
            interval,
            task: Some(task),
        }
    }

    pub fn push(&self, item: T) -> Result<()> {
        self.handle.push(item)
    }

    pub fn handle(&self) -> ThrottleHandle<T> {
        self.handle.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the task. A pending, not yet delivered item is discarded.
    pub async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl<T> Drop for ThrottleBuffer<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn throttle_loop<T>(
    interval: Duration,
    mut input: mpsc::UnboundedReceiver<T>,
    output: mpsc::Sender<T>,
) {
    let mut pending: Option<T> = None;
    let mut last_delivery: Option<Instant> = None;

    loop {
        let due = pending.as_ref().map(|_| match last_delivery {
            Some(at) => at + interval,
            None => Instant::now(),
        });

        tokio::select! {
            biased;

            item = input.recv() => match item {
                Some(item) => pending = Some(item),
                None => {
                    if pending.is_some() {
                        debug!("throttle input closed, discarding pending item");
                    }
                    break;
                }
            },

            _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                if let Some(item) = pending.take() {
                    if output.send(item).await.is_err() {
                        break;
                    }
                    last_delivery = Some(Instant::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector(mut rx: mpsc::Receiver<u32>) -> (Arc<Mutex<Vec<(u32, Instant)>>>, JoinHandle<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let task = tokio::spawn(async move {
            while let Some(v) = rx.recv().await {
                sink.lock().unwrap().push((v, Instant::now()));
            }
        });
        (seen, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_item_delivered_immediately() {
        let (tx, rx) = mpsc::channel(1);
        let throttle = ThrottleBuffer::spawn(Duration::from_millis(500), tx);
        let (seen, _task) = collector(rx);

        let start = Instant::now();
        throttle.push(1).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
        assert!(seen[0].1 - start < Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_bounded_and_ends_with_latest() {
        let interval = Duration::from_millis(500);
        let (tx, rx) = mpsc::channel(1);
        let throttle = ThrottleBuffer::spawn(interval, tx);
        let (seen, _task) = collector(rx);

        // 100 pushes over one second, much faster than the interval
        for i in 0..100u32 {
            throttle.push(i).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(interval * 2).await;

        let seen = seen.lock().unwrap();
        let bound = (1000.0f64 / 500.0).ceil() as usize + 1;
        assert!(seen.len() <= bound, "delivered {} > {}", seen.len(), bound);
        assert_eq!(seen.last().unwrap().0, 99);

        for pair in seen.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= interval);
            assert!(pair[1].0 > pair[0].0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_synthetic_fire_when_idle() {
        let (tx, rx) = mpsc::channel(1);
        let throttle = ThrottleBuffer::spawn(Duration::from_millis(500), tx);
        let (seen, _task) = collector(rx);

        throttle.push(7).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_delivery() {
        let (tx, rx) = mpsc::channel(1);
        let mut throttle = ThrottleBuffer::spawn(Duration::from_millis(500), tx);
        let (seen, collector_task) = collector(rx);

        throttle.push(1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        throttle.push(2).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let handle = throttle.handle();
        throttle.close().await;
        assert!(throttle.is_closed());
        assert!(handle.push(3).is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        collector_task.await.unwrap();

        let values: Vec<u32> = seen.lock().unwrap().iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_sees_only_newest() {
        let interval = Duration::from_millis(100);
        let (tx, mut rx) = mpsc::channel(1);
        let throttle = ThrottleBuffer::spawn(interval, tx);

        throttle.push(1).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rx.recv().await, Some(1));

        // Consumer stalls for ten intervals while items keep arriving
        for i in 2..=20u32 {
            throttle.push(i).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut received = Vec::new();
        while let Ok(Some(v)) =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
        {
            received.push(v);
        }

        assert_eq!(*received.last().unwrap(), 20);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert!(received.len() < 19);
    }
}
