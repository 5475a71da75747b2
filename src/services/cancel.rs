use std::time::Duration;

use tokio::sync::watch;

/// Sending half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, checked between batches and raced against every wait.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl Cancellation {
    #[cfg(test)]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return self.is_cancelled(),
                changed = self.rx.changed() => match changed {
                    Ok(()) if self.is_cancelled() => return true,
                    Ok(()) => continue,
                    Err(_) => {
                        // sender gone, nothing can cancel us any more
                        (&mut sleep).await;
                        return self.is_cancelled();
                    }
                },
            }
        }
    }
}

/// Cancel on Ctrl-C or when Enter is pressed.
pub fn spawn_cancel_listeners(handle: CancelHandle) {
    let on_signal = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current playlist");
            on_signal.cancel();
        }
    });

    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            tracing::info!("Enter pressed, stopping after the current playlist");
            handle.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_sleeps_full_duration() {
        let mut token = Cancellation::never();
        let started = std::time::Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)).await);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let (handle, mut token) = cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let started = std::time::Instant::now();
        assert!(token.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let (handle, mut token) = cancellation();
        handle.cancel();
        assert!(token.sleep(Duration::from_secs(30)).await);
    }
}
