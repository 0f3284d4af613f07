use tokio::sync::watch;

/// Owner side of a cancellation flag.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receivers: vec![self.tx.subscribe()],
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side; aborted as soon as any of the handles it follows is.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    receivers: Vec<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Fires when either `self` or `other` fires.
    pub fn or(mut self, other: &AbortSignal) -> Self {
        self.receivers.extend(other.receivers.iter().cloned());
        self
    }

    /// Resolves once aborted. Pends forever for a signal that cannot fire.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        let waits = self.receivers.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let closed = rx.wait_for(|aborted| *aborted).await.is_err();
                if closed {
                    // handle dropped without aborting
                    std::future::pending::<()>().await;
                }
            })
        });
        let waits: Vec<_> = waits.collect();
        if waits.is_empty() {
            std::future::pending::<()>().await;
        }
        futures_util::future::select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_signal_follows_both_handles() {
        let a = AbortHandle::new();
        let b = AbortHandle::new();
        let signal = a.signal().or(&b.signal());

        assert!(!signal.is_aborted());
        b.abort();
        assert!(signal.is_aborted());
        assert!(!a.is_aborted());
    }

    #[tokio::test]
    async fn aborted_resolves_after_abort() {
        let handle = AbortHandle::new();
        let signal = handle.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        handle.abort();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("signal never fired")
            .expect("waiter panicked");
    }
}
