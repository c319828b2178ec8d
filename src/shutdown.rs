use tokio::sync::watch;

/// Sender side of the cooperative stop signal shared by every loop.
pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Whether a stop was requested. A dropped sender counts as a stop.
pub fn is_requested(rx: &ShutdownReceiver) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

/// Resolve once a stop is requested. Cancel safe.
pub async fn requested(rx: &mut ShutdownReceiver) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
