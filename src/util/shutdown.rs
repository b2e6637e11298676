use tokio::sync::watch;


/// Creates a connected pair of a trigger and the signal it controls
pub fn shutdown_signal() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

/// The sending side of a [Shutdown] signal. Dropping it without calling [ShutdownTrigger::trigger]
///  means shutdown is never signalled.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}
impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Cancellation signal for long-running loops. It is cheap to clone, and every clone observes the
///  same trigger - including clones created after the trigger fired.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}
impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when shutdown is triggered, and never if the trigger was dropped without firing
    pub async fn triggered(&mut self) {
        let trigger_dropped = self.receiver.wait_for(|&triggered| triggered).await.is_err();
        if trigger_dropped {
            std::future::pending::<()>().await;
        }
    }
}
