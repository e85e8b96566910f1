use super::Client;
use crate::registry::Instance;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Keeps an instance's lease alive until stopped or dropped.
pub struct Heartbeat {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub(crate) fn start(client: Client, instance: Instance, every: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // a retry sequence can run long, stop must not wait for it
                        let sent = tokio::select! {
                            sent = client.heartbeat(&instance) => sent,
                            _ = rx.recv() => {
                                info!("Stopping heartbeat for {}/{}", instance.app, instance.instance_id);
                                break;
                            }
                        };
                        match sent {
                            Ok(_) => debug!("Heartbeat sent for {}/{}", instance.app, instance.instance_id),
                            Err(e) => error!("Failed to send heartbeat: {}", e),
                        }
                    }
                    _ = rx.recv() => {
                        info!("Stopping heartbeat for {}/{}", instance.app, instance.instance_id);
                        break;
                    }
                }
            }
        });

        Self {
            stop_tx: Some(tx),
            handle,
        }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        let _ = (&mut self.handle).await;
    }
}
