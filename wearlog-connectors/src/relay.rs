//! Companion relay: inbox to upload endpoint
//!
//! [`RelayClient`] drains every file the device sent, posts each one to the
//! endpoint named in the settings and reports the outcome back over the link.
//! A file is reported `Transferred` only after the endpoint accepted it;
//! anything else is reported `Error` and waits for the next backup scan.
//!
//! The endpoint is `<apiurl>/<fupendpoint>`, re-resolved whenever the settings
//! change. Until both parts are set the client stays inert, leaves files in
//! the inbox and warns once.
//!
//! With the `daemon` feature, [`RelayDaemon`] runs the client on a `tokio`
//! runtime: it wakes on a fixed interval (default one minute) or on demand,
//! and runs each blocking wake on the blocking pool. Settings and totals
//! cross into and out of the loop over `watch` channels, so callers never
//! wait on a wake in progress.

use log::{debug, info, warn};
use wearlog_core::transfer::{DeliveryState, Inbox};
use wearlog_core::Settings;

use crate::{ConnectionStats, Connector, ConnectorError, UploadResponse};

/// Outcome of one or more wakes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeReport {
    pub uploaded: usize,
    pub failed: usize,
    /// No endpoint configured; the inbox was left alone
    pub skipped: bool,
}

pub struct RelayClient<I, C> {
    inbox: I,
    connector: C,
    endpoint: Option<String>,
    warned: bool,
    totals: WakeReport,
}

impl<I: Inbox, C: Connector> RelayClient<I, C> {
    pub fn new(inbox: I, connector: C, settings: &Settings) -> Self {
        Self {
            inbox,
            connector,
            endpoint: settings.upload_endpoint(),
            warned: false,
            totals: WakeReport::default(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn inbox(&self) -> &I {
        &self.inbox
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connector.stats()
    }

    /// Uploads and failures summed over every wake
    pub fn totals(&self) -> WakeReport {
        self.totals
    }

    /// Re-resolve the endpoint after a settings change
    pub fn update_settings(&mut self, settings: &Settings) {
        let endpoint = settings.upload_endpoint();
        if endpoint != self.endpoint {
            match &endpoint {
                Some(url) => info!("Upload endpoint set to {}", url),
                None => info!("Upload endpoint cleared"),
            }
            self.endpoint = endpoint;
            self.warned = false;
        }
    }

    /// Upload every file waiting in the inbox
    pub fn on_wake(&mut self) -> WakeReport {
        let Some(endpoint) = self.endpoint.clone() else {
            if !self.warned {
                warn!("File backup is not set up in settings");
                self.warned = true;
            }
            return WakeReport {
                skipped: true,
                ..WakeReport::default()
            };
        };

        let mut report = WakeReport::default();
        while let Some(file) = self.inbox.pop() {
            debug!("Scheduling transmission of {}", file.name);
            let state = match self.connector.send(&endpoint, &file.name, &file.bytes) {
                Ok(_) => {
                    report.uploaded += 1;
                    DeliveryState::Transferred
                }
                Err(e) => {
                    warn!("Failed to send {}: {}", file.name, e);
                    report.failed += 1;
                    DeliveryState::Error
                }
            };
            if let Err(e) = self.inbox.report(&file.name, state) {
                warn!("Cannot report {} for {}: {}", state, file.name, e);
            }
        }

        self.totals.uploaded += report.uploaded;
        self.totals.failed += report.failed;
        report
    }

    /// `GET <endpoint>?test=LogSender`
    pub fn probe(&mut self) -> Result<UploadResponse, ConnectorError> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| ConnectorError::ConfigError("upload endpoint not configured".into()))?;
        let response = self
            .connector
            .probe(&endpoint)
            .map_err(|e| ConnectorError::ProtocolError(e.to_string()))?;
        info!("Correct testing call: {}", response.response);
        Ok(response)
    }
}

#[cfg(feature = "daemon")]
pub use daemon::{RelayConfig, RelayDaemon};

#[cfg(feature = "daemon")]
mod daemon {
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    use log::{debug, error, info};
    use tokio::sync::{watch, Notify};
    use tokio::task::JoinHandle;
    use tokio::time::MissedTickBehavior;
    use wearlog_core::transfer::Inbox;
    use wearlog_core::Settings;

    use super::{RelayClient, WakeReport};
    use crate::{Connector, ConnectorError};

    /// Relay daemon configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RelayConfig {
        pub wake_interval: Duration,
    }

    impl Default for RelayConfig {
        fn default() -> Self {
            Self {
                wake_interval: Duration::from_secs(60),
            }
        }
    }

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Background task waking a [`RelayClient`]
    pub struct RelayDaemon {
        notify: Arc<Notify>,
        settings: watch::Sender<Option<Settings>>,
        totals: watch::Receiver<WakeReport>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    }

    struct Channels {
        notify: Arc<Notify>,
        settings: watch::Receiver<Option<Settings>>,
        totals: watch::Sender<WakeReport>,
        shutdown: watch::Receiver<bool>,
    }

    impl RelayDaemon {
        /// Start the wake loop on the current tokio runtime
        pub fn spawn<I, C>(client: RelayClient<I, C>, config: RelayConfig) -> Self
        where
            I: Inbox + 'static,
            C: Connector + Send + 'static,
        {
            let notify = Arc::new(Notify::new());
            let (settings, settings_rx) = watch::channel(None);
            let (totals_tx, totals) = watch::channel(client.totals());
            let (shutdown, shutdown_rx) = watch::channel(false);

            let channels = Channels {
                notify: Arc::clone(&notify),
                settings: settings_rx,
                totals: totals_tx,
                shutdown: shutdown_rx,
            };
            let task = tokio::spawn(run(client, config.wake_interval, channels));
            info!("Relay daemon started, waking every {:?}", config.wake_interval);

            Self {
                notify,
                settings,
                totals,
                shutdown,
                task,
            }
        }

        /// Request a wake without waiting for the interval
        pub fn wake(&self) {
            self.notify.notify_one();
        }

        /// Hand new settings to the client; they apply from the next wake
        pub fn update_settings(&self, settings: &Settings) {
            self.settings.send_replace(Some(settings.clone()));
        }

        /// Totals as of the last finished wake
        pub fn totals(&self) -> WakeReport {
            *self.totals.borrow()
        }

        /// Stop the loop after any wake in progress
        pub async fn shutdown(self) -> Result<(), ConnectorError> {
            // the loop may already be gone; a closed channel is fine
            let _ = self.shutdown.send(true);
            self.task
                .await
                .map_err(|e| ConnectorError::ProtocolError(e.to_string()))
        }
    }

    async fn run<I, C>(client: RelayClient<I, C>, period: Duration, mut channels: Channels)
    where
        I: Inbox + 'static,
        C: Connector + Send + 'static,
    {
        let client = Arc::new(Mutex::new(client));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = channels.notify.notified() => {}
                changed = channels.shutdown.changed() => {
                    if changed.is_err() || *channels.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let settings = match channels.settings.has_changed() {
                Ok(true) => channels.settings.borrow_and_update().clone(),
                _ => None,
            };
            let client = Arc::clone(&client);
            let wake = tokio::task::spawn_blocking(move || {
                let mut client = lock(&client);
                if let Some(settings) = settings {
                    client.update_settings(&settings);
                }
                (client.on_wake(), client.totals())
            });
            match wake.await {
                Ok((report, totals)) => {
                    debug!("Relay wake: {:?}", report);
                    channels.totals.send_replace(totals);
                }
                Err(e) => error!("Relay wake failed: {}", e),
            }
        }
        info!("Relay daemon stopped");
    }
}
