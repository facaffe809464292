use crate::client::GlucoseClient;
use crate::config::{Config, Thresholds};
use crate::error::ShareError;
use crate::normalizer::NormalizedReading;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Fixed delay inserted before the next poll after a transient failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Display classification of a glucose value against the configured
/// thresholds. Affects coloring only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseLevel {
    UrgentLow,
    Low,
    InRange,
    High,
    UrgentHigh,
}

impl GlucoseLevel {
    /// Classifies a raw mg/dL value. Thresholds are configured in mg/dL, so
    /// classifying the raw value is unit-independent.
    pub fn classify(value_mgdl: i32, thresholds: &Thresholds) -> GlucoseLevel {
        if value_mgdl <= thresholds.urgent_low {
            GlucoseLevel::UrgentLow
        } else if value_mgdl < thresholds.low {
            GlucoseLevel::Low
        } else if value_mgdl > thresholds.urgent_high {
            GlucoseLevel::UrgentHigh
        } else if value_mgdl > thresholds.high {
            GlucoseLevel::High
        } else {
            GlucoseLevel::InRange
        }
    }

    /// Panel label color for this level.
    pub fn color(&self) -> &'static str {
        match self {
            GlucoseLevel::UrgentLow | GlucoseLevel::UrgentHigh => "red",
            GlucoseLevel::Low | GlucoseLevel::High => "yellow",
            GlucoseLevel::InRange => "#00ff00",
        }
    }
}

/// Ready-to-render reading.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseDisplay {
    /// Panel text, e.g. `"120 mg/dL →"`.
    pub text: String,
    /// Signed delta text, e.g. `"-1.0"`.
    pub delta: String,
    pub level: GlucoseLevel,
    /// Status line carrying the reading's wall-clock time.
    pub status: String,
}

/// One user-visible state per poll outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayState {
    Reading(GlucoseDisplay),
    /// The vendor had no reading in the query window.
    NoData,
    Error {
        message: String,
        /// True when polling stopped because user action (fixing
        /// credentials or settings) is required before it can resume.
        needs_user_action: bool,
    },
}

/// Drives a `GlucoseClient` on a timer and maps every outcome to a
/// `DisplayState` on the update channel. Exactly one poll is in flight at a
/// time. `shutdown` flips the active flag: the in-flight request is allowed
/// to finish but its result is discarded, and nothing is emitted afterwards.
///
/// Reconfiguration (credential, region or unit change) is a replacement:
/// shut the old poller down and start a new one, which builds a fresh
/// client with reset delta state.
pub struct GlucosePoller {
    active: Arc<AtomicBool>,
}

impl GlucosePoller {
    /// Builds the client and spawns the polling loop. Fails up front on
    /// missing credentials.
    pub fn start(
        config: Config,
        update_sender: Sender<DisplayState>,
    ) -> Result<GlucosePoller, ShareError> {
        let client = GlucoseClient::new(&config)?;
        Ok(Self::start_with_client(client, &config, update_sender))
    }

    /// Spawns the polling loop around a prebuilt client, for clients
    /// constructed against an explicit base URL.
    pub fn start_with_client(
        client: GlucoseClient,
        config: &Config,
        update_sender: Sender<DisplayState>,
    ) -> GlucosePoller {
        let active = Arc::new(AtomicBool::new(true));

        let worker = PollWorker {
            client,
            thresholds: config.thresholds,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            active: active.clone(),
            update_sender,
        };
        tokio::spawn(worker.run());

        GlucosePoller { active }
    }

    /// Stops the polling loop. Idempotent.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

struct PollWorker {
    client: GlucoseClient,
    thresholds: Thresholds,
    poll_interval: Duration,
    active: Arc<AtomicBool>,
    update_sender: Sender<DisplayState>,
}

impl PollWorker {
    async fn run(mut self) {
        println!(
            "Starting glucose poller, polling every {}s",
            self.poll_interval.as_secs()
        );

        let mut poll_interval = interval(self.poll_interval);
        // The error backoff must push the next poll out, not queue a burst
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll_interval.tick().await;
            if !self.active.load(Ordering::Relaxed) {
                break;
            }

            let result = self.client.latest_glucose().await;

            // Teardown may have happened while the request was in flight;
            // its result must not reach the display.
            if !self.active.load(Ordering::Relaxed) {
                break;
            }

            let state = match result {
                Ok(reading) => DisplayState::Reading(build_display(&reading, &self.thresholds)),
                Err(ShareError::NoData) => DisplayState::NoData,
                Err(e) => DisplayState::Error {
                    message: e.to_string(),
                    needs_user_action: e.needs_user_action(),
                },
            };

            let stop_polling =
                matches!(&state, DisplayState::Error { needs_user_action: true, .. });
            let is_error = matches!(&state, DisplayState::Error { .. });

            if self.update_sender.send(state).await.is_err() {
                println!("Display side went away, stopping glucose poller");
                break;
            }

            if stop_polling {
                // Bad credentials: hammering the login endpoint gets the
                // account rate-limited, so wait for the user
                println!("Polling stopped, user action required");
                break;
            }
            if is_error {
                sleep(ERROR_BACKOFF).await;
            }
        }

        println!("Glucose poller exiting");
    }
}

/// Builds the display form of a normalized reading.
fn build_display(reading: &NormalizedReading, thresholds: &Thresholds) -> GlucoseDisplay {
    GlucoseDisplay {
        text: format!(
            "{} {} {}",
            reading.value,
            reading.unit.label(),
            reading.trend.arrow()
        ),
        delta: reading.delta.clone(),
        level: GlucoseLevel::classify(reading.value_mgdl, thresholds),
        status: format!(
            "Last update: {}",
            reading
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
        ),
    }
}
