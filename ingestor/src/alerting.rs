//! Per-device low-fuel alert state with debounce and hysteresis.
//!
//! A device is either `Normal` or `Active`. An alert record and an `alert`
//! broadcast are produced only on the way into `Active`; the device must
//! return to `Normal` before another alert can fire.

use crate::analyzer::{self, AnalyzerConfig, FuelAssessment};
use crate::errors::Result;
use crate::events::{self, ALERT_CHANNEL, ALERT_ROLES};
use crate::hub::HubHandle;
use crate::metrics::{ALERTS_RAISED_TOTAL, ALERTS_RESOLVED_TOTAL, DEBOUNCED_EVALUATIONS_TOTAL};
use crate::model::{Alert, AlertPayload, AlertType, DeviceId, NewAlert};
use crate::store::{AlertStore, DeviceDirectory, TelemetryStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum time between two full evaluations of the same device
    pub debounce: Duration,
    /// Broadcast a resolution event on Active -> Normal
    pub notify_resolution: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            notify_resolution: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    Active,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceAlertState {
    pub last_evaluated_at: Instant,
    pub state: AlertState,
}

/// Device -> alert state. Handed to exactly one [`AlertStateMachine`].
#[derive(Debug, Default)]
pub struct AlertStateTable {
    devices: HashMap<DeviceId, DeviceAlertState>,
}

impl AlertStateTable {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What one evaluation did
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Evaluated too recently; nothing ran
    Debounced,
    /// Analysis ran, state stayed as it was
    Unchanged(AlertState),
    /// Normal -> Active, with the persisted alert
    Raised(Alert),
    /// Active -> Normal
    Resolved,
}

pub struct AlertStateMachine {
    telemetry: Arc<dyn TelemetryStore>,
    alerts: Arc<dyn AlertStore>,
    devices: Arc<dyn DeviceDirectory>,
    hub: HubHandle,
    analyzer: AnalyzerConfig,
    config: AlertConfig,
    states: Mutex<AlertStateTable>,
    names: Mutex<HashMap<DeviceId, String>>,
}

impl AlertStateMachine {
    pub fn new(
        telemetry: Arc<dyn TelemetryStore>,
        alerts: Arc<dyn AlertStore>,
        devices: Arc<dyn DeviceDirectory>,
        hub: HubHandle,
        analyzer: AnalyzerConfig,
        config: AlertConfig,
        states: AlertStateTable,
    ) -> Self {
        Self {
            telemetry,
            alerts,
            devices,
            hub,
            analyzer,
            config,
            states: Mutex::new(states),
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the analyzer for `device_id` and applies the resulting transition.
    ///
    /// The table lock is taken twice: once to check and claim the debounce
    /// window, and again to apply the transition. The store read in between
    /// runs unlocked, so other devices are not held up by it. Analyzer errors
    /// release the claim and leave the device's state untouched. A failure to
    /// persist a new alert keeps the device `Normal` so a later evaluation
    /// retries, but still counts as an evaluation for the debounce window.
    pub async fn evaluate(&self, device_id: DeviceId) -> Result<Transition> {
        let started = Instant::now();
        let previous = {
            let mut table = self.states.lock().await;
            let previous = table.devices.get(&device_id).copied();
            if let Some(prev) = previous {
                if started.duration_since(prev.last_evaluated_at) < self.config.debounce {
                    DEBOUNCED_EVALUATIONS_TOTAL.inc();
                    return Ok(Transition::Debounced);
                }
            }
            // Concurrent calls for this device are debounced while analysis runs
            table.devices.insert(
                device_id,
                DeviceAlertState {
                    last_evaluated_at: started,
                    state: previous.map(|p| p.state).unwrap_or_default(),
                },
            );
            previous
        };

        let assessment = match analyzer::predict(self.telemetry.as_ref(), device_id, &self.analyzer).await {
            Ok(assessment) => assessment,
            Err(e) => {
                let mut table = self.states.lock().await;
                let claimed = table.devices.get(&device_id).map(|s| s.last_evaluated_at) == Some(started);
                if claimed {
                    match previous {
                        Some(prev) => table.devices.insert(device_id, prev),
                        None => table.devices.remove(&device_id),
                    };
                }
                return Err(e);
            }
        };

        let mut table = self.states.lock().await;
        let current = table
            .devices
            .get(&device_id)
            .map(|s| s.state)
            .unwrap_or_default();

        let (next, transition) = match (current, assessment.should_alert) {
            (AlertState::Normal, true) => match self.raise(device_id, &assessment).await {
                Ok(alert) => (AlertState::Active, Transition::Raised(alert)),
                Err(e) => {
                    table.devices.insert(
                        device_id,
                        DeviceAlertState {
                            last_evaluated_at: started,
                            state: AlertState::Normal,
                        },
                    );
                    return Err(e);
                }
            },
            (AlertState::Active, false) => {
                self.resolve(device_id, &assessment);
                (AlertState::Normal, Transition::Resolved)
            }
            (state, _) => (state, Transition::Unchanged(state)),
        };

        table.devices.insert(
            device_id,
            DeviceAlertState {
                last_evaluated_at: started,
                state: next,
            },
        );
        Ok(transition)
    }

    async fn raise(&self, device_id: DeviceId, assessment: &FuelAssessment) -> Result<Alert> {
        let device_name = self.device_name(device_id).await;
        let new_alert = NewAlert {
            device_id,
            alert_type: AlertType::FuelLowAutonomy,
            timestamp: Utc::now(),
            payload: AlertPayload::new(device_name, assessment.autonomy_minutes),
        };

        let alert = self.alerts.create(new_alert).await.map_err(|e| {
            error!("Could not create low-fuel alert for device {}: {}", device_id, e);
            e
        })?;

        events::spawn_publish(&self.hub, ALERT_CHANNEL, events::alert_event(&alert), ALERT_ROLES);
        ALERTS_RAISED_TOTAL.inc();
        warn!(
            "ALERT raised for device {}: critical fuel, autonomy {:.0} min ({:.1} h)",
            device_id,
            assessment.autonomy_minutes,
            assessment.autonomy_minutes / 60.0
        );
        Ok(alert)
    }

    fn resolve(&self, device_id: DeviceId, assessment: &FuelAssessment) {
        ALERTS_RESOLVED_TOTAL.inc();
        info!(
            "Alert resolved for device {}: fuel normalised, autonomy {:.0} min ({:.1} h)",
            device_id,
            assessment.autonomy_minutes,
            assessment.autonomy_minutes / 60.0
        );
        if self.config.notify_resolution {
            events::spawn_publish(
                &self.hub,
                ALERT_CHANNEL,
                events::resolution_event(device_id, assessment),
                ALERT_ROLES,
            );
        }
    }

    /// Cached display name; lookup failures cache a synthetic label
    async fn device_name(&self, device_id: DeviceId) -> String {
        if let Some(name) = self.names.lock().await.get(&device_id) {
            return name.clone();
        }

        let name = match self.devices.display_name(device_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Could not resolve name for device {}: {}", device_id, e);
                format!("Device-{}", device_id)
            }
        };
        self.names.lock().await.insert(device_id, name.clone());
        name
    }

    #[cfg(test)]
    async fn state_of(&self, device_id: DeviceId) -> AlertState {
        self.states
            .lock()
            .await
            .devices
            .get(&device_id)
            .map(|s| s.state)
            .unwrap_or_default()
    }
}
