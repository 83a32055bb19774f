//! Bridge driver
//!
//! Owns the single poll loop of the process: fetch the bulk device data
//! from the cloud, run every device session, relay the vendor error log,
//! persist state and execute inbound commands. Poll and command paths run
//! on the same task, so a device's state is never touched concurrently.

use crate::cloud::{CloudClient, DeviceDataOutcome};
use crate::commands::RegisterWrite;
use crate::config::Config;
use crate::discovery;
use crate::error::{NaiadError, Result};
use crate::logging::get_logger;
use crate::mqtt::{IncomingMessage, MqttService, Notification, NotifyLevel};
use crate::persistence::PersistenceManager;
use crate::session::DeviceSession;
use chrono::{Datelike, Local};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

const SW_VERSION: &str = env!("APP_VERSION");

pub struct BridgeDriver {
    config: Config,
    cloud: CloudClient,
    mqtt: MqttService,
    incoming: mpsc::Receiver<IncomingMessage>,
    persistence: PersistenceManager,
    sessions: Vec<DeviceSession>,
    availability_topic: String,
    failure_count: u32,
    logger: crate::logging::StructuredLogger,
}

impl BridgeDriver {
    /// Wire up all collaborators. The MQTT connection is established here
    /// so the last will is registered before anything else happens.
    pub async fn new(config: Config) -> Result<Self> {
        if config.devices.is_empty() {
            return Err(NaiadError::config("at least one device must be configured"));
        }
        let cloud = CloudClient::new(&config.cloud)?;

        let mut persistence = PersistenceManager::new(&config.state_file);
        persistence.load()?;

        // With several devices the client can only carry one last will, so
        // they share an availability topic under the common location
        let availability_topic = if config.devices.len() > 1 {
            format!("{}/status", config.devices[0].location)
        } else {
            config.devices[0].availability_topic()
        };

        let client_id = format!("naiad-{}", std::process::id());
        let (mqtt, incoming) =
            MqttService::connect(&config.mqtt, &client_id, &availability_topic).await?;

        let mut sessions = Vec::new();
        for device in &config.devices {
            let mut session = DeviceSession::new(device.clone());
            if !session.serial_number.is_empty() {
                session.restore(persistence.device_state(&session.serial_number));
            }
            sessions.push(session);
        }

        Ok(Self {
            config,
            cloud,
            mqtt,
            incoming,
            persistence,
            sessions,
            availability_topic,
            failure_count: 0,
            logger: get_logger("driver"),
        })
    }

    /// Run until a shutdown signal or the fail-stop threshold
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await?;

        let mut poll = interval(Duration::from_secs(self.config.poll_interval_secs));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll_cycle().await {
                        self.logger.error(&format!("Terminating: {}", e));
                        self.shutdown().await;
                        return Err(e);
                    }
                }
                Some(message) = self.incoming.recv() => {
                    self.handle_incoming(message).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    self.logger.info("Shutdown signal received");
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Discovery, subscriptions, availability and the initial login
    async fn startup(&mut self) -> Result<()> {
        for session in &self.sessions {
            let device = &session.config;
            self.mqtt.subscribe(&device.command_topic()).await?;

            for descriptor in crate::entity::descriptors(device.variant, &device.limits) {
                let (topic, payload) = discovery::entity_config(
                    device,
                    &descriptor,
                    &self.availability_topic,
                    &self.config.mqtt.availability_online,
                    &self.config.mqtt.availability_offline,
                    SW_VERSION,
                    &self.config.mqtt.discovery_prefix,
                );
                self.mqtt.publish_json(&topic, &payload).await?;
            }
            let (topic, payload) = discovery::notification_config(
                device,
                &self.availability_topic,
                &self.config.mqtt.availability_online,
                &self.config.mqtt.availability_offline,
                SW_VERSION,
                &self.config.mqtt.discovery_prefix,
            );
            self.mqtt.publish_json(&topic, &payload).await?;
        }

        self.mqtt
            .publish_retained(
                &self.availability_topic,
                &self.config.mqtt.availability_online,
            )
            .await?;

        if self.persistence.state.auth_token.is_empty() {
            let token = self.cloud.login().await?;
            self.persistence.state.auth_token = token;
            self.persistence.save()?;
        }

        self.notify_all(&Notification::new(
            NotifyLevel::Warning,
            format!("naiad {} initialized", SW_VERSION),
        ))
        .await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self
            .mqtt
            .publish_retained(
                &self.availability_topic,
                &self.config.mqtt.availability_offline,
            )
            .await
        {
            self.logger
                .error(&format!("Failed to publish offline status: {}", e));
        }
        if let Err(e) = self.persistence.save() {
            self.logger.error(&format!("Failed to save state: {}", e));
        }
    }

    /// One poll pass over all devices.
    ///
    /// Individual failures are counted and notified but never abort the
    /// cycle; the returned error is reserved for the fail-stop path and a
    /// definitively failed re-login.
    async fn poll_cycle(&mut self) -> Result<()> {
        let failures_before = self.failure_count;

        match self
            .cloud
            .fetch_device_data(&self.persistence.state.auth_token)
            .await
        {
            Ok(DeviceDataOutcome::Ok(devices)) => {
                let new_day = self.check_new_day();
                self.apply_devices(&devices, new_day).await;
            }
            Ok(DeviceDataOutcome::LoginExpired) => {
                self.failure_count += 1;
                self.notify_all(&Notification::new(
                    NotifyLevel::Debug,
                    "Cloud session expired, logging in again",
                ))
                .await;
                match self.cloud.login().await {
                    Ok(token) => {
                        self.persistence.state.auth_token = token;
                    }
                    Err(e) => {
                        self.notify_all(&Notification::new(
                            NotifyLevel::Alert,
                            format!("Re-login failed: {}", e),
                        ))
                        .await;
                        return Err(e);
                    }
                }
            }
            Ok(DeviceDataOutcome::Error(detail)) => {
                self.failure_count += 1;
                self.notify_all(&Notification::new(
                    NotifyLevel::Debug,
                    format!("Cloud reported an error: {}", detail),
                ))
                .await;
            }
            Err(e) => {
                self.failure_count += 1;
                self.notify_all(&Notification::new(
                    NotifyLevel::Debug,
                    format!("Device data fetch failed: {}", e),
                ))
                .await;
            }
        }

        self.relay_error_log().await;

        if let Err(e) = self.persistence.save() {
            // Republishing already happened; a write failure only costs
            // the baselines on the next restart
            self.failure_count += 1;
            self.notify_all(&Notification::new(
                NotifyLevel::Debug,
                format!("State writeback failed: {}", e),
            ))
            .await;
        }

        if self.failure_count >= self.config.max_failures {
            self.notify_all(&Notification::new(
                NotifyLevel::Alert,
                format!(
                    "{} consecutive failures, giving up",
                    self.failure_count
                ),
            ))
            .await;
            return Err(NaiadError::generic("maximum failure count reached"));
        }
        if self.failure_count == failures_before {
            // Clean cycle, the slate is wiped
            self.failure_count = 0;
        }
        Ok(())
    }

    /// Day-of-month change detection for the daily rollover
    fn check_new_day(&mut self) -> bool {
        let today = Local::now().day();
        if today != self.persistence.state.day_today {
            self.persistence.state.day_today = today;
            return true;
        }
        false
    }

    /// Match every session to its cloud data block and run it
    async fn apply_devices(&mut self, devices: &[crate::cloud::DeviceData], new_day: bool) {
        let now = chrono::Utc::now().timestamp();

        for i in 0..self.sessions.len() {
            let session = &mut self.sessions[i];

            let data = if session.serial_number.is_empty() {
                // No serial configured: match by position in the account
                let Some(data) = devices.get(i) else {
                    continue;
                };
                session.serial_number = data.serialnumber.clone();
                let assigned = Notification::new(
                    NotifyLevel::Alert,
                    format!(
                        "Device {} was assigned serial number {}",
                        i + 1,
                        data.serialnumber
                    ),
                );
                let topic = session.config.notification_topic();
                self.mqtt
                    .notify_lossy(&topic, &assigned, self.config.notify_level)
                    .await;
                data
            } else {
                let Some(data) = devices
                    .iter()
                    .find(|d| d.serialnumber == session.serial_number)
                else {
                    continue;
                };
                data
            };

            let serial = self.sessions[i].serial_number.clone();
            let mut device_state = self.persistence.device_state(&serial).clone();

            let session = &mut self.sessions[i];
            match session.apply(data, &mut device_state, new_day, now) {
                Ok(notifications) => {
                    self.persistence
                        .state
                        .devices
                        .insert(serial, device_state);
                    let notify_topic = self.sessions[i].config.notification_topic();
                    for notification in &notifications {
                        self.mqtt
                            .notify_lossy(&notify_topic, notification, self.config.notify_level)
                            .await;
                    }
                    let state_topic = self.sessions[i].config.state_topic();
                    let payload = self.sessions[i].state_payload();
                    if let Err(e) = self.mqtt.publish_json(&state_topic, &payload).await {
                        self.failure_count += 1;
                        self.logger
                            .error(&format!("State publish to {} failed: {}", state_topic, e));
                    }
                }
                Err(e) => {
                    self.failure_count += 1;
                    let topic = self.sessions[i].config.notification_topic();
                    self.mqtt
                        .notify_lossy(
                            &topic,
                            &Notification::new(
                                NotifyLevel::Debug,
                                format!("Update failed: {}", e),
                            ),
                            self.config.notify_level,
                        )
                        .await;
                }
            }
        }
    }

    /// Relay a newly appeared vendor error-log entry to the owning device
    async fn relay_error_log(&mut self) {
        let log = match self
            .cloud
            .fetch_error_log(&self.persistence.state.auth_token)
            .await
        {
            Ok(log) => log,
            Err(e) => {
                self.failure_count += 1;
                self.notify_all(&Notification::new(
                    NotifyLevel::Debug,
                    format!("Error log fetch failed: {}", e),
                ))
                .await;
                return;
            }
        };

        let Some(entry) = log.newest() else {
            return;
        };
        if entry.id == self.persistence.state.last_error_id {
            return;
        }
        self.persistence.state.last_error_id = entry.id.clone();

        let label = match entry.kind.as_str() {
            "w" => "warning",
            "e" => "error",
            other => other,
        };
        let message = format!("{}device {} {}", entry.timestamp_prefix(), label, entry.error);
        let notification = Notification::new(NotifyLevel::Alert, message);

        if let Some(session) = self
            .sessions
            .iter()
            .find(|s| s.serial_number == entry.serialnumber)
        {
            let topic = session.config.notification_topic();
            self.mqtt
                .notify_lossy(&topic, &notification, self.config.notify_level)
                .await;
        }
    }

    /// Execute an inbound command payload against its device
    async fn handle_incoming(&mut self, message: IncomingMessage) {
        let Some(index) = self
            .sessions
            .iter()
            .position(|s| s.config.command_topic() == message.topic)
        else {
            self.logger
                .warn(&format!("Message on unexpected topic {}", message.topic));
            return;
        };

        let notify_topic = self.sessions[index].config.notification_topic();
        let plan = match self.sessions[index].handle_command(&message.payload) {
            Ok(plan) => plan,
            Err(e) => {
                self.mqtt
                    .notify_lossy(
                        &notify_topic,
                        &Notification::new(NotifyLevel::Debug, format!("Command rejected: {}", e)),
                        self.config.notify_level,
                    )
                    .await;
                return;
            }
        };
        if plan.writes.is_empty() {
            return;
        }

        let serial = self.sessions[index].serial_number.clone();
        let device_state = self.persistence.device_state(&serial).clone();
        let token = self.persistence.state.auth_token.clone();

        let failures = execute_plan_writes(&plan.writes, async |write| {
            self.cloud
                .write_register(
                    &token,
                    &serial,
                    &device_state.device_session_id,
                    &device_state.device_session_type,
                    write.index,
                    &write.data,
                )
                .await
        })
        .await;

        // A partially failed plan must not claim success
        for (index, e) in &failures {
            self.mqtt
                .notify_lossy(
                    &notify_topic,
                    &Notification::new(
                        NotifyLevel::Debug,
                        format!("Write to index {} failed: {}", index, e),
                    ),
                    self.config.notify_level,
                )
                .await;
        }
        if !failures.is_empty() {
            return;
        }

        for notification in &plan.notifications {
            self.mqtt
                .notify_lossy(&notify_topic, notification, self.config.notify_level)
                .await;
        }
    }

    /// Publish one notification to every configured device
    async fn notify_all(&self, notification: &Notification) {
        for session in &self.sessions {
            let topic = session.config.notification_topic();
            self.mqtt
                .notify_lossy(&topic, notification, self.config.notify_level)
                .await;
        }
    }
}

/// Carry out every write of a command plan, collecting the failures.
///
/// Multi-write plans pair an arm write with a start trigger (sleep mode) or
/// a lock release with a mode select (holiday off); a write that fails must
/// not stop the remaining writes from being attempted.
async fn execute_plan_writes<F>(
    writes: &[RegisterWrite],
    mut apply: F,
) -> Vec<(u16, NaiadError)>
where
    F: AsyncFnMut(&RegisterWrite) -> Result<()>,
{
    let mut failures = Vec::new();
    for write in writes {
        if let Err(e) = apply(write).await {
            failures.push((write.index, e));
        }
    }
    failures
}
