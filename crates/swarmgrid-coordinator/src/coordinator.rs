//! Swarm coordinator: the only component that sees both devices and jobs.
//!
//! Every mutating entry point runs to completion synchronously against the
//! owned registry, scheduler, and join code manager. Messages for devices
//! are queued in an outbox which the caller drains after each call.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use swarmgrid_admission::{JoinCodeManager, JoinCodeOptions};
use swarmgrid_core::*;
use swarmgrid_registry::DeviceRegistry;
use swarmgrid_scheduler::{CompletionOutcome, StolenJob, WorkStealingScheduler};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Orchestrates one swarm: membership, dispatch, and rebalancing.
#[derive(Debug)]
pub struct SwarmCoordinator {
    config: CoordinatorConfig,
    registry: DeviceRegistry,
    scheduler: WorkStealingScheduler,
    join_codes: JoinCodeManager,
    run_state: RunState,
    next_device_seq: u64,
    outbox: Vec<Outbound>,
}

impl SwarmCoordinator {
    pub fn new(
        registry: DeviceRegistry,
        scheduler: WorkStealingScheduler,
        join_codes: JoinCodeManager,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            join_codes,
            run_state: RunState::Idle,
            next_device_seq: 0,
            outbox: Vec::new(),
        }
    }

    /// Build every component from one configuration.
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            DeviceRegistry::new(config.registry.clone()),
            WorkStealingScheduler::new(config.scheduler.clone()),
            JoinCodeManager::new(config.join_codes.clone()),
            config.coordinator.clone(),
        )
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &WorkStealingScheduler {
        &self.scheduler
    }

    pub fn join_codes(&self) -> &JoinCodeManager {
        &self.join_codes
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Admit a device on a connection, or move a known device onto it.
    ///
    /// Queues `registered` or `rejected` for the connection.
    pub fn register_device(
        &mut self,
        connection_id: &str,
        registration: DeviceRegistration,
    ) -> CoordinatorResult<DeviceId> {
        let now = epoch_millis();
        let result = self.admit(connection_id, registration, now);

        match &result {
            Ok(device_id) => {
                self.send(
                    connection_id,
                    ServerMessage::Registered {
                        device_id: device_id.clone(),
                    },
                );
                self.try_assign_pending_jobs_at(now);
            }
            Err(e) => {
                warn!(%connection_id, error = %e, "device registration rejected");
                self.send(
                    connection_id,
                    ServerMessage::Rejected {
                        reason: e.to_string(),
                    },
                );
            }
        }

        self.publish_if_changed();
        result
    }

    fn admit(
        &mut self,
        connection_id: &str,
        registration: DeviceRegistration,
        now: u64,
    ) -> CoordinatorResult<DeviceId> {
        let DeviceRegistration {
            device_id,
            name,
            device_type,
            capabilities,
            join_code,
        } = registration;

        // One device per connection.
        if let Some(bound) = self.registry.device_for_connection(connection_id) {
            if device_id.as_deref() != Some(bound.id.as_str()) {
                return Err(CoordinatorError::ConnectionInUse(bound.id.clone()));
            }
        }

        // Reconnect: keep score, job count, and load.
        if let Some(id) = device_id.as_deref() {
            if self.registry.contains(id) {
                self.registry.rebind_connection(id, connection_id, now);
                return Ok(id.to_string());
            }
        }

        match join_code.as_deref().filter(|code| !code.is_empty()) {
            Some(code) => self.join_codes.use_code_at(code, now)?,
            None if self.config.require_join_code => {
                return Err(CoordinatorError::JoinCodeRequired);
            }
            None => {}
        }

        let device_id = match device_id {
            Some(id) if !id.is_empty() => id,
            _ => self.next_device_id(),
        };
        let name = if name.is_empty() {
            device_id.clone()
        } else {
            name
        };

        self.registry.register(Device::new(
            device_id.clone(),
            connection_id,
            name,
            device_type.unwrap_or(DeviceType::Desktop),
            capabilities.unwrap_or_default(),
            now,
        ));
        Ok(device_id)
    }

    fn next_device_id(&mut self) -> DeviceId {
        loop {
            self.next_device_seq += 1;
            let candidate = format!("device-{}", self.next_device_seq);
            if !self.registry.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Handle a transport disconnect.
    ///
    /// Only the device's current connection can remove it. Returns whether
    /// a device was removed.
    pub fn unregister_device(&mut self, connection_id: &str) -> bool {
        let Some(device) = self.registry.device_for_connection(connection_id) else {
            info!(%connection_id, "disconnect for superseded or unknown connection ignored");
            return false;
        };
        if device.connection_id != connection_id {
            warn!(
                %connection_id,
                device_id = %device.id,
                current = %device.connection_id,
                "stale disconnect ignored"
            );
            return false;
        }

        let device_id = device.id.clone();
        self.registry.unregister(&device_id);
        let released = self.scheduler.release_device(&device_id);
        if !released.is_empty() {
            info!(%device_id, count = released.len(), "reclaimed jobs from departed device");
        }

        self.try_assign_pending_jobs();
        self.publish_if_changed();
        true
    }

    pub fn heartbeat(&mut self, device_id: &str, health: Option<HealthSample>) -> bool {
        let known = self.registry.record_heartbeat(device_id, health);
        self.publish_if_changed();
        known
    }

    /// Apply a benchmark result reported by a device.
    pub fn update_device_stats(
        &mut self,
        device_id: &str,
        ops_score: f64,
        throttle_level: Option<f64>,
    ) -> bool {
        let known = self
            .registry
            .update_stats(device_id, ops_score, throttle_level);
        self.publish_if_changed();
        known
    }

    /// Operator override. A re-enabled device is offered pending work.
    pub fn toggle_device(&mut self, device_id: &str, enabled: bool) -> bool {
        if !self.registry.toggle_device(device_id, enabled) {
            return false;
        }
        if enabled {
            self.try_assign_pending_jobs();
        }
        self.publish_if_changed();
        true
    }

    // ── Jobs ────────────────────────────────────────────────────────

    pub fn submit_job(&mut self, job: Job) -> CoordinatorResult<()> {
        self.scheduler.submit(job)?;
        self.try_assign_pending_jobs();
        self.publish_if_changed();
        Ok(())
    }

    /// Submit many jobs. Returns how many were accepted.
    pub fn submit_batch(&mut self, jobs: Vec<Job>) -> usize {
        let accepted = self.scheduler.submit_batch(jobs);
        self.try_assign_pending_jobs();
        self.publish_if_changed();
        accepted
    }

    pub fn request_work(&mut self, device_id: &str) -> Option<Job> {
        self.request_batch(device_id, 1).into_iter().next()
    }

    /// Pull path. Grants at most the device's free capacity.
    ///
    /// Missing, offline, errored, and disabled devices get nothing.
    pub fn request_batch(&mut self, device_id: &str, count: usize) -> Vec<Job> {
        let jobs = self.pull(device_id, count, epoch_millis());
        self.publish_if_changed();
        jobs
    }

    fn pull(&mut self, device_id: &str, count: usize, now: u64) -> Vec<Job> {
        let Some(device) = self.registry.get(device_id) else {
            warn!(%device_id, "work request from unknown device");
            return Vec::new();
        };
        if !device.enabled
            || matches!(
                device.status,
                DeviceStatus::Offline | DeviceStatus::Error | DeviceStatus::Disabled
            )
        {
            debug!(%device_id, status = %device.status, "work request refused");
            return Vec::new();
        }

        let grant = count.min(device.free_capacity() as usize);
        if grant == 0 {
            return Vec::new();
        }
        let supported = device.capabilities.supported_jobs.clone();

        let mut jobs = self
            .scheduler
            .batch_at(device_id, grant, Some(&supported), now);
        if jobs.is_empty() && self.config.steal_on_idle_pull {
            jobs = self.steal_for_idle(device_id, grant, &supported, now);
        }

        if !jobs.is_empty() {
            self.registry.adjust_load(device_id, jobs.len() as i64);
            debug!(%device_id, requested = count, granted = jobs.len(), "work pulled");
        }
        jobs
    }

    /// Take work from devices that hold a backlog.
    fn steal_for_idle(
        &mut self,
        thief: &str,
        max_jobs: usize,
        supported: &BTreeSet<JobKind>,
        now: u64,
    ) -> Vec<Job> {
        let victims: Vec<DeviceId> = self
            .registry
            .devices()
            .filter(|d| d.id != thief && self.scheduler.should_offer_work(&d.id))
            .map(|d| d.id.clone())
            .collect();

        let mut taken = Vec::new();
        for victim in victims {
            let remaining = max_jobs - taken.len();
            if remaining == 0 {
                break;
            }
            let stolen = self
                .scheduler
                .steal_at(thief, Some(victim.as_str()), remaining, Some(supported), now);
            if stolen.is_empty() {
                continue;
            }
            self.revoke_from(&victim, &stolen);
            taken.extend(stolen.into_iter().map(|s| s.job));
        }
        taken
    }

    /// Resolve a device's report on a job.
    ///
    /// On success the reporting device is credited. The assignment holder's
    /// load drops for every resolved outcome.
    pub fn complete_job(&mut self, result: JobResult) -> CompletionOutcome {
        let reporter = result.device_id.clone();
        let duration_ms = result.duration_ms;
        let outcome = self.scheduler.complete(result);

        match &outcome {
            CompletionOutcome::Completed { .. } => {
                self.registry.record_completion(&reporter, duration_ms);
            }
            CompletionOutcome::Unknown => {
                debug!(device_id = %reporter, "completion for unknown assignment dropped");
            }
            _ => {}
        }
        if let Some(holder) = outcome.holder() {
            self.registry.adjust_load(holder, -1);
        }

        self.try_assign_pending_jobs();
        self.publish_if_changed();
        outcome
    }

    /// Abandon every pending job.
    pub fn flush_jobs(&mut self) -> Vec<Job> {
        let flushed = self.scheduler.flush();
        self.publish_if_changed();
        flushed
    }

    // ── Dispatch policies ───────────────────────────────────────────

    /// Push pending work to idle devices. Returns how many jobs went out.
    pub fn try_assign_pending_jobs(&mut self) -> usize {
        self.try_assign_pending_jobs_at(epoch_millis())
    }

    /// Cloud servers are pull-only and never receive pushed work. Each
    /// other available device gets at most `push_batch_cap` jobs.
    pub fn try_assign_pending_jobs_at(&mut self, now: u64) -> usize {
        if !self.config.push_enabled || !self.scheduler.has_pending() {
            return 0;
        }

        let cap = self.config.push_batch_cap;
        let targets: Vec<(DeviceId, ConnectionId, usize, BTreeSet<JobKind>)> = self
            .registry
            .available()
            .into_iter()
            .filter(|d| !d.device_type.is_pull_only())
            .map(|d| {
                (
                    d.id.clone(),
                    d.connection_id.clone(),
                    d.free_capacity().min(cap) as usize,
                    d.capabilities.supported_jobs.clone(),
                )
            })
            .collect();

        let mut pushed = 0;
        for (device_id, connection_id, count, supported) in targets {
            if !self.scheduler.has_pending() {
                break;
            }
            let jobs = self
                .scheduler
                .batch_at(&device_id, count, Some(&supported), now);
            if jobs.is_empty() {
                continue;
            }

            self.registry.adjust_load(&device_id, jobs.len() as i64);
            pushed += jobs.len();
            debug!(%device_id, count = jobs.len(), "jobs pushed");
            self.send(
                &connection_id,
                ServerMessage::BatchDispatch {
                    jobs: jobs.iter().map(JobChunk::from).collect(),
                },
            );
        }

        if pushed > 0 {
            info!(pushed, "push dispatch complete");
        }
        pushed
    }

    /// Move old assignments from overloaded devices to underloaded ones.
    pub fn rebalance(&mut self) -> usize {
        self.rebalance_at(epoch_millis())
    }

    pub fn rebalance_at(&mut self, now: u64) -> usize {
        let mut moved = 0;

        for (over, under) in self.registry.load_balancing_pairs() {
            let Some(thief) = self.registry.get(&under) else {
                continue;
            };
            let cap = self
                .config
                .rebalance_steal_cap
                .min(thief.free_capacity() as usize);
            if cap == 0 {
                continue;
            }
            let supported = thief.capabilities.supported_jobs.clone();
            let thief_connection = thief.connection_id.clone();

            let stolen = self
                .scheduler
                .steal_at(&under, Some(over.as_str()), cap, Some(&supported), now);
            if stolen.is_empty() {
                continue;
            }

            self.revoke_from(&over, &stolen);
            self.registry.adjust_load(&under, stolen.len() as i64);
            self.send(
                &thief_connection,
                ServerMessage::BatchDispatch {
                    jobs: stolen.iter().map(|s| JobChunk::from(&s.job)).collect(),
                },
            );
            info!(from = %over, to = %under, count = stolen.len(), "load rebalanced");
            moved += stolen.len();
        }

        self.publish_if_changed();
        moved
    }

    /// Drop stolen jobs from the victim's load and tell it to stop.
    fn revoke_from(&mut self, victim: &str, stolen: &[StolenJob]) {
        self.registry.adjust_load(victim, -(stolen.len() as i64));
        if let Some(connection_id) = self.registry.get(victim).map(|d| d.connection_id.clone()) {
            self.send(
                &connection_id,
                ServerMessage::JobsRevoked {
                    job_ids: stolen.iter().map(|s| s.job.id.clone()).collect(),
                },
            );
        }
    }

    // ── Maintenance ticks ───────────────────────────────────────────

    pub fn sweep_stale_devices(&mut self) -> Vec<DeviceId> {
        self.sweep_stale_devices_at(epoch_millis())
    }

    pub fn sweep_stale_devices_at(&mut self, now: u64) -> Vec<DeviceId> {
        let stale = self.registry.sweep_stale_at(now);
        self.publish_if_changed();
        stale
    }

    /// Requeue overdue assignments and release their holders' load.
    pub fn reap_expired_jobs(&mut self) -> usize {
        self.reap_expired_jobs_at(epoch_millis())
    }

    pub fn reap_expired_jobs_at(&mut self, now: u64) -> usize {
        let reclaimed = self.scheduler.reap_expired_at(now);
        for assignment in &reclaimed {
            self.registry.adjust_load(&assignment.device_id, -1);
        }
        if !reclaimed.is_empty() {
            self.try_assign_pending_jobs_at(now);
        }
        self.publish_if_changed();
        reclaimed.len()
    }

    pub fn cleanup_join_codes(&mut self) -> usize {
        self.cleanup_join_codes_at(epoch_millis())
    }

    pub fn cleanup_join_codes_at(&mut self, now: u64) -> usize {
        self.join_codes.cleanup_expired_at(now)
    }

    // ── Operator ────────────────────────────────────────────────────

    pub fn set_run_state(&mut self, state: RunState) {
        if self.run_state != state {
            info!(from = ?self.run_state, to = ?state, "run state changed");
        }
        self.run_state = state;
        self.publish_snapshot();
    }

    /// Ask every device to run its benchmark.
    pub fn request_benchmark(&mut self) {
        info!(devices = self.registry.len(), "benchmark round requested");
        self.outbox.push(Outbound::broadcast(ServerMessage::RunBenchmark));
    }

    pub fn generate_join_code(&mut self, options: JoinCodeOptions) -> CoordinatorResult<String> {
        Ok(self.join_codes.generate_code(options)?)
    }

    /// Check a join code without consuming it.
    pub fn validate_join_code(&mut self, code: &str) -> CoordinatorResult<JoinCode> {
        Ok(self.join_codes.validate_code(code)?.clone())
    }

    // ── Transport ───────────────────────────────────────────────────

    /// Dispatch one decoded device message arriving on a connection.
    pub fn handle_device_message(&mut self, connection_id: &str, message: DeviceMessage) {
        let device_id = match &message {
            DeviceMessage::Register(_) => None,
            _ => match self.registry.device_for_connection(connection_id) {
                Some(device) => Some(device.id.clone()),
                None => {
                    warn!(%connection_id, "message from unregistered connection dropped");
                    self.send(
                        connection_id,
                        ServerMessage::Rejected {
                            reason: "not registered".to_string(),
                        },
                    );
                    return;
                }
            },
        };

        match (message, device_id) {
            (DeviceMessage::Register(registration), _) => {
                // Rejection already queued for the connection.
                let _ = self.register_device(connection_id, registration);
            }
            (DeviceMessage::Heartbeat { health, .. }, Some(device_id)) => {
                self.heartbeat(&device_id, health);
            }
            (DeviceMessage::RequestBatch { count }, Some(device_id)) => {
                let count = count.unwrap_or(self.config.default_pull_batch) as usize;
                let jobs = self.pull(&device_id, count, epoch_millis());
                if !jobs.is_empty() {
                    self.send(
                        connection_id,
                        ServerMessage::BatchDispatch {
                            jobs: jobs.iter().map(JobChunk::from).collect(),
                        },
                    );
                }
                self.publish_if_changed();
            }
            (
                DeviceMessage::JobComplete {
                    job_id,
                    result,
                    error,
                    duration_ms,
                },
                Some(device_id),
            ) => {
                self.complete_job(JobResult {
                    job_id,
                    device_id,
                    result,
                    error,
                    duration_ms,
                });
            }
            (
                DeviceMessage::BenchmarkResult {
                    score,
                    throttle_level,
                },
                Some(device_id),
            ) => {
                self.update_device_stats(&device_id, score, throttle_level);
            }
            (_, None) => {}
        }
    }

    /// Take every message queued since the last drain.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    // ── Snapshot ────────────────────────────────────────────────────

    /// Recompute the read-only view of the swarm.
    pub fn snapshot(&self) -> SwarmSnapshot {
        let devices: Vec<Device> = self.registry.devices().cloned().collect();
        let online: Vec<&Device> = devices
            .iter()
            .filter(|d| matches!(d.status, DeviceStatus::Online | DeviceStatus::Busy))
            .collect();

        let global_velocity = online
            .iter()
            .filter(|d| d.avg_job_duration_ms > 0.0)
            .map(|d| (60_000.0 / d.avg_job_duration_ms) * f64::from(d.current_load))
            .sum::<f64>()
            / 60.0;

        let latencies: Vec<f64> = devices
            .iter()
            .filter_map(|d| d.health.map(|h| h.latency_ms))
            .collect();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        let mut device_types = BTreeMap::new();
        for device in &devices {
            *device_types.entry(device.device_type).or_insert(0) += 1;
        }

        SwarmSnapshot {
            run_state: self.run_state,
            stats: SwarmStats {
                pending_jobs: self.scheduler.pending_count(),
                active_jobs: self.scheduler.active_count(),
                completed_jobs: self.scheduler.completed_count(),
                failed_jobs: self.scheduler.failed_count(),
                global_velocity,
                avg_latency_ms,
                total_devices: devices.len(),
                online_devices: online.len(),
            },
            device_types,
            devices,
        }
    }

    /// Broadcast the current snapshot to every connection.
    pub fn publish_snapshot(&mut self) {
        let snapshot = self.snapshot();
        self.outbox
            .push(Outbound::broadcast(ServerMessage::SwarmSnapshot { snapshot }));
    }

    /// Drain component events; broadcast a snapshot if anything changed.
    fn publish_if_changed(&mut self) {
        let registry_events = self.registry.drain_events();
        let scheduler_events = self.scheduler.drain_events();
        if registry_events.is_empty() && scheduler_events.is_empty() {
            return;
        }
        debug!(
            registry = registry_events.len(),
            scheduler = scheduler_events.len(),
            "state changed"
        );
        self.publish_snapshot();
    }

    fn send(&mut self, connection_id: &str, message: ServerMessage) {
        self.outbox.push(Outbound::to(connection_id, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> SwarmCoordinator {
        SwarmCoordinator::from_config(&SwarmConfig::default())
    }

    fn registration(id: &str, device_type: DeviceType, max: u32) -> DeviceRegistration {
        DeviceRegistration {
            device_id: Some(id.to_string()),
            name: id.to_string(),
            device_type: Some(device_type),
            capabilities: Some(DeviceCapabilities {
                max_concurrency: max,
                ..DeviceCapabilities::default()
            }),
            join_code: None,
        }
    }

    fn well() -> HealthSample {
        HealthSample {
            cpu_usage: 10.0,
            memory_usage: 10.0,
            latency_ms: 20.0,
        }
    }

    fn sick() -> HealthSample {
        HealthSample {
            cpu_usage: 99.0,
            ..well()
        }
    }

    fn job(id: &str) -> Job {
        Job::new(id, JobKind::MAT_MUL, serde_json::Value::Null)
    }

    fn dispatches(outbound: &[Outbound], connection_id: &str) -> Vec<JobId> {
        outbound
            .iter()
            .filter(|o| o.target == Target::Connection(connection_id.to_string()))
            .filter_map(|o| match &o.message {
                ServerMessage::BatchDispatch { jobs } => Some(jobs.iter().map(|j| j.id.clone())),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn register_assigns_id_and_defaults() {
        let mut c = coordinator();
        let id = c
            .register_device(
                "conn-1",
                DeviceRegistration {
                    name: "browser".to_string(),
                    ..DeviceRegistration::default()
                },
            )
            .unwrap();

        assert_eq!(id, "device-1");
        let device = c.registry().get(&id).unwrap();
        assert_eq!(device.device_type, DeviceType::Desktop);
        assert_eq!(device.capabilities, DeviceCapabilities::default());

        let out = c.drain_outbound();
        assert_eq!(
            out[0],
            Outbound::to("conn-1", ServerMessage::Registered { device_id: id })
        );
        assert!(out
            .iter()
            .any(|o| matches!(o.message, ServerMessage::SwarmSnapshot { .. })));
    }

    #[test]
    fn join_code_required_when_configured() {
        let mut config = SwarmConfig::default();
        config.coordinator.require_join_code = true;
        let mut c = SwarmCoordinator::from_config(&config);

        let err = c
            .register_device("conn-1", registration("dev-1", DeviceType::Desktop, 2))
            .unwrap_err();
        assert_eq!(err, CoordinatorError::JoinCodeRequired);
        assert!(err.is_admission());
        assert!(c.registry().is_empty());
        assert_eq!(
            c.drain_outbound(),
            vec![Outbound::to(
                "conn-1",
                ServerMessage::Rejected {
                    reason: "join code required".to_string()
                }
            )]
        );

        let code = c
            .generate_join_code(JoinCodeOptions::default().with_max_uses(1))
            .unwrap();
        let mut reg = registration("dev-1", DeviceType::Desktop, 2);
        reg.join_code = Some(code.clone());
        assert_eq!(c.register_device("conn-2", reg).unwrap(), "dev-1");

        // The single use is spent.
        let mut reg = registration("dev-2", DeviceType::Desktop, 2);
        reg.join_code = Some(code);
        assert_eq!(
            c.register_device("conn-3", reg).unwrap_err().to_string(),
            "not found"
        );
    }

    #[test]
    fn push_skips_cloud_servers_and_caps_batch() {
        let mut c = coordinator();
        c.register_device("conn-cloud", registration("cloud", DeviceType::CloudServer, 8))
            .unwrap();
        c.register_device("conn-desk", registration("desk", DeviceType::Desktop, 8))
            .unwrap();
        c.drain_outbound();

        let accepted = c.submit_batch((0..5).map(|i| job(&format!("job-{i}"))).collect());
        assert_eq!(accepted, 5);

        let out = c.drain_outbound();
        assert!(dispatches(&out, "conn-cloud").is_empty());
        assert_eq!(dispatches(&out, "conn-desk"), vec!["job-0", "job-1"]);
        assert_eq!(c.registry().get("desk").unwrap().current_load, 2);
        assert_eq!(c.registry().get("cloud").unwrap().current_load, 0);
        assert_eq!(c.scheduler().pending_count(), 3);
    }

    #[test]
    fn push_disabled_leaves_jobs_pending() {
        let mut config = SwarmConfig::default();
        config.coordinator.push_enabled = false;
        let mut c = SwarmCoordinator::from_config(&config);
        c.register_device("conn-1", registration("dev-1", DeviceType::Desktop, 2))
            .unwrap();
        c.submit_job(job("job-1")).unwrap();
        assert_eq!(c.scheduler().pending_count(), 1);
    }

    #[test]
    fn duplicate_job_surfaces_error() {
        let mut c = coordinator();
        c.submit_job(job("job-1")).unwrap();
        assert!(matches!(
            c.submit_job(job("job-1")),
            Err(CoordinatorError::Job(_))
        ));
    }

    #[test]
    fn completion_credits_reporter_and_frees_holder() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("dev-1", DeviceType::CloudServer, 2))
            .unwrap();
        c.submit_job(job("job-1")).unwrap();
        let jobs = c.request_batch("dev-1", 1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(c.registry().get("dev-1").unwrap().current_load, 1);

        let outcome = c.complete_job(JobResult::success("job-1", "dev-1").with_duration(250));
        assert!(matches!(outcome, CompletionOutcome::Completed { .. }));

        let device = c.registry().get("dev-1").unwrap();
        assert_eq!(device.current_load, 0);
        assert_eq!(device.total_jobs_completed, 1);
        assert_eq!(device.avg_job_duration_ms, 250.0);
        assert_eq!(c.snapshot().stats.completed_jobs, 1);
    }

    #[test]
    fn failed_completion_requeues_and_frees_load() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("dev-1", DeviceType::CloudServer, 2))
            .unwrap();
        c.submit_job(job("job-1")).unwrap();
        c.request_batch("dev-1", 1);

        let outcome = c.complete_job(JobResult::failure("job-1", "dev-1", "oom"));
        assert!(matches!(outcome, CompletionOutcome::Retrying { attempts: 1, .. }));
        let device = c.registry().get("dev-1").unwrap();
        assert_eq!(device.current_load, 0);
        assert_eq!(device.total_jobs_completed, 0);
        assert_eq!(c.scheduler().pending_count(), 1);
    }

    #[test]
    fn idle_pull_steals_from_backlogged_device() {
        let mut c = coordinator();
        c.register_device("conn-big", registration("big", DeviceType::CloudServer, 8))
            .unwrap();
        c.register_device("conn-idle", registration("idle", DeviceType::CloudServer, 2))
            .unwrap();
        c.submit_batch((0..5).map(|i| job(&format!("job-{i}"))).collect());
        assert_eq!(c.request_batch("big", 5).len(), 5);
        c.drain_outbound();

        // Fresh assignments are too young to steal.
        assert!(c.request_batch("idle", 2).is_empty());

        let now = epoch_millis() + 10_000;
        let taken = c.pull("idle", 2, now);
        assert_eq!(taken.len(), 2);
        assert_eq!(c.registry().get("big").unwrap().current_load, 3);
        assert_eq!(c.registry().get("idle").unwrap().current_load, 2);

        let out = c.drain_outbound();
        assert!(out.iter().any(|o| o.target == Target::Connection("conn-big".to_string())
            && matches!(&o.message, ServerMessage::JobsRevoked { job_ids } if job_ids.len() == 2)));
    }

    #[test]
    fn rebalance_moves_old_work_to_idle_device() {
        let mut c = coordinator();
        c.register_device("conn-hot", registration("hot", DeviceType::CloudServer, 5))
            .unwrap();
        c.register_device("conn-cold", registration("cold", DeviceType::CloudServer, 4))
            .unwrap();
        c.update_device_stats("cold", 900.0, None);
        c.submit_batch((0..4).map(|i| job(&format!("job-{i}"))).collect());
        c.request_batch("hot", 4);
        c.drain_outbound();

        let moved = c.rebalance_at(epoch_millis() + 10_000);
        assert_eq!(moved, 3);
        assert_eq!(c.registry().get("hot").unwrap().current_load, 1);
        assert_eq!(c.registry().get("cold").unwrap().current_load, 3);

        let out = c.drain_outbound();
        assert_eq!(dispatches(&out, "conn-cold").len(), 3);
        assert!(out.iter().any(|o| o.target == Target::Connection("conn-hot".to_string())
            && matches!(o.message, ServerMessage::JobsRevoked { .. })));
    }

    #[test]
    fn rebalance_drains_errored_device() {
        let mut c = coordinator();
        c.register_device("conn-hot", registration("hot", DeviceType::CloudServer, 5))
            .unwrap();
        c.register_device("conn-cold", registration("cold", DeviceType::CloudServer, 4))
            .unwrap();
        c.submit_batch((0..4).map(|i| job(&format!("job-{i}"))).collect());
        c.request_batch("hot", 4);
        c.heartbeat("hot", Some(sick()));
        assert_eq!(c.registry().get("hot").unwrap().status, DeviceStatus::Error);
        c.drain_outbound();

        let moved = c.rebalance_at(epoch_millis() + 10_000);
        assert_eq!(moved, 3);
        assert_eq!(c.registry().get("hot").unwrap().current_load, 1);
        assert_eq!(c.registry().get("hot").unwrap().status, DeviceStatus::Error);
        assert_eq!(c.registry().get("cold").unwrap().current_load, 3);
        assert_eq!(dispatches(&c.drain_outbound(), "conn-cold").len(), 3);
    }

    #[test]
    fn errored_device_pull_refused_until_healthy() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("dev-1", DeviceType::CloudServer, 2))
            .unwrap();
        c.submit_job(job("job-1")).unwrap();

        assert!(c.heartbeat("dev-1", Some(sick())));
        assert!(c.request_batch("dev-1", 1).is_empty());
        assert_eq!(c.scheduler().pending_count(), 1);

        assert!(c.heartbeat("dev-1", Some(well())));
        let jobs = c.request_batch("dev-1", 1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "job-1");
    }

    #[test]
    fn second_device_on_bound_connection_rejected() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("dev-a", DeviceType::Desktop, 2))
            .unwrap();
        c.drain_outbound();

        let err = c
            .register_device("conn-1", registration("dev-b", DeviceType::Desktop, 2))
            .unwrap_err();
        assert_eq!(err, CoordinatorError::ConnectionInUse("dev-a".to_string()));
        assert!(err.is_admission());
        assert!(c.registry().get("dev-b").is_none());
        assert_eq!(
            c.drain_outbound()[0],
            Outbound::to(
                "conn-1",
                ServerMessage::Rejected {
                    reason: "connection already bound to device dev-a".to_string()
                }
            )
        );

        // Re-registering the bound device on its own connection is fine.
        assert_eq!(
            c.register_device("conn-1", registration("dev-a", DeviceType::Desktop, 2))
                .unwrap(),
            "dev-a"
        );

        assert!(c.unregister_device("conn-1"));
        assert!(c.registry().is_empty());
    }

    #[test]
    fn reaper_releases_holder_load() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("dev-1", DeviceType::CloudServer, 2))
            .unwrap();
        c.submit_job(job("job-1")).unwrap();
        c.request_batch("dev-1", 1);

        assert_eq!(c.reap_expired_jobs_at(epoch_millis() + 65_000), 1);
        assert_eq!(c.registry().get("dev-1").unwrap().current_load, 0);
        assert_eq!(
            c.scheduler().job("job-1").unwrap().status,
            JobStatus::Pending
        );
    }

    #[test]
    fn velocity_estimate() {
        let mut c = coordinator();
        assert_eq!(c.snapshot().stats.global_velocity, 0.0);

        c.register_device("conn-1", registration("dev-1", DeviceType::CloudServer, 4))
            .unwrap();
        c.submit_batch((0..2).map(|i| job(&format!("job-{i}"))).collect());
        c.request_batch("dev-1", 2);
        c.complete_job(JobResult::success("job-0", "dev-1").with_duration(500));

        // One job in flight at 500ms each: 120 jobs/min, 2 jobs/s.
        let stats = c.snapshot().stats;
        assert_eq!(stats.global_velocity, 2.0);
        assert_eq!(stats.online_devices, 1);
        assert_eq!(stats.active_jobs, 1);
    }

    #[test]
    fn snapshot_histogram_and_latency() {
        let mut c = coordinator();
        c.register_device("conn-1", registration("a", DeviceType::Mobile, 2))
            .unwrap();
        c.register_device("conn-2", registration("b", DeviceType::Mobile, 2))
            .unwrap();
        c.register_device("conn-3", registration("c", DeviceType::Tablet, 2))
            .unwrap();
        for (id, latency) in [("a", 100.0), ("b", 300.0)] {
            c.heartbeat(
                id,
                Some(HealthSample {
                    cpu_usage: 10.0,
                    memory_usage: 10.0,
                    latency_ms: latency,
                }),
            );
        }

        let snapshot = c.snapshot();
        assert_eq!(snapshot.device_types[&DeviceType::Mobile], 2);
        assert_eq!(snapshot.device_types[&DeviceType::Tablet], 1);
        assert_eq!(snapshot.stats.avg_latency_ms, 200.0);
        assert_eq!(snapshot.stats.total_devices, 3);
    }

    #[test]
    fn run_state_and_benchmark_broadcast() {
        let mut c = coordinator();
        c.set_run_state(RunState::Running);
        c.request_benchmark();

        let out = c.drain_outbound();
        assert!(out.iter().all(|o| o.target == Target::Broadcast));
        assert!(matches!(
            &out[0].message,
            ServerMessage::SwarmSnapshot { snapshot } if snapshot.run_state == RunState::Running
        ));
        assert_eq!(out[1].message, ServerMessage::RunBenchmark);
    }

    #[test]
    fn message_from_unregistered_connection_rejected() {
        let mut c = coordinator();
        c.handle_device_message("conn-x", DeviceMessage::RequestBatch { count: None });
        assert_eq!(
            c.drain_outbound(),
            vec![Outbound::to(
                "conn-x",
                ServerMessage::Rejected {
                    reason: "not registered".to_string()
                }
            )]
        );
    }

    #[test]
    fn device_messages_drive_the_pull_cycle() {
        let mut c = coordinator();
        c.handle_device_message(
            "conn-1",
            DeviceMessage::Register(registration("dev-1", DeviceType::CloudServer, 2)),
        );
        c.submit_job(job("job-1")).unwrap();
        c.drain_outbound();

        c.handle_device_message("conn-1", DeviceMessage::RequestBatch { count: None });
        assert_eq!(dispatches(&c.drain_outbound(), "conn-1"), vec!["job-1"]);

        c.handle_device_message(
            "conn-1",
            DeviceMessage::JobComplete {
                job_id: "job-1".to_string(),
                result: Some(serde_json::json!({"ok": true})),
                error: None,
                duration_ms: Some(40),
            },
        );
        c.handle_device_message(
            "conn-1",
            DeviceMessage::BenchmarkResult {
                score: 1234.0,
                throttle_level: Some(0.25),
            },
        );

        let device = c.registry().get("dev-1").unwrap();
        assert_eq!(device.total_jobs_completed, 1);
        assert_eq!(device.ops_score, 1234.0);
        assert_eq!(device.throttle_level, 0.25);
        assert_eq!(
            c.scheduler().job("job-1").unwrap().result,
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn join_code_validation_passthrough() {
        let mut c = coordinator();
        let code = c.generate_join_code(JoinCodeOptions::default()).unwrap();
        assert_eq!(c.validate_join_code(&code).unwrap().code, code);
        assert!(matches!(
            c.validate_join_code("ZZZZZZ"),
            Err(CoordinatorError::AdmissionDenied(_))
        ));
    }
}
