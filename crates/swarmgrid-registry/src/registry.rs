//! Device registry: tracks device membership, load, and liveness.
//!
//! The registry owns every `Device` record. Other components read through
//! it and mutate only via its methods. Notable changes are recorded as
//! `RegistryEvent`s which the owner drains in order.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use swarmgrid_core::*;

use crate::health::assess;
use crate::scoring;

/// Membership change recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Joined(DeviceId),
    Left(DeviceId),
    Updated(DeviceId),
    Stale(DeviceId),
}

/// Single source of truth for device existence, capability, load, and health.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    config: RegistryConfig,
    /// Ordered by id so iteration (and tie-breaking) is deterministic.
    devices: BTreeMap<DeviceId, Device>,
    /// connection_id → device_id, for routing disconnects.
    connections: HashMap<ConnectionId, DeviceId>,
    events: Vec<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            devices: BTreeMap::new(),
            connections: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert or overwrite a device by id.
    pub fn register(&mut self, device: Device) {
        let device_id = device.id.clone();
        let superseded = self
            .devices
            .get(&device_id)
            .map(|previous| previous.connection_id.clone())
            .filter(|previous| *previous != device.connection_id);
        if let Some(previous) = superseded {
            self.unbind_connection(&previous, &device_id);
        }

        self.connections
            .insert(device.connection_id.clone(), device_id.clone());
        info!(
            %device_id,
            connection_id = %device.connection_id,
            device_type = %device.device_type,
            max_concurrency = device.capabilities.max_concurrency,
            "device registered"
        );
        self.devices.insert(device_id.clone(), device);
        self.events.push(RegistryEvent::Joined(device_id));
    }

    /// Move an existing device onto a new connection.
    ///
    /// Accumulated score, job count, and load are kept. The status is
    /// re-derived from the persisted `enabled` flag, so an operator-disabled
    /// device stays disabled.
    pub fn rebind_connection(
        &mut self,
        device_id: &str,
        connection_id: &str,
        now: u64,
    ) -> Option<&Device> {
        let previous = {
            let device = self.devices.get_mut(device_id)?;
            let previous = std::mem::replace(&mut device.connection_id, connection_id.to_string());
            device.generation += 1;
            device.connected_at = now;
            device.last_heartbeat = now;
            device.status = if device.enabled {
                DeviceStatus::for_load(device.current_load)
            } else {
                DeviceStatus::Disabled
            };
            info!(
                %device_id,
                %connection_id,
                generation = device.generation,
                status = %device.status,
                "device reconnected"
            );
            previous
        };

        if previous != connection_id {
            self.unbind_connection(&previous, device_id);
        }
        self.connections
            .insert(connection_id.to_string(), device_id.to_string());
        self.events
            .push(RegistryEvent::Updated(device_id.to_string()));
        self.devices.get(device_id)
    }

    /// Remove a device and its connection index entry.
    ///
    /// Callers must check that the disconnecting connection is still the
    /// device's current one before calling this.
    pub fn unregister(&mut self, device_id: &str) -> Option<Device> {
        let device = self.devices.remove(device_id)?;
        self.unbind_connection(&device.connection_id, device_id);
        info!(%device_id, connection_id = %device.connection_id, "device unregistered");
        self.events.push(RegistryEvent::Left(device_id.to_string()));
        Some(device)
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Resolve the device currently indexed under a connection.
    pub fn device_for_connection(&self, connection_id: &str) -> Option<&Device> {
        self.connections
            .get(connection_id)
            .and_then(|id| self.devices.get(id))
    }

    /// All devices, ordered by id.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Set a device's load and derive its status. Refreshes its heartbeat.
    ///
    /// Load is clamped to `max_concurrency`. Returns false for unknown devices.
    pub fn update_load(&mut self, device_id: &str, load: u32) -> bool {
        self.update_load_at(device_id, load, epoch_millis())
    }

    pub fn update_load_at(&mut self, device_id: &str, load: u32, now: u64) -> bool {
        let Some(device) = self.devices.get_mut(device_id) else {
            warn!(%device_id, "load update for unknown device");
            return false;
        };

        let max = device.capabilities.max_concurrency;
        if load > max {
            warn!(%device_id, load, max, "load exceeds max concurrency, clamping");
        }
        device.current_load = load.min(max);
        device.last_heartbeat = now;
        device.status = match device.status {
            DeviceStatus::Disabled | DeviceStatus::Error => device.status,
            _ if !device.enabled => DeviceStatus::Disabled,
            _ => DeviceStatus::for_load(device.current_load),
        };
        debug!(%device_id, load = device.current_load, status = %device.status, "load updated");
        true
    }

    /// Shift a device's load by `delta`, clamped to `[0, max_concurrency]`.
    ///
    /// Unlike `update_load`, this is bookkeeping and not a sign of life:
    /// the heartbeat is untouched and an offline device stays offline.
    pub fn adjust_load(&mut self, device_id: &str, delta: i64) -> Option<u32> {
        let device = self.devices.get_mut(device_id)?;

        let max = i64::from(device.capabilities.max_concurrency);
        let load = (i64::from(device.current_load) + delta).clamp(0, max);
        device.current_load = u32::try_from(load).unwrap_or_default();
        device.status = match device.status {
            DeviceStatus::Disabled | DeviceStatus::Error | DeviceStatus::Offline => device.status,
            _ if !device.enabled => DeviceStatus::Disabled,
            _ => DeviceStatus::for_load(device.current_load),
        };
        debug!(%device_id, delta, load = device.current_load, "load adjusted");
        Some(device.current_load)
    }

    /// Enable or disable a device (operator override).
    pub fn toggle_device(&mut self, device_id: &str, enabled: bool) -> bool {
        let Some(device) = self.devices.get_mut(device_id) else {
            return false;
        };

        device.enabled = enabled;
        device.status = if enabled {
            DeviceStatus::for_load(device.current_load)
        } else {
            DeviceStatus::Disabled
        };
        info!(%device_id, enabled, "device toggled");
        self.events
            .push(RegistryEvent::Updated(device_id.to_string()));
        true
    }

    /// Record a heartbeat, optionally carrying a health sample.
    pub fn record_heartbeat(&mut self, device_id: &str, health: Option<HealthSample>) -> bool {
        self.record_heartbeat_at(device_id, health, epoch_millis())
    }

    pub fn record_heartbeat_at(
        &mut self,
        device_id: &str,
        health: Option<HealthSample>,
        now: u64,
    ) -> bool {
        let Some(device) = self.devices.get_mut(device_id) else {
            warn!(%device_id, "heartbeat from unknown device");
            return false;
        };

        device.last_heartbeat = now;
        let before = device.status;

        if let Some(sample) = health {
            device.health = Some(sample);
            let verdict = assess(&sample, &self.config);
            if !verdict.is_healthy() {
                if device.enabled && device.status != DeviceStatus::Error {
                    warn!(%device_id, ?verdict, "device unhealthy");
                    device.status = DeviceStatus::Error;
                }
            } else if device.status == DeviceStatus::Error {
                device.status = DeviceStatus::for_load(device.current_load);
                info!(%device_id, status = %device.status, "device recovered");
            }
        }

        if device.status == DeviceStatus::Offline && device.enabled {
            device.status = DeviceStatus::for_load(device.current_load);
            info!(%device_id, "stale device back online");
        }

        if device.status != before {
            self.events
                .push(RegistryEvent::Updated(device_id.to_string()));
        } else {
            debug!(%device_id, "heartbeat received");
        }
        true
    }

    /// Credit a finished job to a device and fold its duration into the
    /// running mean.
    pub fn record_completion(&mut self, device_id: &str, duration_ms: Option<u64>) -> bool {
        let Some(device) = self.devices.get_mut(device_id) else {
            return false;
        };

        device.total_jobs_completed += 1;
        if let Some(duration) = duration_ms {
            let n = device.total_jobs_completed as f64;
            device.avg_job_duration_ms += (duration as f64 - device.avg_job_duration_ms) / n;
        }
        true
    }

    /// Apply a benchmark result.
    pub fn update_stats(
        &mut self,
        device_id: &str,
        ops_score: f64,
        throttle_level: Option<f64>,
    ) -> bool {
        let Some(device) = self.devices.get_mut(device_id) else {
            return false;
        };

        device.ops_score = ops_score.max(0.0);
        if let Some(throttle) = throttle_level {
            device.throttle_level = throttle.clamp(0.0, 1.0);
        }
        info!(%device_id, ops_score = device.ops_score, "device benchmark recorded");
        self.events
            .push(RegistryEvent::Updated(device_id.to_string()));
        true
    }

    /// Devices that can take more work right now, ordered by id.
    pub fn available(&self) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.is_active() && d.current_load < d.capabilities.max_concurrency)
            .collect()
    }

    /// The highest-scoring available device, if any.
    pub fn find_best_device(&self, preferred: &[DeviceType]) -> Option<&Device> {
        scoring::best_device(self.available(), preferred)
    }

    /// `(overloaded, underloaded)` device id pairs for rebalancing.
    pub fn load_balancing_pairs(&self) -> Vec<(DeviceId, DeviceId)> {
        let candidates: Vec<&Device> = self.devices.values().collect();
        scoring::balancing_pairs(&candidates)
            .into_iter()
            .map(|(over, under)| (over.id.clone(), under.id.clone()))
            .collect()
    }

    /// Mark devices with an old heartbeat as offline.
    ///
    /// Returns the ids of devices that went stale on this sweep.
    pub fn sweep_stale(&mut self) -> Vec<DeviceId> {
        self.sweep_stale_at(epoch_millis())
    }

    pub fn sweep_stale_at(&mut self, now: u64) -> Vec<DeviceId> {
        let timeout = self.config.heartbeat_timeout_ms();
        let mut stale = Vec::new();

        for device in self.devices.values_mut() {
            if matches!(device.status, DeviceStatus::Offline | DeviceStatus::Disabled) {
                continue;
            }
            let age = now.saturating_sub(device.last_heartbeat);
            if age > timeout {
                device.status = DeviceStatus::Offline;
                warn!(device_id = %device.id, age_ms = age, "device stale, marked offline");
                stale.push(device.id.clone());
            }
        }

        self.events
            .extend(stale.iter().cloned().map(RegistryEvent::Stale));
        stale
    }

    /// Take all events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    fn unbind_connection(&mut self, connection_id: &str, device_id: &str) {
        if self
            .connections
            .get(connection_id)
            .is_some_and(|bound| bound == device_id)
        {
            self.connections.remove(connection_id);
        }
    }
}
