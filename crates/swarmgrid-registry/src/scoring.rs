//! Device scoring for push targets and rebalancing.
//!
//! A device's score is its benchmark throughput scaled by how much of its
//! concurrency budget is still free:
//!
//! ```text
//! score = ops_score × (1 − load / max_concurrency) × (1.2 if preferred type)
//! ```

use swarmgrid_core::{Device, DeviceType};

/// Multiplier applied to devices of a preferred type.
pub const PREFERRED_TYPE_BONUS: f64 = 1.2;

/// Utilization at or above which a device is considered overloaded.
pub const OVERLOAD_THRESHOLD: f64 = 0.8;

/// Utilization below which a device is considered underloaded.
pub const UNDERLOAD_THRESHOLD: f64 = 0.3;

/// Score a single device.
pub fn score_device(device: &Device, preferred: &[DeviceType]) -> f64 {
    let headroom = (1.0 - device.utilization()).max(0.0);
    let score = device.ops_score * headroom;
    if preferred.contains(&device.device_type) {
        score * PREFERRED_TYPE_BONUS
    } else {
        score
    }
}

/// Pick the best-scoring device. Ties go to the earliest candidate.
pub fn best_device<'a>(
    candidates: impl IntoIterator<Item = &'a Device>,
    preferred: &[DeviceType],
) -> Option<&'a Device> {
    let mut best: Option<(&Device, f64)> = None;
    for device in candidates {
        let score = score_device(device, preferred);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((device, score)),
        }
    }
    best.map(|(device, _)| device)
}

/// Pair every overloaded device with the fastest underloaded one.
///
/// Any device can shed work, whatever its status. Only active devices take
/// it. An underloaded device may appear in several pairs.
pub fn balancing_pairs<'a>(candidates: &[&'a Device]) -> Vec<(&'a Device, &'a Device)> {
    let mut pairs = Vec::new();

    for &over in candidates {
        if over.capabilities.max_concurrency == 0 || over.utilization() < OVERLOAD_THRESHOLD {
            continue;
        }

        let mut target: Option<&Device> = None;
        for &under in candidates {
            if under.id == over.id
                || !under.is_active()
                || under.capabilities.max_concurrency == 0
                || under.utilization() >= UNDERLOAD_THRESHOLD
            {
                continue;
            }
            match target {
                Some(t) if under.ops_score <= t.ops_score => {}
                _ => target = Some(under),
            }
        }

        if let Some(under) = target {
            pairs.push((over, under));
        }
    }

    pairs
}
