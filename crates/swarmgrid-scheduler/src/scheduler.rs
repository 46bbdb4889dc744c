//! Work-stealing scheduler: job queue, assignment, retry, and stealing.
//!
//! Selection is first-match in submission order among kind-compatible
//! pending jobs. A job that is reclaimed keeps its original position, so
//! it is picked up again ahead of newer work.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, info, warn};

use swarmgrid_core::*;

use crate::error::{SchedulerError, SchedulerResult};

/// Notable queue transitions, drained by the owner in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Submitted { count: usize },
    Assigned { job_id: JobId, device_id: DeviceId },
    Completed { job_id: JobId, device_id: DeviceId },
    Requeued { job_id: JobId, attempts: u32 },
    GaveUp { job_id: JobId, error: String },
    Stolen { job_id: JobId, from: DeviceId, to: DeviceId },
    TimedOut { job_id: JobId, device_id: DeviceId },
    Released { job_id: JobId, device_id: DeviceId },
}

/// What `complete()` did with a result.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The job succeeded. `holder` is the device the assignment belonged to.
    Completed { job: Job, holder: DeviceId },
    /// The job failed and went back to the queue.
    Retrying {
        job_id: JobId,
        holder: DeviceId,
        attempts: u32,
    },
    /// The job failed for the last time and was given up.
    GaveUp { job: Job, holder: DeviceId },
    /// No live assignment for this job. Nothing changed.
    Unknown,
}

impl CompletionOutcome {
    /// Device whose assignment was resolved, if any.
    pub fn holder(&self) -> Option<&str> {
        match self {
            CompletionOutcome::Completed { holder, .. }
            | CompletionOutcome::Retrying { holder, .. }
            | CompletionOutcome::GaveUp { holder, .. } => Some(holder),
            CompletionOutcome::Unknown => None,
        }
    }
}

/// A job moved to a new device by stealing.
#[derive(Debug, Clone, PartialEq)]
pub struct StolenJob {
    pub job: Job,
    pub from: DeviceId,
}

#[derive(Debug, Default)]
struct FailureRecord {
    attempts: u32,
    last_error: String,
}

/// The job queue and its assignment/retry/steal protocol.
#[derive(Debug, Default)]
pub struct WorkStealingScheduler {
    config: SchedulerConfig,
    /// Submission sequence → job.
    jobs: BTreeMap<u64, Job>,
    /// job_id → submission sequence.
    index: HashMap<JobId, u64>,
    next_seq: u64,
    assignments: HashMap<JobId, Assignment>,
    failures: HashMap<JobId, FailureRecord>,
    /// Completed job ids, oldest first.
    completed: VecDeque<JobId>,
    succeeded_total: u64,
    failed_total: u64,
    events: Vec<SchedulerEvent>,
}

impl WorkStealingScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Queue a single job.
    pub fn submit(&mut self, job: Job) -> SchedulerResult<()> {
        self.submit_at(job, epoch_millis())
    }

    pub fn submit_at(&mut self, job: Job, now: u64) -> SchedulerResult<()> {
        self.enqueue(job, now)?;
        self.events.push(SchedulerEvent::Submitted { count: 1 });
        Ok(())
    }

    /// Queue many jobs. Rejected jobs are logged and skipped.
    ///
    /// Returns the number of jobs accepted.
    pub fn submit_batch(&mut self, jobs: Vec<Job>) -> usize {
        self.submit_batch_at(jobs, epoch_millis())
    }

    pub fn submit_batch_at(&mut self, jobs: Vec<Job>, now: u64) -> usize {
        let mut accepted = 0;
        for job in jobs {
            match self.enqueue(job, now) {
                Ok(()) => accepted += 1,
                Err(e) => warn!(error = %e, "job rejected from batch"),
            }
        }
        if accepted > 0 {
            self.events
                .push(SchedulerEvent::Submitted { count: accepted });
        }
        accepted
    }

    fn enqueue(&mut self, mut job: Job, now: u64) -> SchedulerResult<()> {
        if job.id.is_empty() {
            return Err(SchedulerError::EmptyJobId);
        }

        if let Some(&seq) = self.index.get(&job.id) {
            let finished = self
                .jobs
                .get(&seq)
                .is_some_and(|existing| existing.status == JobStatus::Completed);
            if !finished {
                return Err(SchedulerError::DuplicateJob(job.id));
            }
            // A finished job may be resubmitted; the old record goes.
            self.jobs.remove(&seq);
            self.completed.retain(|id| *id != job.id);
            self.failures.remove(&job.id);
        }

        job.created_at = now;
        job.status = JobStatus::Pending;
        job.assigned_to = None;
        job.assigned_at = None;
        job.outcome = None;
        job.result = None;

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(job_id = %job.id, kind = %job.kind, "job submitted");
        self.index.insert(job.id.clone(), seq);
        self.jobs.insert(seq, job);
        Ok(())
    }

    // ── Assignment ──────────────────────────────────────────────────

    /// Hand the first matching pending job to a device.
    pub fn next_job(
        &mut self,
        device_id: &str,
        supported: Option<&BTreeSet<JobKind>>,
    ) -> Option<Job> {
        self.batch(device_id, 1, supported).into_iter().next()
    }

    /// Hand up to `count` matching pending jobs to a device.
    ///
    /// `supported = None` matches any kind.
    pub fn batch(
        &mut self,
        device_id: &str,
        count: usize,
        supported: Option<&BTreeSet<JobKind>>,
    ) -> Vec<Job> {
        self.batch_at(device_id, count, supported, epoch_millis())
    }

    pub fn batch_at(
        &mut self,
        device_id: &str,
        count: usize,
        supported: Option<&BTreeSet<JobKind>>,
        now: u64,
    ) -> Vec<Job> {
        if count == 0 {
            return Vec::new();
        }

        let picked: Vec<u64> = self
            .jobs
            .iter()
            .filter(|(_, job)| {
                job.status == JobStatus::Pending && supported.is_none_or(|kinds| kinds.contains(&job.kind))
            })
            .take(count)
            .map(|(seq, _)| *seq)
            .collect();

        let expires_at = now.saturating_add(self.config.assignment_timeout_ms());
        let mut granted = Vec::with_capacity(picked.len());

        for seq in picked {
            let Some(job) = self.jobs.get_mut(&seq) else {
                continue;
            };
            job.status = JobStatus::Assigned;
            job.assigned_to = Some(device_id.to_string());
            job.assigned_at = Some(now);

            let retries = self
                .failures
                .get(&job.id)
                .map(|f| f.attempts)
                .unwrap_or(0);
            self.assignments.insert(
                job.id.clone(),
                Assignment {
                    job_id: job.id.clone(),
                    device_id: device_id.to_string(),
                    assigned_at: now,
                    expires_at,
                    retries,
                },
            );
            debug!(job_id = %job.id, %device_id, retries, "job assigned");
            self.events.push(SchedulerEvent::Assigned {
                job_id: job.id.clone(),
                device_id: device_id.to_string(),
            });
            granted.push(job.clone());
        }

        granted
    }

    // ── Completion ──────────────────────────────────────────────────

    /// Resolve a device's report on a job.
    pub fn complete(&mut self, result: JobResult) -> CompletionOutcome {
        let Some(assignment) = self.assignments.remove(&result.job_id) else {
            debug!(job_id = %result.job_id, device_id = %result.device_id, "completion for unknown assignment");
            return CompletionOutcome::Unknown;
        };

        if let Some(error) = result.error {
            return self.fail(assignment, error);
        }

        let holder = assignment.device_id;
        let Some(job) = self.job_mut(&result.job_id) else {
            return CompletionOutcome::Unknown;
        };
        job.status = JobStatus::Completed;
        job.outcome = Some(JobOutcome::Succeeded);
        job.result = result.result;
        let job = job.clone();

        self.failures.remove(&job.id);
        self.succeeded_total += 1;
        self.mark_finished(job.id.clone());
        info!(job_id = %job.id, device_id = %result.device_id, "job completed");
        self.events.push(SchedulerEvent::Completed {
            job_id: job.id.clone(),
            device_id: result.device_id,
        });

        CompletionOutcome::Completed { job, holder }
    }

    fn fail(&mut self, assignment: Assignment, error: String) -> CompletionOutcome {
        let job_id = assignment.job_id;
        let holder = assignment.device_id;
        let max_retries = self.config.max_retries;

        let record = self.failures.entry(job_id.clone()).or_default();
        record.attempts += 1;
        record.last_error = error;
        let attempts = record.attempts;
        let last_error = record.last_error.clone();

        let Some(job) = self.job_mut(&job_id) else {
            return CompletionOutcome::Unknown;
        };
        job.assigned_to = None;
        job.assigned_at = None;

        if attempts >= max_retries {
            job.status = JobStatus::Completed;
            job.outcome = Some(JobOutcome::Failed {
                error: last_error.clone(),
            });
            let job = job.clone();

            self.failures.remove(&job_id);
            self.failed_total += 1;
            self.mark_finished(job_id.clone());
            warn!(%job_id, attempts, error = %last_error, "job failed permanently");
            self.events.push(SchedulerEvent::GaveUp {
                job_id,
                error: last_error,
            });
            CompletionOutcome::GaveUp { job, holder }
        } else {
            job.status = JobStatus::Pending;
            info!(%job_id, attempts, max_retries, error = %last_error, "job failed, requeued");
            self.events.push(SchedulerEvent::Requeued {
                job_id: job_id.clone(),
                attempts,
            });
            CompletionOutcome::Retrying {
                job_id,
                holder,
                attempts,
            }
        }
    }

    // ── Stealing ────────────────────────────────────────────────────

    /// Move up to `max_jobs` old assignments from any other device to `thief`.
    pub fn steal_work(
        &mut self,
        thief: &str,
        max_jobs: usize,
        supported: Option<&BTreeSet<JobKind>>,
    ) -> Vec<StolenJob> {
        self.steal_at(thief, None, max_jobs, supported, epoch_millis())
    }

    /// Move up to `max_jobs` old assignments from `victim` to `thief`.
    pub fn steal_from(
        &mut self,
        victim: &str,
        thief: &str,
        max_jobs: usize,
        supported: Option<&BTreeSet<JobKind>>,
    ) -> Vec<StolenJob> {
        self.steal_at(thief, Some(victim), max_jobs, supported, epoch_millis())
    }

    /// Stealing with an explicit clock. Oldest assignments go first.
    ///
    /// Only assignments at least `steal_min_age` old are eligible; pending
    /// jobs are never touched.
    pub fn steal_at(
        &mut self,
        thief: &str,
        victim: Option<&str>,
        max_jobs: usize,
        supported: Option<&BTreeSet<JobKind>>,
        now: u64,
    ) -> Vec<StolenJob> {
        if max_jobs == 0 {
            return Vec::new();
        }

        let min_age = self.config.steal_min_age_ms();
        let mut candidates: Vec<(u64, u64, JobId)> = self
            .assignments
            .values()
            .filter(|a| a.device_id != thief)
            .filter(|a| victim.is_none_or(|v| a.device_id == v))
            .filter(|a| now.saturating_sub(a.assigned_at) >= min_age)
            .filter_map(|a| {
                let seq = *self.index.get(&a.job_id)?;
                let job = self.jobs.get(&seq)?;
                supported
                    .is_none_or(|kinds| kinds.contains(&job.kind))
                    .then(|| (a.assigned_at, seq, a.job_id.clone()))
            })
            .collect();
        candidates.sort();
        candidates.truncate(max_jobs);

        let expires_at = now.saturating_add(self.config.assignment_timeout_ms());
        let mut stolen = Vec::with_capacity(candidates.len());

        for (_, seq, job_id) in candidates {
            let Some(assignment) = self.assignments.get_mut(&job_id) else {
                continue;
            };
            let from = std::mem::replace(&mut assignment.device_id, thief.to_string());
            assignment.assigned_at = now;
            assignment.expires_at = expires_at;

            let Some(job) = self.jobs.get_mut(&seq) else {
                continue;
            };
            job.assigned_to = Some(thief.to_string());
            job.assigned_at = Some(now);

            info!(%job_id, %from, to = %thief, "job stolen");
            self.events.push(SchedulerEvent::Stolen {
                job_id,
                from: from.clone(),
                to: thief.to_string(),
            });
            stolen.push(StolenJob {
                job: job.clone(),
                from,
            });
        }

        stolen
    }

    /// Whether a device holds enough assignments that it should shed some.
    pub fn should_offer_work(&self, device_id: &str) -> bool {
        self.assigned_count_for(device_id) >= self.config.offer_threshold
    }

    // ── Reclamation ─────────────────────────────────────────────────

    /// Return every overdue assignment's job to the queue.
    pub fn reap_expired(&mut self) -> Vec<Assignment> {
        self.reap_expired_at(epoch_millis())
    }

    pub fn reap_expired_at(&mut self, now: u64) -> Vec<Assignment> {
        let expired: Vec<JobId> = self
            .assignments
            .values()
            .filter(|a| a.is_expired(now))
            .map(|a| a.job_id.clone())
            .collect();

        let reclaimed = self.reclaim(expired);
        for assignment in &reclaimed {
            warn!(
                job_id = %assignment.job_id,
                device_id = %assignment.device_id,
                "assignment timed out, job requeued"
            );
            self.events.push(SchedulerEvent::TimedOut {
                job_id: assignment.job_id.clone(),
                device_id: assignment.device_id.clone(),
            });
        }
        reclaimed
    }

    /// Return all of a departing device's jobs to the queue.
    pub fn release_device(&mut self, device_id: &str) -> Vec<JobId> {
        let held: Vec<JobId> = self
            .assignments
            .values()
            .filter(|a| a.device_id == device_id)
            .map(|a| a.job_id.clone())
            .collect();

        let released: Vec<JobId> = self
            .reclaim(held)
            .into_iter()
            .map(|a| a.job_id)
            .collect();
        if !released.is_empty() {
            info!(%device_id, count = released.len(), "released jobs of departed device");
        }
        for job_id in &released {
            self.events.push(SchedulerEvent::Released {
                job_id: job_id.clone(),
                device_id: device_id.to_string(),
            });
        }
        released
    }

    fn reclaim(&mut self, job_ids: Vec<JobId>) -> Vec<Assignment> {
        let mut reclaimed: Vec<(u64, Assignment)> = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let Some(assignment) = self.assignments.remove(&job_id) else {
                continue;
            };
            let Some(&seq) = self.index.get(&job_id) else {
                continue;
            };
            if let Some(job) = self.jobs.get_mut(&seq) {
                job.status = JobStatus::Pending;
                job.assigned_to = None;
                job.assigned_at = None;
            }
            reclaimed.push((seq, assignment));
        }
        reclaimed.sort_by_key(|(seq, _)| *seq);
        reclaimed.into_iter().map(|(_, a)| a).collect()
    }

    /// Abandon every pending job. Emergency drain only.
    pub fn flush(&mut self) -> Vec<Job> {
        let mut flushed = Vec::new();
        for job in self.jobs.values_mut() {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Completed;
                job.outcome = Some(JobOutcome::Abandoned);
                flushed.push(job.clone());
            }
        }
        for job in &flushed {
            self.failures.remove(&job.id);
            self.mark_finished(job.id.clone());
        }
        warn!(count = flushed.len(), "pending jobs flushed");
        flushed
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.index.get(job_id).and_then(|seq| self.jobs.get(seq))
    }

    pub fn assignment(&self, job_id: &str) -> Option<&Assignment> {
        self.assignments.get(job_id)
    }

    /// Assignments held by a device, oldest first.
    pub fn assignments_for(&self, device_id: &str) -> Vec<&Assignment> {
        let mut held: Vec<&Assignment> = self
            .assignments
            .values()
            .filter(|a| a.device_id == device_id)
            .collect();
        held.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        held
    }

    pub fn assigned_count_for(&self, device_id: &str) -> usize {
        self.assignments
            .values()
            .filter(|a| a.device_id == device_id)
            .count()
    }

    /// Jobs in the queue, in submission order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn has_pending(&self) -> bool {
        self.jobs.values().any(|j| j.status == JobStatus::Pending)
    }

    pub fn pending_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.assignments.len()
    }

    /// Jobs that succeeded since startup (not reduced by eviction).
    pub fn completed_count(&self) -> u64 {
        self.succeeded_total
    }

    /// Jobs given up after exhausting retries since startup.
    pub fn failed_count(&self) -> u64 {
        self.failed_total
    }

    /// Take all events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        let seq = *self.index.get(job_id)?;
        self.jobs.get_mut(&seq)
    }

    /// Track a newly completed job and evict the oldest beyond retention.
    fn mark_finished(&mut self, job_id: JobId) {
        self.completed.push_back(job_id);
        while self.completed.len() > self.config.completed_retention {
            let Some(evicted) = self.completed.pop_front() else {
                break;
            };
            if let Some(seq) = self.index.remove(&evicted) {
                self.jobs.remove(&seq);
            }
            debug!(job_id = %evicted, "completed job evicted");
        }
    }
}
