// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schedule manager: persisted cron policies mapped onto in-process timers.
//!
//! Every enabled schedule owns exactly one timer task. A timer only sleeps
//! and hands each firing to a tracked task, so a slow dump never delays the
//! next tick of any schedule. A firing runs the executor, routes failures to
//! the notification queue, applies retention and finally advances the
//! schedule's bookkeeping whatever the outcome.
//!
//! The timer table is owned here and only reached through the manager's
//! methods under one lock. [`ScheduleManager::start`] holds that lock for
//! the whole of recovery, so API calls racing startup wait for it.
//!
//! The stored row is authoritative. A firing re-reads it, so a schedule
//! disabled or rewritten by another process is honoured at the next tick,
//! and [`ScheduleManager::reconcile`] brings the timer table back in line.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use stowage_backup_core::{BackupRecord, BackupSchedule, ScheduleId};
use stowage_server_db::ScheduleRepository;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::cron::{next_run_after, parse_cron};
use crate::error::{BackupError, Result};
use crate::executor::{BackupExecutor, RunOrigin};
use crate::notify::NotificationDispatcher;
use crate::retention::RetentionManager;

/// What a timer needs to fire one schedule.
#[derive(Clone)]
struct FiringPlan {
	schedule_id: ScheduleId,
	connection_id: String,
	cron: cron::Schedule,
	/// Cancels the timer that owns this plan.
	stop: CancellationToken,
}

impl FiringPlan {
	fn new(schedule: &BackupSchedule, cron: cron::Schedule, stop: CancellationToken) -> Self {
		Self {
			schedule_id: schedule.id,
			connection_id: schedule.connection_id.clone(),
			cron,
			stop,
		}
	}
}

struct Timer {
	cancel: CancellationToken,
	handle: JoinHandle<()>,
	cron_expression: String,
}

/// Shared by the manager, its timers and the firings they spawn.
struct Engine {
	schedules: Arc<dyn ScheduleRepository>,
	executor: Arc<BackupExecutor>,
	retention: RetentionManager,
	notifier: Arc<NotificationDispatcher>,
	in_flight: StdMutex<HashSet<String>>,
	tasks: TaskTracker,
	shutdown: CancellationToken,
}

/// Marks a connection busy until dropped.
struct InFlight<'a> {
	set: &'a StdMutex<HashSet<String>>,
	connection_id: String,
}

impl<'a> InFlight<'a> {
	fn claim(set: &'a StdMutex<HashSet<String>>, connection_id: &str) -> Option<Self> {
		let mut busy = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if !busy.insert(connection_id.to_string()) {
			return None;
		}
		Some(Self {
			set,
			connection_id: connection_id.to_string(),
		})
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		let mut busy = self
			.set
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		busy.remove(&self.connection_id);
	}
}

impl Engine {
	#[instrument(skip(self, plan), fields(schedule_id = %plan.schedule_id, connection_id = %plan.connection_id))]
	async fn fire(&self, plan: &FiringPlan, scheduled_time: DateTime<Utc>) {
		let schedule = match self.schedules.get_schedule(plan.schedule_id).await {
			Ok(Some(schedule)) if schedule.enabled => schedule,
			Ok(_) => {
				info!("schedule disabled or removed, stopping its timer");
				plan.stop.cancel();
				return;
			}
			Err(e) => {
				warn!(error = %e, "could not load schedule, skipping firing");
				return;
			}
		};

		match InFlight::claim(&self.in_flight, &schedule.connection_id) {
			Some(_guard) => {
				let origin = RunOrigin::scheduled(schedule.id, scheduled_time);
				match self.executor.execute_with(&schedule.connection_id, origin).await {
					Ok(record) => debug!(backup_id = %record.id, "scheduled backup completed"),
					Err(e) => {
						warn!(stage = e.stage(), error = %e, "scheduled backup failed");
						self.notifier.notify_failure(&schedule.connection_id, &e.to_string());
					}
				}
				if schedule.retention_days > 0 {
					self
						.retention
						.cleanup(&schedule.connection_id, schedule.retention_days, Utc::now())
						.await;
				}
			}
			None => warn!("previous backup of this connection still running, skipping firing"),
		}

		let now = Utc::now();
		let next = match parse_cron(&schedule.cron_expression)
			.and_then(|cron| next_run_after(&cron, now))
		{
			Ok(next) => Some(next),
			Err(e) => {
				warn!(error = %e, "no next run for schedule");
				None
			}
		};
		if let Err(e) = self
			.schedules
			.record_run(schedule.id, &schedule.cron_expression, now, next)
			.await
		{
			warn!(error = %e, "failed to record schedule run");
		}
	}

	fn spawn_firing(self: &Arc<Self>, plan: FiringPlan, scheduled_time: DateTime<Utc>) {
		let engine = Arc::clone(self);
		self.tasks.spawn(async move {
			engine.fire(&plan, scheduled_time).await;
		});
	}
}

/// Sleep until each cron tick and hand the firing off.
async fn run_timer(engine: Arc<Engine>, plan: FiringPlan) {
	let cancel = plan.stop.clone();
	let mut after = Utc::now();
	loop {
		let next = match next_run_after(&plan.cron, after.max(Utc::now())) {
			Ok(next) => next,
			Err(e) => {
				warn!(schedule_id = %plan.schedule_id, error = %e, "timer stopped");
				return;
			}
		};
		let wait = (next - Utc::now()).to_std().unwrap_or_default();
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = tokio::time::sleep(wait) => {}
		}
		engine.spawn_firing(plan.clone(), next);
		after = next;
	}
}

pub struct ScheduleManager {
	engine: Arc<Engine>,
	timers: Mutex<HashMap<ScheduleId, Timer>>,
}

impl ScheduleManager {
	pub fn new(
		schedules: Arc<dyn ScheduleRepository>,
		executor: Arc<BackupExecutor>,
		retention: RetentionManager,
		notifier: Arc<NotificationDispatcher>,
	) -> Self {
		Self {
			engine: Arc::new(Engine {
				schedules,
				executor,
				retention,
				notifier,
				in_flight: StdMutex::new(HashSet::new()),
				tasks: TaskTracker::new(),
				shutdown: CancellationToken::new(),
			}),
			timers: Mutex::new(HashMap::new()),
		}
	}

	pub fn executor(&self) -> &Arc<BackupExecutor> {
		&self.engine.executor
	}

	/// Load enabled schedules, fire one catch-up run for each overdue one and
	/// register their timers.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut timers = self.timers.lock().await;
		let schedules = self.engine.schedules.list_enabled_schedules().await?;
		let now = Utc::now();
		let mut caught_up = 0;

		for schedule in &schedules {
			let cron = match parse_cron(&schedule.cron_expression) {
				Ok(cron) => cron,
				Err(e) => {
					warn!(schedule_id = %schedule.id, error = %e, "skipping schedule with unusable cron expression");
					continue;
				}
			};
			let plan = self.register(&mut timers, schedule, cron);

			if let Some(missed) = schedule.next_run_time.filter(|_| schedule.is_overdue(now)) {
				info!(schedule_id = %schedule.id, missed = %missed, "running missed backup");
				self.engine.spawn_firing(plan, missed);
				caught_up += 1;
			}
		}

		info!(schedules = timers.len(), caught_up, "schedule manager started");
		Ok(())
	}

	/// Create the connection's schedule, or rewrite and re-enable the
	/// existing one. The timer is swapped under the table lock.
	#[instrument(skip(self))]
	pub async fn schedule(
		&self,
		connection_id: &str,
		cron_expression: &str,
		retention_days: u32,
	) -> Result<BackupSchedule> {
		let cron = parse_cron(cron_expression)?;
		let now = Utc::now();
		let next = next_run_after(&cron, now)?;

		if self
			.engine
			.executor
			.connections()
			.get_connection(connection_id)
			.await?
			.is_none()
		{
			return Err(BackupError::ConnectionNotFound(connection_id.to_string()));
		}

		let mut timers = self.timers.lock().await;
		let schedule = match self
			.engine
			.schedules
			.get_schedule_by_connection(connection_id)
			.await?
		{
			Some(mut existing) => {
				existing.cron_expression = cron_expression.to_string();
				existing.retention_days = retention_days;
				existing.enabled = true;
				existing.next_run_time = Some(next);
				existing.updated_at = now;
				self.engine.schedules.update_schedule(&existing).await?;
				existing
			}
			None => {
				let created =
					BackupSchedule::new(connection_id, cron_expression, retention_days, Some(next), now);
				self.engine.schedules.insert_schedule(&created).await?;
				created
			}
		};

		self.register(&mut timers, &schedule, cron);
		info!(schedule_id = %schedule.id, next_run = %next, "backup schedule saved");
		Ok(schedule)
	}

	/// Rewrite an existing schedule. A disabled schedule stays disabled.
	#[instrument(skip(self))]
	pub async fn update(
		&self,
		connection_id: &str,
		cron_expression: &str,
		retention_days: u32,
	) -> Result<BackupSchedule> {
		let cron = parse_cron(cron_expression)?;
		let now = Utc::now();
		let next = next_run_after(&cron, now)?;

		let mut timers = self.timers.lock().await;
		let mut schedule = self
			.engine
			.schedules
			.get_schedule_by_connection(connection_id)
			.await?
			.ok_or_else(|| BackupError::ScheduleNotFound(connection_id.to_string()))?;

		schedule.cron_expression = cron_expression.to_string();
		schedule.retention_days = retention_days;
		schedule.next_run_time = Some(next);
		schedule.updated_at = now;
		self.engine.schedules.update_schedule(&schedule).await?;

		if schedule.enabled {
			self.register(&mut timers, &schedule, cron);
		} else {
			unregister(&mut timers, schedule.id);
		}
		info!(schedule_id = %schedule.id, enabled = schedule.enabled, "backup schedule updated");
		Ok(schedule)
	}

	/// Stop the connection's timer and mark the schedule disabled. Backup
	/// history is kept.
	#[instrument(skip(self))]
	pub async fn disable(&self, connection_id: &str) -> Result<()> {
		let mut timers = self.timers.lock().await;
		let schedule = self
			.engine
			.schedules
			.get_schedule_by_connection(connection_id)
			.await?
			.ok_or_else(|| BackupError::ScheduleNotFound(connection_id.to_string()))?;

		unregister(&mut timers, schedule.id);
		self
			.engine
			.schedules
			.set_enabled(schedule.id, false, Utc::now())
			.await?;
		info!(schedule_id = %schedule.id, "backup schedule disabled");
		Ok(())
	}

	/// Bring the timer table in line with the stored enabled schedules:
	/// drop timers of schedules disabled or removed elsewhere and restart
	/// those created or rewritten elsewhere. No catch-up runs are fired.
	#[instrument(skip(self))]
	pub async fn reconcile(&self) -> Result<()> {
		let mut timers = self.timers.lock().await;
		let enabled = self.engine.schedules.list_enabled_schedules().await?;
		let live: HashSet<ScheduleId> = enabled.iter().map(|s| s.id).collect();

		let stale: Vec<ScheduleId> = timers
			.iter()
			.filter(|(id, timer)| timer.cancel.is_cancelled() || !live.contains(*id))
			.map(|(id, _)| *id)
			.collect();
		for id in &stale {
			unregister(&mut timers, *id);
		}

		let mut started = 0;
		for schedule in &enabled {
			if timers
				.get(&schedule.id)
				.is_some_and(|timer| timer.cron_expression == schedule.cron_expression)
			{
				continue;
			}
			match parse_cron(&schedule.cron_expression) {
				Ok(cron) => {
					self.register(&mut timers, schedule, cron);
					started += 1;
				}
				Err(e) => {
					unregister(&mut timers, schedule.id);
					warn!(schedule_id = %schedule.id, error = %e, "skipping schedule with unusable cron expression");
				}
			}
		}

		if !stale.is_empty() || started > 0 {
			info!(removed = stale.len(), started, "schedule timers reconciled");
		}
		Ok(())
	}

	/// On-demand backup. Failures are returned to the caller, not alerted.
	pub async fn run_now(&self, connection_id: &str) -> Result<BackupRecord> {
		self.engine.executor.execute(connection_id).await
	}

	/// Schedule ids with a live timer.
	pub async fn registered(&self) -> Vec<ScheduleId> {
		self
			.timers
			.lock()
			.await
			.iter()
			.filter(|(_, timer)| !timer.cancel.is_cancelled())
			.map(|(id, _)| *id)
			.collect()
	}

	/// Stop every timer and wait for firings already under way.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.engine.shutdown.cancel();
		let handles: Vec<JoinHandle<()>> = self
			.timers
			.lock()
			.await
			.drain()
			.map(|(_, timer)| timer.handle)
			.collect();
		for joined in futures::future::join_all(handles).await {
			if let Err(e) = joined {
				warn!(error = %e, "schedule timer ended abnormally");
			}
		}

		self.engine.tasks.close();
		self.engine.tasks.wait().await;
		info!("schedule manager stopped");
	}

	fn register(
		&self,
		timers: &mut HashMap<ScheduleId, Timer>,
		schedule: &BackupSchedule,
		cron: cron::Schedule,
	) -> FiringPlan {
		unregister(timers, schedule.id);

		let cancel = self.engine.shutdown.child_token();
		let plan = FiringPlan::new(schedule, cron, cancel.clone());
		let handle = tokio::spawn(run_timer(Arc::clone(&self.engine), plan.clone()));
		timers.insert(
			schedule.id,
			Timer {
				cancel,
				handle,
				cron_expression: schedule.cron_expression.clone(),
			},
		);
		debug!(schedule_id = %schedule.id, "timer registered");
		plan
	}
}

fn unregister(timers: &mut HashMap<ScheduleId, Timer>, schedule_id: ScheduleId) {
	if let Some(old) = timers.remove(&schedule_id) {
		old.cancel.cancel();
		debug!(schedule_id = %schedule_id, "timer removed");
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use crate::executor::testing::{Fixture, FAILING_TOOL, RECORDING_TOOL};
	use crate::notify::testing::RecordingTransport;
	use crate::notify::NotificationWorker;
	use chrono::{Duration, Timelike};
	use stowage_backup_core::{BackupStatus, NotificationPreferences, UserSettings};
	use stowage_server_db::{
		BackupRepository, NotificationRepository, SqliteNotificationRepository,
		SqliteScheduleRepository, SqliteSettingsStore,
	};

	struct Harness {
		fx: Fixture,
		schedules: Arc<SqliteScheduleRepository>,
		notifications: Arc<SqliteNotificationRepository>,
		notifier: Arc<NotificationDispatcher>,
		manager: ScheduleManager,
	}

	async fn harness(tool: &str) -> Harness {
		let fx = Fixture::new().await;
		fx.install_tool("pg_dump", tool);
		fx.add_connection("c1", "postgresql", "db.internal", false).await;

		let settings = Arc::new(SqliteSettingsStore::new(fx.pool.clone()));
		settings
			.save_settings(&UserSettings {
				user_id: "u1".into(),
				notifications: NotificationPreferences {
					notify_dashboard: true,
					..Default::default()
				},
				offsite: Default::default(),
			})
			.await
			.unwrap();

		let schedules = Arc::new(SqliteScheduleRepository::new(fx.pool.clone()));
		let notifications = Arc::new(SqliteNotificationRepository::new(fx.pool.clone()));
		let worker = NotificationWorker::new(
			fx.connections.clone(),
			settings,
			notifications.clone(),
			fx.cipher.clone(),
			Arc::new(RecordingTransport::default()),
		);
		let notifier = Arc::new(NotificationDispatcher::start(worker, 16));
		let manager = ScheduleManager::new(
			schedules.clone(),
			Arc::new(fx.executor()),
			RetentionManager::new(fx.backups.clone()),
			notifier.clone(),
		);
		Harness {
			fx,
			schedules,
			notifications,
			notifier,
			manager,
		}
	}

	async fn wait_for_records(h: &Harness, count: i64) -> bool {
		for _ in 0..100 {
			if h.fx.record_count().await >= count {
				return true;
			}
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		}
		false
	}

	async fn wait_for_run(h: &Harness, id: ScheduleId) -> bool {
		for _ in 0..100 {
			let schedule = h.schedules.get_schedule(id).await.unwrap().unwrap();
			if schedule.last_run_time.is_some() {
				return true;
			}
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		}
		false
	}

	/// An overdue schedule that will not tick again during a test.
	async fn overdue(h: &Harness, retention_days: u32) -> BackupSchedule {
		let now = Utc::now();
		let schedule = BackupSchedule::new(
			"c1",
			"0 0 0 1 1 *",
			retention_days,
			Some(now - Duration::days(3)),
			now - Duration::days(30),
		);
		h.schedules.insert_schedule(&schedule).await.unwrap();
		schedule
	}

	fn plan_for(schedule: &BackupSchedule) -> FiringPlan {
		let cron = parse_cron(&schedule.cron_expression).unwrap();
		FiringPlan::new(schedule, cron, CancellationToken::new())
	}

	#[tokio::test]
	async fn schedule_persists_and_registers_timer() {
		let h = harness(RECORDING_TOOL).await;
		let before = Utc::now();

		let schedule = h.manager.schedule("c1", "0 0 2 * * *", 7).await.unwrap();

		assert!(schedule.enabled);
		assert!(schedule.next_run_time.unwrap() > before);
		let stored = h.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
		assert_eq!(stored.cron_expression, "0 0 2 * * *");
		assert_eq!(stored.retention_days, 7);
		assert_eq!(h.manager.registered().await, vec![schedule.id]);
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn rescheduling_updates_in_place() {
		let h = harness(RECORDING_TOOL).await;
		let first = h.manager.schedule("c1", "0 0 2 * * *", 7).await.unwrap();
		h.manager.disable("c1").await.unwrap();

		let second = h.manager.schedule("c1", "0 30 3 * * *", 14).await.unwrap();

		assert_eq!(first.id, second.id);
		let stored = h.schedules.get_schedule(first.id).await.unwrap().unwrap();
		assert!(stored.enabled);
		assert_eq!(stored.cron_expression, "0 30 3 * * *");
		assert_eq!(stored.retention_days, 14);
		assert_eq!(h.manager.registered().await, vec![first.id]);
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn malformed_cron_leaves_rows_untouched() {
		let h = harness(RECORDING_TOOL).await;

		let err = h.manager.schedule("c1", "0 2 * * *", 7).await.unwrap_err();
		assert!(matches!(err, BackupError::InvalidCronExpression { .. }));
		assert!(h.schedules.get_schedule_by_connection("c1").await.unwrap().is_none());

		let saved = h.manager.schedule("c1", "0 0 2 * * *", 7).await.unwrap();
		let err = h.manager.update("c1", "not a cron", 1).await.unwrap_err();
		assert!(matches!(err, BackupError::InvalidCronExpression { .. }));
		let stored = h.schedules.get_schedule(saved.id).await.unwrap().unwrap();
		assert_eq!(stored.cron_expression, "0 0 2 * * *");
		assert_eq!(stored.retention_days, 7);
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn unknown_connection_cannot_be_scheduled() {
		let h = harness(RECORDING_TOOL).await;
		let err = h.manager.schedule("ghost", "0 0 2 * * *", 7).await.unwrap_err();
		assert!(matches!(err, BackupError::ConnectionNotFound(_)));
		assert!(h.manager.registered().await.is_empty());
	}

	#[tokio::test]
	async fn update_and_disable_require_a_schedule() {
		let h = harness(RECORDING_TOOL).await;
		assert!(matches!(
			h.manager.update("c1", "0 0 2 * * *", 7).await,
			Err(BackupError::ScheduleNotFound(_))
		));
		assert!(matches!(
			h.manager.disable("c1").await,
			Err(BackupError::ScheduleNotFound(_))
		));
	}

	#[tokio::test]
	async fn update_keeps_a_disabled_schedule_disabled() {
		let h = harness(RECORDING_TOOL).await;
		h.manager.schedule("c1", "0 0 2 * * *", 7).await.unwrap();
		h.manager.disable("c1").await.unwrap();
		assert!(h.manager.registered().await.is_empty());

		let updated = h.manager.update("c1", "0 0 4 * * *", 3).await.unwrap();

		assert!(!updated.enabled);
		assert!(h.manager.registered().await.is_empty());
		let stored = h.schedules.get_schedule(updated.id).await.unwrap().unwrap();
		assert_eq!(stored.cron_expression, "0 0 4 * * *");
		assert!(!stored.enabled);
	}

	#[tokio::test]
	async fn timer_fires_until_disabled() {
		let h = harness(RECORDING_TOOL).await;
		let schedule = h.manager.schedule("c1", "* * * * * *", 0).await.unwrap();

		assert!(wait_for_records(&h, 1).await);
		assert!(wait_for_run(&h, schedule.id).await);

		h.manager.disable("c1").await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
		let settled = h.fx.record_count().await;
		tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
		assert_eq!(h.fx.record_count().await, settled);
		assert!(settled >= 1, "disabling must not delete history");

		let stored = h.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(!stored.enabled);
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn recovery_runs_one_catch_up_per_overdue_schedule() {
		let h = harness(RECORDING_TOOL).await;
		let schedule = overdue(&h, 0).await;

		h.manager.start().await.unwrap();

		assert!(wait_for_records(&h, 1).await);
		assert!(wait_for_run(&h, schedule.id).await);
		tokio::time::sleep(std::time::Duration::from_millis(300)).await;
		assert_eq!(h.fx.record_count().await, 1);

		let stored = h.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(stored.next_run_time.unwrap() > Utc::now());
		assert_eq!(h.manager.registered().await, vec![schedule.id]);

		let page = h
			.fx
			.backups
			.list_backups(&stowage_backup_core::ListBackupsQuery {
				user_id: "u1".into(),
				..Default::default()
			})
			.await
			.unwrap();
		let record = &page.items[0].record;
		assert_eq!(record.schedule_id, Some(schedule.id));
		assert_eq!(record.status, BackupStatus::Completed);
		assert!(record.scheduled_time.is_some());
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn failed_firing_alerts_and_still_advances() {
		let h = harness(FAILING_TOOL).await;
		let schedule = overdue(&h, 0).await;

		h.manager.start().await.unwrap();
		assert!(wait_for_run(&h, schedule.id).await);
		h.manager.shutdown().await;
		h.notifier.shutdown().await;

		let alerts = h.notifications.list_notifications("u1").await.unwrap();
		assert_eq!(alerts.len(), 1);
		assert!(alerts[0].message.contains("Connection refused"));
		assert_eq!(h.fx.backups.stats("u1").await.unwrap().success_rate, 0.0);
	}

	#[tokio::test]
	async fn retention_runs_after_firing() {
		let h = harness(RECORDING_TOOL).await;
		let ancient = h.fx.tmp.path().join("ancient.sql");
		std::fs::write(&ancient, b"old").unwrap();
		let long_ago = Utc::now() - Duration::days(60);
		let mut old = stowage_backup_core::BackupRecord::start(
			"c1",
			None,
			ancient.display().to_string(),
			None,
			long_ago,
		);
		old.mark_completed(3, long_ago);
		h.fx.backups.insert_backup(&old).await.unwrap();
		let schedule = overdue(&h, 7).await;

		h.manager.start().await.unwrap();
		assert!(wait_for_run(&h, schedule.id).await);
		h.manager.shutdown().await;

		assert!(h.fx.backups.get_backup(old.id).await.unwrap().is_none());
		assert!(!ancient.exists());
		assert_eq!(h.fx.record_count().await, 1);
	}

	#[tokio::test]
	async fn busy_connection_skips_firing_but_advances() {
		let h = harness(RECORDING_TOOL).await;
		let schedule = overdue(&h, 0).await;
		let plan = plan_for(&schedule);

		let held = InFlight::claim(&h.manager.engine.in_flight, "c1").unwrap();
		h.manager.engine.fire(&plan, Utc::now()).await;
		drop(held);

		assert_eq!(h.fx.record_count().await, 0);
		let stored = h.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(stored.last_run_time.is_some());
		assert!(stored.next_run_time.unwrap() > Utc::now());
		assert!(InFlight::claim(&h.manager.engine.in_flight, "c1").is_some());
	}

	#[tokio::test]
	async fn firing_uses_the_stored_cron_expression() {
		let h = harness(RECORDING_TOOL).await;
		let original = h.manager.schedule("c1", "0 0 2 * * *", 0).await.unwrap();
		let stale_plan = plan_for(&original);
		h.manager.update("c1", "0 30 5 * * *", 0).await.unwrap();

		h.manager.engine.fire(&stale_plan, Utc::now()).await;

		let stored = h.schedules.get_schedule(original.id).await.unwrap().unwrap();
		let next = stored.next_run_time.unwrap();
		assert_eq!((next.hour(), next.minute()), (5, 30));
		assert!(stored.last_run_time.is_some());
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn schedule_disabled_elsewhere_stops_firing() {
		let h = harness(RECORDING_TOOL).await;
		let schedule = h.manager.schedule("c1", "* * * * * *", 0).await.unwrap();
		assert!(wait_for_records(&h, 1).await);

		h.schedules
			.set_enabled(schedule.id, false, Utc::now())
			.await
			.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
		let settled = h.fx.record_count().await;
		tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

		assert_eq!(h.fx.record_count().await, settled);
		assert!(h.manager.registered().await.is_empty());
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn firing_a_disabled_schedule_runs_nothing() {
		let h = harness(RECORDING_TOOL).await;
		let schedule = overdue(&h, 0).await;
		h.schedules
			.set_enabled(schedule.id, false, Utc::now())
			.await
			.unwrap();
		let plan = plan_for(&schedule);

		h.manager.engine.fire(&plan, Utc::now()).await;

		assert_eq!(h.fx.record_count().await, 0);
		assert!(plan.stop.is_cancelled());
		let stored = h.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(stored.last_run_time.is_none());
	}

	#[tokio::test]
	async fn reconcile_follows_changes_made_elsewhere() {
		let h = harness(RECORDING_TOOL).await;
		h.fx.add_connection("c2", "postgresql", "db2.internal", false).await;
		let kept = h.manager.schedule("c1", "0 0 2 * * *", 0).await.unwrap();
		let far = Utc::now() + Duration::days(1);
		let added = BackupSchedule::new("c2", "0 0 3 * * *", 0, Some(far), Utc::now());
		h.schedules.insert_schedule(&added).await.unwrap();

		h.manager.reconcile().await.unwrap();
		let mut live = h.manager.registered().await;
		live.sort_by_key(|id| id.to_string());
		let mut expected = vec![kept.id, added.id];
		expected.sort_by_key(|id| id.to_string());
		assert_eq!(live, expected);

		h.schedules
			.set_enabled(kept.id, false, Utc::now())
			.await
			.unwrap();
		h.manager.reconcile().await.unwrap();
		assert_eq!(h.manager.registered().await, vec![added.id]);
		h.manager.shutdown().await;
	}

	#[tokio::test]
	async fn recovery_skips_unusable_cron_and_keeps_the_rest() {
		let h = harness(RECORDING_TOOL).await;
		h.fx.add_connection("c2", "postgresql", "db2.internal", false).await;
		let good = overdue(&h, 0).await;
		let now = Utc::now();
		let bad = BackupSchedule::new(
			"c2",
			"every night please",
			0,
			Some(now - Duration::days(3)),
			now - Duration::days(30),
		);
		h.schedules.insert_schedule(&bad).await.unwrap();

		h.manager.start().await.unwrap();

		assert!(wait_for_run(&h, good.id).await);
		tokio::time::sleep(std::time::Duration::from_millis(300)).await;
		assert_eq!(h.manager.registered().await, vec![good.id]);
		assert_eq!(h.fx.record_count().await, 1);
		let untouched = h.schedules.get_schedule(bad.id).await.unwrap().unwrap();
		assert!(untouched.last_run_time.is_none());
		h.manager.shutdown().await;
	}
}
