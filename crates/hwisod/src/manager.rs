//! Reconciliation manager.
//!
//! Converges the entry registry to match the authoritative guard
//! store. Store changes arrive as coalesced edge-triggered signals;
//! the manager debounces them and then re-derives the registry from a
//! full fresh read of the store, which makes every pass idempotent
//! against duplicate or missed signals.
//!
//! All state is owned by this object and mutated only from the event
//! loop in [`Manager::run`]; there is no locking anywhere.

use crate::eco::EcoCoreStore;
use crate::errorlog::ErrorLogIndex;
use crate::policy::SystemPolicy;
use crate::registry::{Associations, EntryRegistry};
use crate::reporter::{FaultReporter, ReportSeverity};
use crate::resolver::HardwareResolver;
use crate::store::GuardStore;
use crate::watcher::GuardFileWatcher;
use anyhow::Context;
use chrono::{DateTime, Utc};
use hwiso_common::{
    representative_index, EntityPath, GuardRecord, IsolationError, IsolationSeverity, RecordId,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Synchronous API calls posted onto the manager's event loop.
pub enum Command {
    Isolate {
        inventory_path: String,
        severity: IsolationSeverity,
        reply: oneshot::Sender<Result<String, IsolationError>>,
    },
    IsolateWithErrorLog {
        inventory_path: String,
        severity: IsolationSeverity,
        error_log_path: String,
        reply: oneshot::Sender<Result<String, IsolationError>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<(), IsolationError>>,
    },
    QueryIsolationInfo {
        inventory_path: String,
        reply: oneshot::Sender<Option<(IsolationSeverity, Option<String>)>>,
    },
}

/// Reconciliation pass counters, exposed for health reporting.
#[derive(Debug, Default, Clone)]
pub struct PassStats {
    pub passes: u64,
    pub last_pass: Option<DateTime<Utc>>,
}

pub struct Manager {
    store: Box<dyn GuardStore>,
    resolver: Box<dyn HardwareResolver>,
    registry: EntryRegistry,
    eco_cores: EcoCoreStore,
    policy: Box<dyn SystemPolicy>,
    error_logs: Box<dyn ErrorLogIndex>,
    reporter: Box<dyn FaultReporter>,
    watcher: Option<GuardFileWatcher>,
    debounce: Duration,
    stats: PassStats,
}

impl Manager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Box<dyn GuardStore>,
        resolver: Box<dyn HardwareResolver>,
        registry: EntryRegistry,
        eco_cores: EcoCoreStore,
        policy: Box<dyn SystemPolicy>,
        error_logs: Box<dyn ErrorLogIndex>,
        reporter: Box<dyn FaultReporter>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            registry,
            eco_cores,
            policy,
            error_logs,
            reporter,
            watcher: None,
            debounce,
            stats: PassStats::default(),
        }
    }

    /// Attach the change watcher so bulk clears can suspend it.
    pub fn set_watcher(&mut self, watcher: GuardFileWatcher) {
        self.watcher = Some(watcher);
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    pub fn eco_cores(&self) -> &EcoCoreStore {
        &self.eco_cores
    }

    /// Event loop. Drives the debounce state machine: a change signal
    /// arms the deadline only when none is armed, so rapid repeated
    /// signals coalesce into a single pass. Passes run to completion
    /// within one loop turn; a signal arriving mid-pass only arms the
    /// timer for the next one.
    /// Returns `self` once both input channels close, so shutdown
    /// paths can inspect final state.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut changes: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        let mut deadline: Option<Instant> = None;
        loop {
            let armed = deadline;
            tokio::select! {
                _ = async move {
                    match armed {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    deadline = None;
                    if let Err(e) = self.reconcile() {
                        error!("reconciliation pass failed: {e:#}");
                    }
                }
                change = changes.recv() => match change {
                    Some(()) => {
                        if deadline.is_none() {
                            debug!("guard store changed, arming debounce timer");
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        // A bulk clear rebuilds the registry itself;
                        // a pass racing it would read a torn store.
                        if matches!(command, Command::ClearAll { .. }) {
                            deadline = None;
                        }
                        self.handle_command(command);
                    }
                    None => break,
                },
            }
        }
        info!("manager event loop stopped");
        self
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Isolate {
                inventory_path,
                severity,
                reply,
            } => {
                let _ = reply.send(self.isolate(&inventory_path, severity));
            }
            Command::IsolateWithErrorLog {
                inventory_path,
                severity,
                error_log_path,
                reply,
            } => {
                let _ = reply.send(self.isolate_with_error_log(
                    &inventory_path,
                    severity,
                    &error_log_path,
                ));
            }
            Command::ClearAll { reply } => {
                let _ = reply.send(self.clear_all());
            }
            Command::QueryIsolationInfo {
                inventory_path,
                reply,
            } => {
                let _ = reply.send(self.query_isolation_info(&inventory_path));
            }
        }
    }

    /// Isolate hardware by inventory path, without an error log.
    pub fn isolate(
        &mut self,
        inventory_path: &str,
        severity: IsolationSeverity,
    ) -> Result<String, IsolationError> {
        self.isolate_inner(inventory_path, severity, 0, None)
    }

    /// Isolate hardware, associating the error log that caused it.
    pub fn isolate_with_error_log(
        &mut self,
        inventory_path: &str,
        severity: IsolationSeverity,
        error_log_path: &str,
    ) -> Result<String, IsolationError> {
        let error_log_id = self.error_logs.id_for(error_log_path).ok_or_else(|| {
            error!(error_log_path, "cannot resolve error log reference");
            IsolationError::InvalidArgument(format!("unknown error log {error_log_path}"))
        })?;
        self.isolate_inner(
            inventory_path,
            severity,
            error_log_id,
            Some(error_log_path.to_string()),
        )
    }

    fn isolate_inner(
        &mut self,
        inventory_path: &str,
        severity: IsolationSeverity,
        error_log_id: u32,
        error_log_path: Option<String>,
    ) -> Result<String, IsolationError> {
        self.check_isolation_allowed(severity)?;

        let entity_path = self.resolver.entity_path_for(inventory_path).ok_or_else(|| {
            error!(inventory_path, "cannot resolve hardware to isolate");
            IsolationError::InvalidArgument(format!("unknown hardware {inventory_path}"))
        })?;
        let hw = self.resolver.resolve(&entity_path, false).map_err(|e| {
            error!(inventory_path, "cannot resolve hardware to isolate: {e}");
            IsolationError::InvalidArgument(e.to_string())
        })?;

        let (record, created) = self
            .store
            .create(&entity_path, error_log_id, severity.guard_type())
            .map_err(|e| {
                error!(inventory_path, "guard record creation failed: {e:#}");
                IsolationError::InternalFailure(format!("guard record creation failed: {e}"))
            })?;

        let associations = Associations {
            isolated_hardware: inventory_path.to_string(),
            error_log: error_log_path,
        };

        // The store may have overwritten an existing record for this
        // hardware; if we already publish it, update in place.
        if let Some(object_path) = self.registry.update_entry(
            &entity_path,
            record.record_id,
            severity,
            associations.clone(),
        ) {
            return Ok(object_path);
        }

        match self.registry.create_entry(
            record.record_id,
            entity_path,
            severity,
            false,
            associations,
            hw.class,
        ) {
            Ok(entry) => {
                let object_path = entry.object_path.clone();
                self.update_eco_cores(hw.eco_core, entity_path);
                Ok(object_path)
            }
            Err(e) => {
                // Roll a freshly allocated record back so the store
                // does not demand an isolation we never exposed. A
                // pre-existing record belongs to firmware and stays.
                if created {
                    if let Err(clear_err) = self.store.clear(record.record_id) {
                        warn!(
                            record_id = record.record_id,
                            "failed to roll back guard record: {clear_err:#}"
                        );
                    }
                }
                match e {
                    IsolationError::DuplicateEntity(_) => Err(e),
                    other => Err(IsolationError::InternalFailure(other.to_string())),
                }
            }
        }
    }

    fn check_isolation_allowed(&self, severity: IsolationSeverity) -> Result<(), IsolationError> {
        if !self.policy.isolation_enabled() {
            info!("isolation request rejected: feature is disabled");
            return Err(IsolationError::Unavailable);
        }
        if severity == IsolationSeverity::Manual && !self.policy.chassis_powered_off() {
            error!("manual isolation is allowed only when the chassis is powered off");
            return Err(IsolationError::NotAllowed(
                "manual isolation requires chassis power off".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve every entry and drop the whole registry, clearing the
    /// store. The change source is suspended for the duration so the
    /// daemon does not reconcile against its own half-written clear.
    pub fn clear_all(&mut self) -> Result<(), IsolationError> {
        if !self.policy.deisolation_allowed() {
            error!("bulk de-isolation is allowed only while the host is down");
            return Err(IsolationError::NotAllowed(
                "de-isolation requires host power off".to_string(),
            ));
        }

        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.suspend() {
                self.reporter.report(
                    "watch-suspend",
                    ReportSeverity::Error,
                    &format!("cannot suspend guard file watch for clear-all: {e:#}"),
                );
                return Err(IsolationError::InternalFailure(
                    "failed to suspend guard file watch".to_string(),
                ));
            }
        }

        let result = self.clear_all_inner();

        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.resume() {
                self.reporter.report(
                    "watch-resume",
                    ReportSeverity::Error,
                    &format!("cannot re-enable guard file watch after clear-all: {e:#}"),
                );
                return Err(IsolationError::InternalFailure(
                    "failed to re-enable guard file watch".to_string(),
                ));
            }
        }

        result
    }

    fn clear_all_inner(&mut self) -> Result<(), IsolationError> {
        self.store.clear_all().map_err(|e| {
            error!("failed to clear guard store: {e:#}");
            IsolationError::InternalFailure(format!("failed to clear guard store: {e}"))
        })?;

        // The store is already empty; resolve without per-record
        // clears, then drop every entry.
        self.resolve_all_entries(false);
        for record_id in self.registry.record_ids() {
            self.erase_entry(record_id);
        }
        self.cleanup_eco_orphans();
        info!("cleared all isolation entries");
        Ok(())
    }

    /// Representative (severity, error log) for an inventory path, or
    /// `None` when the hardware is not isolated. With several
    /// simultaneous records (DIMM rows) the precedence resolver picks
    /// the pair to report.
    pub fn query_isolation_info(
        &self,
        inventory_path: &str,
    ) -> Option<(IsolationSeverity, Option<String>)> {
        let candidates: Vec<(IsolationSeverity, Option<String>)> = self
            .registry
            .lookup_by_inventory_path(inventory_path)
            .into_iter()
            .filter_map(|id| self.registry.get(id))
            .map(|e| (e.severity, e.associations.error_log.clone()))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        let idx = representative_index(&candidates);
        Some(candidates[idx].clone())
    }

    /// Startup restore: rebuild the registry from the full valid
    /// record set, feeding the previous run's eco-core classification
    /// into resolution, then drop orphaned per-entry snapshots and
    /// eco markers.
    pub fn restore(&mut self) -> anyhow::Result<()> {
        let records = self
            .store
            .get_all(true)
            .context("failed to read guard records for restore")?;

        for record in records.iter().filter(|r| !r.is_resolved()) {
            self.create_entry_for_record(record, true);
        }

        let live = self.registry.record_ids();
        self.registry.cleanup_snapshots(&live);
        self.cleanup_eco_orphans();

        info!(entries = self.registry.len(), "restored isolation entries");
        Ok(())
    }

    /// One reconciliation pass. Re-derives registry state from a
    /// fresh full read of the store; only the read itself can abort
    /// the pass (the next change signal retries from scratch).
    pub fn reconcile(&mut self) -> anyhow::Result<()> {
        let records = self
            .store
            .get_all(true)
            .context("failed to read guard records")?;

        self.stats.passes += 1;
        self.stats.last_pass = Some(Utc::now());

        let valid: Vec<GuardRecord> = records.iter().filter(|r| !r.is_resolved()).cloned().collect();

        // Empty-store fast path: the store holds nothing valid, so
        // every published entry is stale. No store clears are issued.
        if valid.is_empty() {
            if !self.registry.is_empty() {
                info!("guard store is empty, resolving all isolation entries");
                self.resolve_all_entries(false);
                for record_id in self.registry.record_ids() {
                    self.erase_entry(record_id);
                }
            }
            self.cleanup_eco_orphans();
            return Ok(());
        }

        // Pass over existing entries: resolve what disappeared,
        // update what persists.
        for record_id in self.registry.unresolved_ids() {
            let Some(entry) = self.registry.get(record_id) else {
                continue;
            };
            let entity_path = entry.entity_path;
            let multi_record = entry.class.multi_record();

            let valid_matches: Vec<&GuardRecord> = valid
                .iter()
                .filter(|r| r.entity_path == entity_path)
                .collect();

            if valid_matches.is_empty() {
                self.resolve_entry(record_id, false);
                continue;
            }

            if multi_record {
                // DIMM rows: each entry tracks exactly its own record.
                match valid_matches.iter().copied().find(|r| r.record_id == record_id) {
                    Some(record) => self.update_entry_for_record(record),
                    None => self.resolve_entry(record_id, false),
                }
                continue;
            }

            if valid_matches.len() > 1 {
                // Invariant violation for single-fault hardware. Do
                // not guess a winner; freeze and report.
                error!(
                    entity_path = %entity_path,
                    records = valid_matches.len(),
                    "multiple valid guard records for single-fault hardware, leaving entry untouched"
                );
                continue;
            }

            let record = valid_matches[0];
            if record.record_id == record_id {
                self.update_entry_for_record(record);
            } else {
                // The store reassigned the id; the old pairing is
                // gone and the successor record is handled below.
                self.resolve_entry(record_id, false);
            }
        }

        // New-record pass.
        let known: BTreeSet<RecordId> = self.registry.unresolved_ids().into_iter().collect();
        for record in &valid {
            if !known.contains(&record.record_id) {
                self.create_entry_for_record(record, false);
            }
        }

        self.cleanup_eco_orphans();
        Ok(())
    }

    /// Create a registry entry for one store record. Every failure is
    /// per-record: log with the offending entity path and skip, so a
    /// single bad mapping never aborts the whole pass.
    fn create_entry_for_record(&mut self, record: &GuardRecord, restore: bool) {
        let eco_hint = restore && self.eco_cores.contains(&record.entity_path);

        let hw = match self.resolver.resolve(&record.entity_path, eco_hint) {
            Ok(hw) => hw,
            Err(e) => {
                warn!(
                    entity_path = %record.entity_path,
                    "skipping isolated hardware, cannot resolve inventory path: {e}"
                );
                return;
            }
        };

        let Some(severity) = IsolationSeverity::from_guard_type(record.err_type) else {
            warn!(
                entity_path = %record.entity_path,
                err_type = ?record.err_type,
                "skipping isolated hardware, no severity for guard type"
            );
            return;
        };

        let associations = Associations {
            isolated_hardware: hw.inventory_path.clone(),
            error_log: self.error_logs.path_for(record.error_log_id),
        };

        match self.registry.create_entry(
            record.record_id,
            record.entity_path,
            severity,
            record.is_resolved(),
            associations,
            hw.class,
        ) {
            Ok(_) => {
                self.update_eco_cores(hw.eco_core || eco_hint, record.entity_path);
            }
            Err(e) => {
                warn!(
                    entity_path = %record.entity_path,
                    record_id = record.record_id,
                    "skipping isolated hardware, cannot create entry: {e}"
                );
            }
        }
    }

    /// Refresh one entry from its store record.
    fn update_entry_for_record(&mut self, record: &GuardRecord) {
        let eco_hint = self.eco_cores.contains(&record.entity_path);
        let hw = match self.resolver.resolve(&record.entity_path, eco_hint) {
            Ok(hw) => hw,
            Err(e) => {
                warn!(
                    entity_path = %record.entity_path,
                    "skipping entry update, cannot resolve inventory path: {e}"
                );
                return;
            }
        };
        let Some(severity) = IsolationSeverity::from_guard_type(record.err_type) else {
            warn!(
                entity_path = %record.entity_path,
                err_type = ?record.err_type,
                "skipping entry update, no severity for guard type"
            );
            return;
        };
        let associations = Associations {
            isolated_hardware: hw.inventory_path,
            error_log: self.error_logs.path_for(record.error_log_id),
        };
        if self
            .registry
            .update_entry(&record.entity_path, record.record_id, severity, associations)
            .is_none()
        {
            warn!(
                entity_path = %record.entity_path,
                record_id = record.record_id,
                "no matching entry to update"
            );
        }
    }

    fn resolve_entry(&mut self, record_id: RecordId, clear_record: bool) {
        if self.registry.resolve_entry(record_id) && clear_record {
            if let Err(e) = self.store.clear(record_id) {
                warn!(record_id, "failed to clear guard record: {e:#}");
            }
        }
    }

    fn resolve_all_entries(&mut self, clear_records: bool) {
        for record_id in self.registry.unresolved_ids() {
            self.resolve_entry(record_id, clear_records);
        }
    }

    /// Hard delete; drops the eco-core marker with the entry.
    fn erase_entry(&mut self, record_id: RecordId) {
        if let Some(entry) = self.registry.erase_entry(record_id) {
            self.eco_cores.mark(entry.entity_path, false);
        }
    }

    fn update_eco_cores(&mut self, is_eco: bool, entity_path: EntityPath) {
        self.eco_cores.mark(entity_path, is_eco);
    }

    fn cleanup_eco_orphans(&mut self) {
        let live = self.registry.entity_paths();
        self.eco_cores.cleanup_orphans(&live);
    }
}
