use std::collections::{BTreeMap, VecDeque};

use log::{debug, error, info, warn};

use crate::cell::CellKey;
use crate::diff::{BaseState, Diff, EditJournal};
use crate::error::{EditError, Result};
use crate::instance::{InstancePool, InstanceRecord};
use crate::persistence::{self, keys, namespaces, PersistenceError, PersistenceGateway};
use crate::settings::HistoryConfig;
use crate::voxel::{Descriptor, VoxelStore};

/// Result of an undo or redo request.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOutcome {
    /// The diff that was applied to the live stores.
    Applied(Diff),
    /// Nothing to undo or redo; the stores are untouched.
    NoOp,
}

impl HistoryOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, HistoryOutcome::NoOp)
    }
}

/// Bounded undo/redo history built from gesture diffs.
///
/// Both stacks are most-recent-first. A gesture is recorded between
/// `begin_edit` and `end_edit`; only one may be open at a time.
#[derive(Debug, Default)]
pub struct HistoryManager {
    config: HistoryConfig,
    undo_stack: VecDeque<Diff>,
    redo_stack: VecDeque<Diff>,
    journal: Option<EditJournal>,
    /// In-memory copy of the persisted base state.
    base: BaseState,
    base_stored: bool,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Read both history logs back from the store.
    pub async fn restore<G>(config: HistoryConfig, gateway: &G) -> Result<Self>
    where
        G: PersistenceGateway + ?Sized,
    {
        let (undo, redo) = futures::try_join!(
            persistence::load::<VecDeque<Diff>, G>(gateway, namespaces::UNDO_LOG, keys::STACK),
            persistence::load::<VecDeque<Diff>, G>(gateway, namespaces::REDO_LOG, keys::STACK),
        )?;
        let base = load_base(gateway).await?;
        let history = Self {
            config,
            undo_stack: undo.unwrap_or_default(),
            redo_stack: redo.unwrap_or_default(),
            journal: None,
            base_stored: base.is_some(),
            base: base.unwrap_or_default(),
        };
        info!(
            "Restored history: {} undo, {} redo",
            history.undo_stack.len(),
            history.redo_stack.len()
        );
        Ok(history)
    }

    // ── Gesture recording ────────────────────────────────────────────

    pub fn is_recording(&self) -> bool {
        self.journal.is_some()
    }

    /// Open a gesture. Opening a second one while recording is a caller
    /// bug: it panics in debug builds and is ignored in release builds.
    pub fn begin_edit(&mut self) {
        if self.journal.is_some() {
            if cfg!(debug_assertions) {
                panic!("begin_edit called while an edit is already being recorded");
            }
            warn!("begin_edit ignored: an edit is already being recorded");
            return;
        }
        self.journal = Some(EditJournal::new());
    }

    /// Feed a diff fragment produced by a store mutation into the open
    /// gesture.
    pub fn record(&mut self, fragment: &Diff) -> Result<()> {
        let journal = self.journal.as_mut().ok_or(EditError::NoOpenEdit)?;
        journal.record(fragment);
        Ok(())
    }

    /// Close the gesture and commit its net diff. Returns `None` when the
    /// gesture changed nothing, in which case no history entry is pushed.
    pub async fn end_edit<G>(
        &mut self,
        voxels: &VoxelStore,
        instances: &InstancePool,
        gateway: &G,
    ) -> Result<Option<Diff>>
    where
        G: PersistenceGateway + ?Sized,
    {
        let journal = self.journal.take().ok_or(EditError::NoOpenEdit)?;
        let diff = journal.resolve(voxels, instances);
        if diff.is_empty() {
            debug!("Gesture ended with no changes");
            return Ok(None);
        }
        debug!("Gesture committed {} changes", diff.len());
        self.push_undo(diff.clone(), gateway).await?;
        Ok(Some(diff))
    }

    /// Push a diff onto the undo stack, clearing redo, and consolidate if
    /// the stack grew past the threshold.
    pub async fn push_undo<G>(&mut self, diff: Diff, gateway: &G) -> Result<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        self.undo_stack.push_front(diff);
        self.redo_stack.clear();
        if self.undo_stack.len() > self.config.undo_threshold {
            return self.consolidate(gateway).await;
        }
        self.persist_stacks(gateway).await
    }

    /// Fold every diff beyond the newest `min_undo_states` into the
    /// persisted base state, oldest first.
    ///
    /// The folded diffs are only dropped from memory once the base state
    /// has been written, so a failed write is retried by the next push.
    pub async fn consolidate<G>(&mut self, gateway: &G) -> Result<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        let keep = self.config.min_undo_states;
        if self.undo_stack.len() <= keep {
            return Ok(());
        }
        let folded = self.undo_stack.len() - keep;

        let mut base = self.base.clone();
        for diff in self.undo_stack.iter().skip(keep).rev() {
            base.apply(diff);
        }
        store_base(gateway, &base)
            .await
            .map_err(|e| persistence_failure("consolidation", e))?;

        self.base = base;
        self.base_stored = true;
        self.undo_stack.truncate(keep);
        self.redo_stack.clear();
        info!("Folded {} diffs into the base state, {} retained", folded, keep);
        self.persist_stacks(gateway).await
    }

    /// Install a base state for a history that has never stored one,
    /// e.g. when a session starts from terrain written before any history
    /// existed. The in-memory copy is kept even if the write fails.
    pub async fn adopt_base<G>(&mut self, base: BaseState, gateway: &G) -> Result<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        self.base = base;
        store_base(gateway, &self.base)
            .await
            .map_err(|e| persistence_failure("base state write", e))?;
        self.base_stored = true;
        Ok(())
    }

    pub fn base(&self) -> &BaseState {
        &self.base
    }

    pub fn has_stored_base(&self) -> bool {
        self.base_stored
    }

    // ── Undo / Redo ──────────────────────────────────────────────────

    pub async fn undo<G>(
        &mut self,
        voxels: &mut VoxelStore,
        instances: &mut InstancePool,
        gateway: &G,
    ) -> Result<HistoryOutcome>
    where
        G: PersistenceGateway + ?Sized,
    {
        if self.is_recording() {
            return Err(EditError::EditInProgress);
        }
        let Some(diff) = self.undo_stack.pop_front() else {
            return Ok(HistoryOutcome::NoOp);
        };
        let inverse = diff.inverse();
        inverse.apply_to(voxels, instances);
        self.redo_stack.push_front(inverse.clone());
        debug!("Undid {} changes", inverse.len());
        self.persist_stacks(gateway).await?;
        Ok(HistoryOutcome::Applied(inverse))
    }

    pub async fn redo<G>(
        &mut self,
        voxels: &mut VoxelStore,
        instances: &mut InstancePool,
        gateway: &G,
    ) -> Result<HistoryOutcome>
    where
        G: PersistenceGateway + ?Sized,
    {
        if self.is_recording() {
            return Err(EditError::EditInProgress);
        }
        let Some(inverse) = self.redo_stack.pop_front() else {
            return Ok(HistoryOutcome::NoOp);
        };
        let forward = inverse.inverse();
        forward.apply_to(voxels, instances);
        self.undo_stack.push_front(forward.clone());
        debug!("Redid {} changes", forward.len());
        self.persist_stacks(gateway).await?;
        Ok(HistoryOutcome::Applied(forward))
    }

    /// Write both logs. Safe to call again after a failure.
    pub async fn persist_stacks<G>(&self, gateway: &G) -> Result<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        futures::try_join!(
            persistence::store(gateway, namespaces::UNDO_LOG, keys::STACK, &self.undo_stack),
            persistence::store(gateway, namespaces::REDO_LOG, keys::STACK, &self.redo_stack),
        )
        .map_err(|e| persistence_failure("history log write", e))?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Undo entries, most recent first.
    pub fn undo_entries(&self) -> impl Iterator<Item = &Diff> {
        self.undo_stack.iter()
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Forget both stacks and the base state. An open gesture is dropped.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.journal = None;
        self.base = BaseState::default();
        self.base_stored = false;
    }
}

fn persistence_failure(operation: &str, err: PersistenceError) -> EditError {
    error!("{} failed, in-memory state kept: {}", operation, err);
    err.into()
}

/// Read the consolidation base state, if one was ever written.
pub async fn load_base<G>(gateway: &G) -> std::result::Result<Option<BaseState>, PersistenceError>
where
    G: PersistenceGateway + ?Sized,
{
    let (cells, instances) = futures::try_join!(
        persistence::load::<BTreeMap<CellKey, Descriptor>, G>(
            gateway,
            namespaces::TERRAIN_CURRENT,
            keys::BASE
        ),
        persistence::load::<Vec<InstanceRecord>, G>(
            gateway,
            namespaces::ENVIRONMENT_CURRENT,
            keys::BASE
        ),
    )?;
    if cells.is_none() && instances.is_none() {
        return Ok(None);
    }
    Ok(Some(BaseState {
        cells: cells.unwrap_or_default(),
        instances: instances
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.id, r))
            .collect(),
    }))
}

pub async fn store_base<G>(gateway: &G, base: &BaseState) -> std::result::Result<(), PersistenceError>
where
    G: PersistenceGateway + ?Sized,
{
    let instances: Vec<&InstanceRecord> = base.instances.values().collect();
    futures::try_join!(
        persistence::store(gateway, namespaces::TERRAIN_CURRENT, keys::BASE, &base.cells),
        persistence::store(gateway, namespaces::ENVIRONMENT_CURRENT, keys::BASE, &instances),
    )?;
    Ok(())
}
