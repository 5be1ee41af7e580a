use std::collections::BTreeMap;

use log::{error, info, warn};

use crate::catalog::{TypeCatalog, TypeCategory, TypeId};
use crate::cell::CellKey;
use crate::commands::{Command, EditTarget};
use crate::diff::{BaseState, Diff};
use crate::error::{EditError, Result};
use crate::history::{HistoryManager, HistoryOutcome};
use crate::instance::{InstanceBatchView, InstancePool, InstanceRecord};
use crate::pattern::PlacementPattern;
use crate::persistence::{self, keys, namespaces, PersistenceGateway};
use crate::settings::SessionSettings;
use crate::voxel::{Descriptor, VoxelStore};

/// One editing session: the live stores, their history and the durable
/// store behind them.
///
/// All mutation is synchronous inside a gesture; durable writes happen at
/// gesture end and on undo/redo.
#[derive(Debug)]
pub struct EditSession<G: PersistenceGateway> {
    catalog: TypeCatalog,
    settings: SessionSettings,
    voxels: VoxelStore,
    instances: InstancePool,
    history: HistoryManager,
    gateway: G,
}

impl<G: PersistenceGateway> EditSession<G> {
    /// Start an empty session without reading the store.
    pub fn new(gateway: G, catalog: TypeCatalog, settings: SessionSettings) -> Result<Self> {
        settings.history.validate()?;
        Ok(Self {
            catalog,
            voxels: VoxelStore::new(),
            instances: InstancePool::new(),
            history: HistoryManager::new(settings.history),
            settings,
            gateway,
        })
    }

    /// Populate a session from the store.
    pub async fn load(gateway: G, catalog: TypeCatalog, settings: SessionSettings) -> Result<Self> {
        settings.history.validate()?;
        let (cells, records) = futures::try_join!(
            persistence::load::<BTreeMap<CellKey, Descriptor>, G>(
                &gateway,
                namespaces::TERRAIN_CURRENT,
                keys::CURRENT
            ),
            persistence::load::<Vec<InstanceRecord>, G>(
                &gateway,
                namespaces::ENVIRONMENT_CURRENT,
                keys::CURRENT
            ),
        )?;
        let voxels = VoxelStore::from_cells(cells.unwrap_or_default());
        let instances = InstancePool::from_records(records.unwrap_or_default());
        let mut history = HistoryManager::restore(settings.history, &gateway).await?;

        if !history.has_stored_base() {
            // Unwind the retained log so base + log reproduces the current state.
            let mut base = BaseState::capture(&voxels, &instances);
            for diff in history.undo_entries() {
                base.apply(&diff.inverse());
            }
            if let Err(e) = history.adopt_base(base, &gateway).await {
                warn!("Base state not stored yet, will retry on consolidation: {}", e);
            }
        }

        info!(
            "Session loaded: {} cells, {} instances, {} undo entries",
            voxels.len(),
            instances.total_live(),
            history.undo_len()
        );
        Ok(Self {
            catalog,
            settings,
            voxels,
            instances,
            history,
            gateway,
        })
    }

    // ── Gestures ─────────────────────────────────────────────────────

    pub fn begin_gesture(&mut self) {
        self.history.begin_edit();
    }

    pub fn is_recording(&self) -> bool {
        self.history.is_recording()
    }

    /// Apply a command inside the open gesture and return what it changed.
    pub fn apply(&mut self, command: &dyn Command) -> Result<Diff> {
        if !self.history.is_recording() {
            return Err(EditError::NoOpenEdit);
        }
        let mut target = EditTarget {
            catalog: &self.catalog,
            voxels: &mut self.voxels,
            instances: &mut self.instances,
        };
        let fragment = command.execute(&mut target)?;
        self.history.record(&fragment)?;
        Ok(fragment)
    }

    /// Commit the open gesture and write the live state through.
    pub async fn end_gesture(&mut self) -> Result<Option<Diff>> {
        let committed = self
            .history
            .end_edit(&self.voxels, &self.instances, &self.gateway)
            .await;
        if matches!(committed, Ok(None) | Err(EditError::NoOpenEdit)) {
            return committed;
        }
        // The diff is in memory even if the log write failed.
        let written = self.persist_current().await;
        let diff = committed?;
        written?;
        Ok(diff)
    }

    /// Finalise a gesture cut short (pointer left the surface, focus
    /// lost). Changes made so far are committed; an empty gesture is
    /// dropped silently.
    pub async fn abandon_gesture(&mut self) -> Result<Option<Diff>> {
        if !self.history.is_recording() {
            return Ok(None);
        }
        self.end_gesture().await
    }

    /// Run a single command as its own gesture. Fails if a gesture is
    /// already open.
    pub async fn execute(&mut self, command: &dyn Command) -> Result<Option<Diff>> {
        if self.history.is_recording() {
            return Err(EditError::EditInProgress);
        }
        self.begin_gesture();
        if let Err(e) = self.apply(command) {
            // Commands validate before mutating, so this closes an empty gesture.
            self.end_gesture().await?;
            return Err(e);
        }
        self.end_gesture().await
    }

    // ── Undo / Redo ──────────────────────────────────────────────────

    pub async fn undo(&mut self) -> Result<HistoryOutcome> {
        let outcome = self
            .history
            .undo(&mut self.voxels, &mut self.instances, &self.gateway)
            .await;
        self.write_through(outcome).await
    }

    pub async fn redo(&mut self) -> Result<HistoryOutcome> {
        let outcome = self
            .history
            .redo(&mut self.voxels, &mut self.instances, &self.gateway)
            .await;
        self.write_through(outcome).await
    }

    async fn write_through(&self, outcome: Result<HistoryOutcome>) -> Result<HistoryOutcome> {
        if matches!(outcome, Ok(HistoryOutcome::NoOp) | Err(EditError::EditInProgress)) {
            return outcome;
        }
        let written = self.persist_current().await;
        let outcome = outcome?;
        written?;
        Ok(outcome)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Write the live terrain and environment state.
    pub async fn persist_current(&self) -> Result<()> {
        let records = self.instances.records();
        futures::try_join!(
            persistence::store(
                &self.gateway,
                namespaces::TERRAIN_CURRENT,
                keys::CURRENT,
                self.voxels.snapshot()
            ),
            persistence::store(
                &self.gateway,
                namespaces::ENVIRONMENT_CURRENT,
                keys::CURRENT,
                &records
            ),
        )
        .map_err(|e| {
            error!("Live state write failed, will retry on next save: {}", e);
            EditError::from(e)
        })?;
        Ok(())
    }

    /// Retry every durable write: live state and both history logs.
    pub async fn save(&self) -> Result<()> {
        self.persist_current().await?;
        self.history.persist_stacks(&self.gateway).await
    }

    /// Empty the world: live stores, history and every engine namespace.
    pub async fn reset(&mut self) -> Result<()> {
        self.voxels.clear();
        self.instances.clear();
        self.history.clear();
        futures::try_join!(
            self.gateway.clear(namespaces::TERRAIN_CURRENT),
            self.gateway.clear(namespaces::ENVIRONMENT_CURRENT),
            self.gateway.clear(namespaces::UNDO_LOG),
            self.gateway.clear(namespaces::REDO_LOG),
        )
        .map_err(|e| {
            error!("Reset could not clear the store: {}", e);
            EditError::from(e)
        })?;
        info!("Session reset");
        Ok(())
    }

    // ── Types ────────────────────────────────────────────────────────

    pub fn register_custom_type(&mut self, category: TypeCategory, name: &str) -> Result<TypeId> {
        let id = self.catalog.register_custom(category, name)?.id;
        info!("Registered custom {} type '{}' as {}", category, name, id);
        Ok(id)
    }

    // ── Render / UI queries ──────────────────────────────────────────

    /// Every occupied cell in canonical order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &Descriptor)> {
        self.voxels.cells()
    }

    /// Dense live instance arrays, one per type.
    pub fn instance_batches(&self) -> impl Iterator<Item = InstanceBatchView<'_>> {
        self.instances.batches()
    }

    /// Cells a placement at `position` would cover, for the preview overlay.
    pub fn footprint(&self, position: [f64; 3], pattern: Option<PlacementPattern>) -> Result<Vec<CellKey>> {
        let pattern = pattern.unwrap_or(self.settings.default_pattern);
        pattern.footprint(CellKey::try_from_world(position)?)
    }

    pub fn voxels(&self) -> &VoxelStore {
        &self.voxels
    }

    pub fn instances(&self) -> &InstancePool {
        &self.instances
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{EditLayer, PlacementCommand, RemovalCommand};
    use crate::error::ErrorKind;
    use crate::persistence::MemoryGateway;
    use crate::settings::HistoryConfig;
    use futures::executor::block_on;

    const GRASS: TypeId = 5;
    const TREE: TypeId = 10_001;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn catalog() -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        catalog.register_builtin(TypeCategory::Block, GRASS, "grass").unwrap();
        catalog
            .register_builtin(TypeCategory::Environment, TREE, "tree")
            .unwrap();
        catalog
    }

    fn session() -> EditSession<MemoryGateway> {
        init_logging();
        EditSession::new(MemoryGateway::new(), catalog(), SessionSettings::default()).unwrap()
    }

    fn cross_at_origin() -> PlacementCommand {
        PlacementCommand::new(GRASS, [0.0, 0.0, 0.0]).with_pattern(PlacementPattern::Cross)
    }

    #[test]
    fn test_place_undo_redo() {
        let mut s = session();
        block_on(s.execute(&cross_at_origin())).unwrap().unwrap();
        let expected = [
            CellKey::new(0, 0, 0),
            CellKey::new(1, 0, 0),
            CellKey::new(-1, 0, 0),
            CellKey::new(0, 0, 1),
            CellKey::new(0, 0, -1),
        ];
        assert_eq!(s.voxels().len(), 5);
        assert!(expected.iter().all(|c| s.voxels().get(c).is_some()));
        assert!(s.can_undo());

        assert!(!block_on(s.undo()).unwrap().is_noop());
        assert!(s.voxels().is_empty());

        assert!(!block_on(s.redo()).unwrap().is_noop());
        let cells: Vec<CellKey> = s.cells().map(|(k, _)| *k).collect();
        let mut sorted = expected.to_vec();
        sorted.sort();
        assert_eq!(cells, sorted);
    }

    #[test]
    fn test_drag_gesture_is_one_entry() {
        let mut s = session();
        s.begin_gesture();
        for x in 0..20 {
            s.apply(&PlacementCommand::new(GRASS, [x as f64, 0.0, 0.0])).unwrap();
        }
        assert_eq!(s.history().undo_len(), 0);
        let diff = block_on(s.end_gesture()).unwrap().unwrap();
        assert_eq!(diff.cells_added.len(), 20);
        assert_eq!(s.history().undo_len(), 1);

        block_on(s.undo()).unwrap();
        assert!(s.voxels().is_empty());
    }

    #[test]
    fn test_write_through_after_gesture() {
        let mut s = session();
        block_on(s.execute(&cross_at_origin())).unwrap();
        block_on(s.execute(&PlacementCommand::new(TREE, [4.0, 0.0, 4.0]))).unwrap();
        let stored: BTreeMap<CellKey, Descriptor> = block_on(persistence::load(
            s.gateway(),
            namespaces::TERRAIN_CURRENT,
            keys::CURRENT,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(&stored, s.voxels().snapshot());
        let records: Vec<InstanceRecord> = block_on(persistence::load(
            s.gateway(),
            namespaces::ENVIRONMENT_CURRENT,
            keys::CURRENT,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(records, s.instances().records());
    }

    #[test]
    fn test_abandoned_gestures() {
        let mut s = session();
        s.begin_gesture();
        assert_eq!(block_on(s.abandon_gesture()).unwrap(), None);
        assert!(!s.is_recording());

        s.begin_gesture();
        s.apply(&cross_at_origin()).unwrap();
        let diff = block_on(s.abandon_gesture()).unwrap();
        assert!(diff.is_some());
        assert!(!s.is_recording());
        assert!(s.can_undo());

        // Nothing open: abandoning again is harmless.
        assert_eq!(block_on(s.abandon_gesture()).unwrap(), None);
    }

    #[test]
    fn test_failed_command_leaves_no_gesture_open() {
        let mut s = session();
        let err = block_on(s.execute(&PlacementCommand::new(999, [0.0; 3]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!s.is_recording());
        assert!(!s.can_undo());
        let err = block_on(s.execute(&PlacementCommand::new(GRASS, [f64::NAN, 0.0, 0.0]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!s.is_recording());
    }

    #[test]
    fn test_execute_inside_open_gesture() {
        let mut s = session();
        s.begin_gesture();
        s.apply(&PlacementCommand::new(GRASS, [3.0, 0.0, 0.0])).unwrap();
        let err = block_on(s.execute(&cross_at_origin())).unwrap_err();
        assert!(matches!(err, EditError::EditInProgress));
        // The outer gesture is still open and nothing was committed.
        assert!(s.is_recording());
        assert!(!s.can_undo());
        assert_eq!(s.voxels().len(), 1);

        let diff = block_on(s.end_gesture()).unwrap().unwrap();
        assert_eq!(diff.cells_added.len(), 1);
        assert_eq!(s.history().undo_len(), 1);
    }

    #[test]
    fn test_apply_requires_gesture() {
        let mut s = session();
        assert!(matches!(
            s.apply(&cross_at_origin()),
            Err(EditError::NoOpenEdit)
        ));
    }

    #[test]
    fn test_environment_history() {
        let mut s = session();
        let place = PlacementCommand::new(TREE, [0.0; 3]).with_pattern(PlacementPattern::Square9);
        block_on(s.execute(&place)).unwrap();
        let remove = RemovalCommand::new([0.0; 3], EditLayer::Environment);
        block_on(s.execute(&remove)).unwrap();
        assert_eq!(s.instances().live_count(TREE), 8);

        block_on(s.undo()).unwrap();
        assert_eq!(s.instances().live_count(TREE), 9);
        block_on(s.undo()).unwrap();
        assert!(s.instances().is_empty());
        block_on(s.redo()).unwrap();
        block_on(s.redo()).unwrap();
        assert_eq!(s.instances().live_count(TREE), 8);
        assert!(s.instances().instances_in_cell(CellKey::new(0, 0, 0)).is_empty());
    }

    #[test]
    fn test_reload_restores_everything() {
        let mut s = session();
        block_on(s.execute(&cross_at_origin())).unwrap();
        block_on(s.execute(&PlacementCommand::new(TREE, [3.0, 0.0, 3.0]))).unwrap();
        block_on(s.undo()).unwrap();
        let gateway = s.gateway;

        let mut reloaded =
            block_on(EditSession::load(gateway, catalog(), SessionSettings::default())).unwrap();
        assert_eq!(reloaded.voxels().len(), 5);
        assert!(reloaded.instances().is_empty());
        assert!(reloaded.can_undo());
        assert!(reloaded.can_redo());

        block_on(reloaded.redo()).unwrap();
        assert_eq!(reloaded.instances().live_count(TREE), 1);
    }

    #[test]
    fn test_load_derives_base_from_existing_state() {
        init_logging();
        let gateway = MemoryGateway::new();
        let mut cells = BTreeMap::new();
        cells.insert(CellKey::new(7, 0, 7), Descriptor::new(GRASS));
        block_on(persistence::store(
            &gateway,
            namespaces::TERRAIN_CURRENT,
            keys::CURRENT,
            &cells,
        ))
        .unwrap();

        let settings = SessionSettings {
            history: HistoryConfig::new(4, 2).unwrap(),
            ..Default::default()
        };
        let mut s = block_on(EditSession::load(gateway, catalog(), settings)).unwrap();
        assert!(s.history().has_stored_base());
        assert_eq!(s.history().base().cells, cells);

        for x in 0..5 {
            block_on(s.execute(&PlacementCommand::new(GRASS, [x as f64, 0.0, 0.0]))).unwrap();
        }
        assert_eq!(s.history().undo_len(), 2);
        let base = block_on(crate::history::load_base(s.gateway())).unwrap().unwrap();
        // Pre-existing terrain plus the three folded placements.
        assert_eq!(base.cells.len(), 4);
        assert!(base.cells.contains_key(&CellKey::new(7, 0, 7)));
    }

    #[test]
    fn test_persistence_failure_keeps_memory() {
        let mut s = session();
        s.gateway().set_fail_writes(true);
        let err = block_on(s.execute(&cross_at_origin())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(s.voxels().len(), 5);
        assert!(s.can_undo());

        s.gateway().set_fail_writes(false);
        block_on(s.save()).unwrap();
        let reloaded = block_on(EditSession::load(
            s.gateway,
            catalog(),
            SessionSettings::default(),
        ))
        .unwrap();
        assert_eq!(reloaded.voxels().len(), 5);
        assert_eq!(reloaded.history().undo_len(), 1);
    }

    #[test]
    fn test_reset_clears_store() {
        let mut s = session();
        block_on(s.execute(&cross_at_origin())).unwrap();
        block_on(s.reset()).unwrap();
        assert!(s.voxels().is_empty());
        assert!(!s.can_undo());
        assert!(s.gateway().keys(namespaces::TERRAIN_CURRENT).is_empty());
        assert!(s.gateway().keys(namespaces::UNDO_LOG).is_empty());

        let reloaded = block_on(EditSession::load(
            s.gateway,
            catalog(),
            SessionSettings::default(),
        ))
        .unwrap();
        assert!(reloaded.voxels().is_empty());
        assert!(!reloaded.can_undo());
    }

    #[test]
    fn test_footprint_preview() {
        let s = session();
        let cells = s.footprint([2.5, 1.0, 2.5], Some(PlacementPattern::Diamond)).unwrap();
        assert_eq!(cells.len(), 13);
        assert_eq!(cells[0], CellKey::new(2, 1, 2));
        assert_eq!(s.footprint([0.0; 3], None).unwrap().len(), 1);
    }

    #[test]
    fn test_custom_types() {
        let mut s = session();
        let marble = s.register_custom_type(TypeCategory::Block, "marble").unwrap();
        let bench = s
            .register_custom_type(TypeCategory::Environment, "bench")
            .unwrap();
        assert_eq!(marble, 1_000);
        assert_eq!(bench, 11_000);
        block_on(s.execute(&PlacementCommand::new(marble, [0.0; 3]))).unwrap();
        block_on(s.execute(&PlacementCommand::new(bench, [0.0; 3]))).unwrap();
        assert_eq!(s.voxels().len(), 1);
        assert_eq!(s.instances().live_count(bench), 1);
    }
}
