//! Per-faction unlock state.
//!
//! The state is a projection: `recompute` rebuilds it from the forest's
//! initial values, the faction's research buckets and its standing
//! structures. Nothing ever downgrades a key incrementally.

use crate::dependency::DependencyGraph;
use log::debug;
use shared::{ConstructionType, FactionId, ResearchStatus, UnlockKey, UnlockStatus};
use std::collections::{BTreeMap, HashMap};

pub type UnlockMap = BTreeMap<UnlockKey, UnlockStatus>;

fn initial_map(graph: &DependencyGraph) -> UnlockMap {
    graph.iter().map(|node| (node.key, node.initial)).collect()
}

pub struct FactionUnlocks {
    graph: DependencyGraph,
    factions: HashMap<FactionId, UnlockMap>,
}

impl FactionUnlocks {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            graph,
            factions: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn faction_mut(&mut self, faction: FactionId) -> &mut UnlockMap {
        let graph = &self.graph;
        self.factions
            .entry(faction)
            .or_insert_with(|| initial_map(graph))
    }

    /// Status of the key gating `kind`; `None` for types outside the forest.
    pub fn status(&self, faction: FactionId, kind: ConstructionType) -> Option<UnlockStatus> {
        let node = self.graph.node(kind)?;
        Some(
            self.factions
                .get(&faction)
                .and_then(|map| map.get(&node.key).copied())
                .unwrap_or(node.initial),
        )
    }

    /// Propagates a research state to every child of `research_type`.
    ///
    /// Children already `Built` keep that status. A type without a node or
    /// without children is a no-op.
    pub fn unlock(
        &mut self,
        faction: FactionId,
        research_type: ConstructionType,
        research: ResearchStatus,
    ) {
        let children: Vec<UnlockKey> = self
            .graph
            .children(research_type)
            .iter()
            .filter_map(|kid| self.graph.node(*kid).map(|node| node.key))
            .collect();

        if children.is_empty() {
            debug!(
                "Research {} has no dependants for faction {}",
                research_type, faction
            );
            return;
        }

        let next = match research {
            ResearchStatus::Pending => UnlockStatus::ResearchPending,
            ResearchStatus::Complete => UnlockStatus::Unlockable,
            ResearchStatus::Idle => UnlockStatus::Locked,
        };

        let map = self.faction_mut(faction);
        for key in children {
            let entry = map.entry(key).or_insert(next);
            if *entry != UnlockStatus::Built {
                *entry = next;
            }
        }
    }

    /// Flags the key for `kind` as built. Houses stay buildable forever.
    pub fn mark_built(&mut self, faction: FactionId, kind: ConstructionType) {
        if kind.is_house() {
            return;
        }
        let Some(key) = self.graph.node(kind).map(|node| node.key) else {
            return;
        };
        self.faction_mut(faction).insert(key, UnlockStatus::Built);
    }

    /// Rebuilds a faction's map from ground truth.
    ///
    /// `research` is replayed first, then `standing` (structure types in
    /// traversal order).
    pub fn recompute<R, S>(&mut self, faction: FactionId, research: R, standing: S)
    where
        R: IntoIterator<Item = (ConstructionType, ResearchStatus)>,
        S: IntoIterator<Item = ConstructionType>,
    {
        self.factions.insert(faction, initial_map(&self.graph));

        for (research_type, state) in research {
            self.unlock(faction, research_type, state);
        }
        for kind in standing {
            self.mark_built(faction, kind);
        }
        debug!("Recomputed unlocks for faction {}", faction);
    }

    pub fn snapshot(&self, faction: FactionId) -> UnlockMap {
        self.factions
            .get(&faction)
            .cloned()
            .unwrap_or_else(|| initial_map(&self.graph))
    }

    pub fn forget(&mut self, faction: FactionId) {
        self.factions.remove(&faction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAZOOKA_RESEARCH: ConstructionType = ConstructionType(401);
    const BAZOOKA_FACTORY: ConstructionType = ConstructionType(101);
    const CLOAK_RESEARCH: ConstructionType = ConstructionType(400);

    fn unlocks() -> FactionUnlocks {
        FactionUnlocks::new(DependencyGraph::standard())
    }

    #[test]
    fn test_initial_status() {
        let unlocks = unlocks();
        assert_eq!(
            unlocks.status(1, BAZOOKA_RESEARCH),
            Some(UnlockStatus::Unlockable)
        );
        assert_eq!(unlocks.status(1, BAZOOKA_FACTORY), Some(UnlockStatus::Locked));
        assert_eq!(unlocks.status(1, ConstructionType::COMMAND_CENTER), None);
    }

    #[test]
    fn test_unlock_sets_children() {
        let mut unlocks = unlocks();
        unlocks.unlock(1, BAZOOKA_RESEARCH, ResearchStatus::Pending);
        assert_eq!(
            unlocks.status(1, BAZOOKA_FACTORY),
            Some(UnlockStatus::ResearchPending)
        );

        unlocks.unlock(1, BAZOOKA_RESEARCH, ResearchStatus::Complete);
        assert_eq!(
            unlocks.status(1, BAZOOKA_FACTORY),
            Some(UnlockStatus::Unlockable)
        );
        assert_eq!(
            unlocks.status(1, CLOAK_RESEARCH),
            Some(UnlockStatus::Unlockable)
        );
        // Other factions are untouched.
        assert_eq!(unlocks.status(2, BAZOOKA_FACTORY), Some(UnlockStatus::Locked));
    }

    #[test]
    fn test_unlock_never_downgrades_built() {
        let mut unlocks = unlocks();
        unlocks.unlock(1, BAZOOKA_RESEARCH, ResearchStatus::Complete);
        unlocks.mark_built(1, BAZOOKA_FACTORY);
        unlocks.unlock(1, BAZOOKA_RESEARCH, ResearchStatus::Idle);
        assert_eq!(unlocks.status(1, BAZOOKA_FACTORY), Some(UnlockStatus::Built));
    }

    #[test]
    fn test_unlock_unknown_or_leaf_is_noop() {
        let mut unlocks = unlocks();
        let before = unlocks.snapshot(1);
        unlocks.unlock(1, ConstructionType(999), ResearchStatus::Complete);
        unlocks.unlock(1, BAZOOKA_FACTORY, ResearchStatus::Complete);
        assert_eq!(unlocks.snapshot(1), before);
    }

    #[test]
    fn test_house_never_built() {
        let mut unlocks = unlocks();
        unlocks.mark_built(1, ConstructionType::HOUSE);
        assert_eq!(
            unlocks.status(1, ConstructionType::HOUSE),
            Some(UnlockStatus::Unlockable)
        );
    }

    #[test]
    fn test_recompute_resets_to_initial() {
        let mut unlocks = unlocks();
        unlocks.mark_built(1, BAZOOKA_RESEARCH);
        unlocks.unlock(1, BAZOOKA_RESEARCH, ResearchStatus::Complete);

        unlocks.recompute(1, Vec::new(), Vec::new());
        assert_eq!(unlocks.snapshot(1), initial_map(&DependencyGraph::standard()));
    }

    #[test]
    fn test_recompute_replays_research_then_structures() {
        let mut unlocks = unlocks();
        unlocks.recompute(
            1,
            vec![(BAZOOKA_RESEARCH, ResearchStatus::Complete)],
            vec![BAZOOKA_RESEARCH, BAZOOKA_FACTORY],
        );
        assert_eq!(unlocks.status(1, BAZOOKA_RESEARCH), Some(UnlockStatus::Built));
        assert_eq!(unlocks.status(1, BAZOOKA_FACTORY), Some(UnlockStatus::Built));
        assert_eq!(
            unlocks.status(1, CLOAK_RESEARCH),
            Some(UnlockStatus::Unlockable)
        );
    }
}
