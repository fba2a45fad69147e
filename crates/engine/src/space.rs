use memtx_core::ids::{GroupId, SpaceId};

use crate::index::Index;

/// A named container of tuples with an ordered list of indexes; index 0
/// is always the primary. Temporary spaces are excluded from snapshots
/// and from the recovery state machine entirely.
pub struct Space {
    id: SpaceId,
    group_id: GroupId,
    temporary: bool,
    indexes: Vec<Box<dyn Index>>,
}

impl Space {
    pub fn new(id: SpaceId, group_id: GroupId, temporary: bool, primary: Box<dyn Index>) -> Self {
        Self {
            id,
            group_id,
            temporary,
            indexes: vec![primary],
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn add_secondary_index(&mut self, index: Box<dyn Index>) {
        self.indexes.push(index);
    }

    pub fn primary(&self) -> &dyn Index {
        self.indexes[0].as_ref()
    }

    pub fn primary_mut(&mut self) -> &mut (dyn Index + 'static) {
        self.indexes[0].as_mut()
    }

    pub fn indexes(&self) -> &[Box<dyn Index>] {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut [Box<dyn Index>] {
        &mut self.indexes
    }

    pub fn secondary_count(&self) -> usize {
        self.indexes.len() - 1
    }
}
