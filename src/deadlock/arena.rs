//! Slot arena handing out stable deadlock identifiers.
//!
//! Deadlocks are referenced from several index structures and from the move
//! stack at once, so they live in one arena and everything else holds a
//! `DlId`. Slots of removed deadlocks stay vacant; identifiers are never
//! reused within a level session.

use std::fmt;

use super::Deadlock;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DlId(u32);

impl DlId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dl#{}", self.0)
    }
}

#[derive(Default)]
pub struct DeadlockArena {
    slots: Vec<Option<Deadlock>>,
}

impl DeadlockArena {
    pub fn new() -> DeadlockArena {
        DeadlockArena::default()
    }

    pub fn insert(&mut self, deadlock: Deadlock) -> DlId {
        let id = DlId(self.slots.len() as u32);
        self.slots.push(Some(deadlock));
        id
    }

    pub fn remove(&mut self, id: DlId) -> Deadlock {
        self.slots[id.index()]
            .take()
            .expect("removing a deadlock that was already removed")
    }

    pub fn contains(&self, id: DlId) -> bool {
        self.slots
            .get(id.index())
            .map_or(false, |slot| slot.is_some())
    }

    pub fn get(&self, id: DlId) -> &Deadlock {
        self.slots[id.index()]
            .as_ref()
            .expect("accessing a removed deadlock")
    }

    pub fn get_mut(&mut self, id: DlId) -> &mut Deadlock {
        self.slots[id.index()]
            .as_mut()
            .expect("accessing a removed deadlock")
    }

    pub fn iter(&self) -> impl Iterator<Item = (DlId, &Deadlock)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|dl| (DlId(i as u32), dl)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
