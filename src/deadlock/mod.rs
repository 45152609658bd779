//! Deadlock records, their index and the dependency stack.

pub mod arena;
pub mod set;
pub mod stack;
pub mod store;

pub use arena::{DeadlockArena, DlId};
pub use set::DeadlockSet;
pub use stack::{DeadlockStack, Promotion, StackError};

use rustc_hash::FxHashSet;

use crate::board::mask::{Action, Mask, Pos};
use crate::board::state::SokoState;

/// Sentinel for "not on the stack"; on-stack deadlocks carry the move-stack
/// index they were created at.
pub const NO_STACK_INDEX: i32 = -1;

/// Canonical, position-set form of a generalized state proven (or suspected)
/// unsolvable from its keeper component.
///
/// Lifecycle: *on-stack* (`stack_index >= 0`, being explored), *off-stack*
/// (popped, `stack_index` lowered to the highest stack slot it can still
/// escape through) and *full* (`full_index` assigned, persisted, permanent).
#[derive(Clone)]
pub struct Deadlock {
    /// Boxes known to be present, sorted.
    pub boxes: Vec<Pos>,
    /// Positions guaranteed to hold no box, sorted; empty when the
    /// originating state was `sub_full`.
    pub not_boxes: Vec<Pos>,
    /// Keeper-reachable region of the originating state.
    pub sk_component: Mask,
    pub stack_index: i32,
    pub full_index: Option<u32>,
    /// One descendant per legal action, populated when every action from
    /// this position leads into a deadlock.
    pub descendants: Option<Vec<(Action, DlId)>>,
}

impl Deadlock {
    pub fn new(mut boxes: Vec<Pos>, mut not_boxes: Vec<Pos>, sk_component: Mask) -> Deadlock {
        boxes.sort_unstable();
        not_boxes.sort_unstable();
        Deadlock {
            boxes,
            not_boxes,
            sk_component,
            stack_index: NO_STACK_INDEX,
            full_index: None,
            descendants: None,
        }
    }

    pub fn from_state(state: &SokoState) -> Deadlock {
        let boxes = state.sub_boxes.positions();
        let not_boxes = if state.sub_full {
            Vec::new()
        } else {
            state.available.minus(&state.sup_boxes).positions()
        };
        Deadlock::new(boxes, not_boxes, state.storekeepers.clone())
    }

    pub fn is_full(&self) -> bool {
        self.full_index.is_some()
    }

    pub fn is_on_stack(&self) -> bool {
        self.stack_index >= 0
    }

    /// Match against a configuration given as position sets.
    pub fn check_sets(
        &self,
        boxes: &FxHashSet<Pos>,
        not_boxes: Option<&FxHashSet<Pos>>,
        storekeeper: Pos,
    ) -> bool {
        self.boxes.iter().all(|b| boxes.contains(b))
            && self.check_not_boxes(boxes, not_boxes)
            && self.sk_component.get(storekeeper)
    }

    pub fn check_not_boxes(
        &self,
        boxes: &FxHashSet<Pos>,
        not_boxes: Option<&FxHashSet<Pos>>,
    ) -> bool {
        match not_boxes {
            None => self.not_boxes.iter().all(|nb| !boxes.contains(nb)),
            Some(nboxes) => self.not_boxes.iter().all(|nb| nboxes.contains(nb)),
        }
    }

    /// Does this deadlock cover the generalized state?
    pub fn check_state(&self, state: &SokoState) -> bool {
        if state.multi_component {
            if !state.storekeepers.is_subset_of(&self.sk_component) {
                return false;
            }
        } else if !self.sk_component.get(state.storekeeper) {
            return false;
        }
        let occupied = if state.sub_full {
            &state.sub_boxes
        } else {
            &state.sup_boxes
        };
        if self.not_boxes.iter().any(|&nb| occupied.get(nb)) {
            return false;
        }
        self.boxes.iter().all(|&b| state.sub_boxes.get(b))
    }

    /// Re-expand the record into a generalized state over the level of
    /// `base_state`.
    pub fn to_soko_state(&self, base_state: &SokoState) -> SokoState {
        let mut sub_boxes = Mask::new(
            base_state.available.height(),
            base_state.available.width(),
        );
        for &b in &self.boxes {
            sub_boxes.set(b, true);
        }
        let mut sup_boxes = (*base_state.available).clone();
        for &nb in &self.not_boxes {
            sup_boxes.set(nb, false);
        }
        let storekeeper = self
            .sk_component
            .first_one()
            .expect("deadlock has a non-empty storekeeper component");
        SokoState::with_parts(
            base_state.available.clone(),
            base_state.storages.clone(),
            sub_boxes,
            sup_boxes,
            storekeeper,
            Some(self.sk_component.clone()),
            None,
            None,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::level::decode_level_from_lines;

    fn state_from(lines: &[&str]) -> SokoState {
        SokoState::from_level(&decode_level_from_lines(lines).unwrap())
    }

    #[test]
    fn from_state_of_a_full_state_has_no_blocked_cells() {
        let state = state_from(&["#####", "#@$.#", "#####"]);
        let dl = Deadlock::from_state(&state);
        assert_eq!(dl.boxes, vec![Pos::new(2, 3)]);
        assert!(dl.not_boxes.is_empty());
        assert!(dl.check_state(&state));
    }

    #[test]
    fn check_state_requires_keeper_component() {
        let state = state_from(&["#####", "#@$.#", "#####"]);
        let dl = Deadlock::from_state(&state);
        // a state whose keeper sits on the other side does not match
        let pushed = state
            .move_box(crate::board::mask::Action::new(1, 2, crate::board::direction::Dir::Right), true)
            .unwrap();
        assert!(!dl.check_state(&pushed));
    }

    #[test]
    fn to_soko_state_round_trips_through_from_state() {
        let state = state_from(&["######", "#@$ .#", "######"]);
        let dl = Deadlock::from_state(&state);
        let back = dl.to_soko_state(&state);
        assert_eq!(back.sub_boxes, state.sub_boxes);
        assert_eq!(back.storekeepers, state.storekeepers);
        assert!(back.sub_full);
    }
}
