//! Self-driving exploration on top of the move stack.
//!
//! The driver keeps a bottom-up memo of known-solvable box sets so it can
//! back out of positions whose remainder is already understood, and it
//! generalizes stuck positions by dropping one box at a time before
//! declaring them dead.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use super::move_stack::{MoveStack, SearchError};
use crate::analysis::component::component_split;
use crate::board::mask::{DirGrid, Mask, Pos};
use crate::board::state::SokoState;
use crate::deadlock::DlId;

pub struct AutoSelect {
    pub stack: MoveStack,
    heuristic: fn(&SokoState, bool) -> DirGrid<f64>,
    /// Exactly known solvable box sets, with the keeper region they are
    /// solvable from.
    solvable_exact: FxHashMap<Vec<Pos>, Mask>,
    /// `(box, size)` to solvable examples of that size containing the box.
    box_size_to_solvable: FxHashMap<(Pos, usize), Vec<(Mask, Pos)>>,
    /// Stack index from which re-generalization is forbidden.
    forbid_gener: Option<usize>,
    steps: u64,
    rng: StdRng,
}

impl AutoSelect {
    pub fn new(
        stack: MoveStack,
        heuristic: fn(&SokoState, bool) -> DirGrid<f64>,
        seed: u64,
    ) -> AutoSelect {
        let available = stack.state().available.clone();
        let storages = stack.state().storages.clone();
        let mut auto = AutoSelect {
            stack,
            heuristic,
            solvable_exact: FxHashMap::default(),
            box_size_to_solvable: FxHashMap::default(),
            forbid_gener: None,
            steps: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        // every solved configuration is solvable, one per keeper component
        for (keeper, keepers) in component_split(&available.minus(&storages)) {
            auto.add_solvable(&storages, keeper, keepers);
        }
        auto
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// One driver step; `false` means the search cannot move anymore (the
    /// start position is locked or solved).
    pub fn step(&mut self) -> Result<bool, SearchError> {
        self.steps += 1;

        if self.stack.is_locked() {
            if self.forbid_gener == Some(self.stack.cur_move_i()) {
                self.forbid_gener = None;
            }
            return Ok(self.stack.undo());
        }

        let state = self.stack.state().clone();
        if self.is_solvable(&state) {
            if self
                .stack
                .base_state()
                .sub_boxes
                .minus(&self.stack.state().sub_boxes)
                .any()
            {
                // an outstanding generalization hides boxes; put them back
                let full_sub = self.stack.base_state().sub_boxes.clone();
                self.stack.change_sub_boxes(&full_sub)?;
                return Ok(true);
            }
            if self.forbid_gener == Some(self.stack.cur_move_i()) {
                self.forbid_gener = None;
            }
            if !self.stack.undo() {
                return Ok(false);
            }
            let (boxes, keeper, keepers) = {
                let state = self.stack.state();
                (
                    state.sub_boxes.clone(),
                    state.storekeeper,
                    state.storekeepers.clone(),
                )
            };
            self.add_solvable(&boxes, keeper, keepers);
            return Ok(true);
        }

        let (actions, action_locks, free_actions) = self.stack.find_actions_locks();
        if !free_actions.is_empty() {
            let heuristic = self.heuristic;
            let action = self
                .stack
                .choose_action(Some(&heuristic), Some(free_actions))
                .expect("free action list is non-empty");
            self.stack.apply_action_with(action, true, false)?;
            return Ok(true);
        }

        // deadlocked concretely; try hiding one box first
        let boxes = self.stack.state().sub_boxes.positions();
        if boxes.len() > 1 && self.forbid_gener.is_none() {
            let mut order: Vec<usize> = (0..boxes.len()).collect();
            order.shuffle(&mut self.rng);
            let keeper = self.stack.state().storekeeper;
            for i in order {
                let mut reduced = boxes.clone();
                reduced.remove(i);
                if self.is_solvable_exact(&reduced, keeper) {
                    continue;
                }
                let mut new_sub = self.stack.state().sub_boxes.clone();
                new_sub.set(boxes[i], false);
                self.stack.change_sub_boxes(&new_sub)?;
                return Ok(true);
            }
        }

        // no way out: record the deadlock and re-scan the path
        let locks: Vec<DlId> = action_locks
            .into_iter()
            .map(|lock| lock.expect("no free action means every action is locked"))
            .collect();
        let cur_lock = self.stack.cur_lock_id();
        let promotion = self
            .stack
            .deadlocks
            .set_descendants(cur_lock, &actions, &locks)?;
        self.stack.recheck_deadlocks_on_path(promotion);
        let lock_index = self.stack.deadlocks.set.get(self.stack.cur_lock_id()).stack_index;
        if lock_index >= 0 {
            self.forbid_gener = Some(lock_index as usize);
        }
        Ok(true)
    }

    fn add_solvable_exact(&mut self, boxes: Vec<Pos>, keepers: Mask) {
        self.solvable_exact
            .entry(boxes)
            .and_modify(|existing| *existing = &*existing | &keepers)
            .or_insert(keepers);
    }

    fn is_solvable_exact(&self, boxes: &[Pos], keeper: Pos) -> bool {
        self.solvable_exact
            .get(boxes)
            .is_some_and(|keepers| keepers.get(keeper))
    }

    fn add_solvable(&mut self, boxes_mask: &Mask, keeper: Pos, keepers: Mask) {
        let boxes = boxes_mask.positions();
        for &b in &boxes {
            for size in 1..boxes.len() {
                self.box_size_to_solvable
                    .entry((b, size))
                    .or_default()
                    .push((boxes_mask.clone(), keeper));
            }
        }
        self.add_solvable_exact(boxes, keepers);
    }

    /// Solvable either exactly, or because every present box lies inside a
    /// known solvable example whose keeper cell the state can reach.
    fn is_solvable(&mut self, state: &SokoState) -> bool {
        let boxes = state.sub_boxes.positions();
        if boxes.is_empty() {
            return true;
        }
        if self.is_solvable_exact(&boxes, state.storekeeper) {
            return true;
        }
        let empty = Vec::new();
        let candidates = boxes
            .iter()
            .map(|b| {
                self.box_size_to_solvable
                    .get(&(*b, boxes.len()))
                    .unwrap_or(&empty)
            })
            .min_by_key(|list| list.len())
            .expect("at least one box present");
        let matched = candidates.iter().any(|(mask, keeper)| {
            state.storekeepers.get(*keeper) && boxes.iter().all(|&b| mask.get(b))
        });
        if matched {
            self.add_solvable_exact(boxes, state.storekeepers.clone());
        }
        matched
    }

    /// Generalizing the current position costs nothing when no other
    /// deadlock depends on its lock.
    pub fn generalization_is_free(&self) -> bool {
        if self.stack.is_locked() {
            return true;
        }
        !self.stack.deadlocks.has_dependents(self.stack.cur_lock_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::heuristic::storage_heuristic;
    use crate::board::level::decode_level_from_lines;

    fn auto_from(lines: &[&str]) -> AutoSelect {
        let state = SokoState::from_level(&decode_level_from_lines(lines).unwrap());
        AutoSelect::new(MoveStack::new(state, None, true), storage_heuristic, 7)
    }

    #[test]
    fn trivial_corridor_is_solved_in_a_few_steps() {
        let mut auto = auto_from(&["######", "#@ $.#", "######"]);
        for _ in 0..8 {
            if auto.stack.base_state().is_solved() {
                break;
            }
            auto.step().unwrap();
        }
        assert!(auto.stack.base_state().is_solved());
    }

    #[test]
    fn corner_level_ends_with_a_full_deadlock() {
        let mut auto = auto_from(&["####", "#$ #", "# .#", "#@ #", "####"]);
        for _ in 0..8 {
            if !auto.step().unwrap() {
                break;
            }
        }
        assert_eq!(auto.stack.deadlocks.full_count(), 1);
        assert!(auto.stack.is_locked_full());
    }

    #[test]
    fn solved_positions_feed_the_memo() {
        let mut auto = auto_from(&["######", "#@ $.#", "######"]);
        let memo_before = auto.solvable_exact.len();
        for _ in 0..12 {
            auto.step().unwrap();
        }
        assert!(auto.solvable_exact.len() > memo_before);
    }
}
