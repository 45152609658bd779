//! Per-direction move history with deadlock bookkeeping.
//!
//! The stack keeps, for every position of the play history, the concrete
//! state, the generalization currently associated with it and the deadlock
//! matching that generalization. A position whose lock is owned elsewhere
//! (or is full) is *locked*: continuing from it is pointless and the search
//! backs off.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::analysis::component::component;
use crate::board::mask::{Action, DirGrid, Mask, Pos};
use crate::board::state::{SokoState, StateError};
use crate::deadlock::{DeadlockStack, DlId, Promotion, StackError};
use crate::util::{sample_categorical, softmax};

/// Action scorer used for softmax-weighted choice.
pub type HeuristicFn = dyn Fn(&SokoState, bool) -> DirGrid<f64>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Informational result of one `search_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A push was applied and the cursor advanced.
    Applied(Action),
    /// Every continuation from `min_move` is deadlocked.
    Unsolvable,
    /// The current state is solved, so it cannot be a deadlock.
    NotADeadlock,
}

pub struct MoveStack {
    fw_mode: bool,
    base_states: Vec<SokoState>,
    gener_states: Vec<SokoState>,
    state_locks: Vec<DlId>,
    moves: Vec<Action>,
    cur_move_i: usize,
    pub deadlocks: DeadlockStack,
    first_generalization: Option<usize>,
    rng: StdRng,
}

impl MoveStack {
    pub fn new(first_state: SokoState, dl_fname: Option<PathBuf>, fw_mode: bool) -> MoveStack {
        let mut deadlocks = DeadlockStack::new(dl_fname, Some(&first_state));
        let lock = deadlocks
            .set
            .find_by_state(&first_state, None)
            .unwrap_or_else(|| deadlocks.add_state(&first_state, 0));
        MoveStack {
            fw_mode,
            base_states: vec![first_state.clone()],
            gener_states: vec![first_state],
            state_locks: vec![lock],
            moves: Vec::new(),
            cur_move_i: 0,
            deadlocks,
            first_generalization: None,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> MoveStack {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn fw_mode(&self) -> bool {
        self.fw_mode
    }

    pub fn state(&self) -> &SokoState {
        &self.gener_states[self.cur_move_i]
    }

    pub fn base_state(&self) -> &SokoState {
        &self.base_states[self.cur_move_i]
    }

    pub fn base_state_at(&self, i: usize) -> &SokoState {
        &self.base_states[i]
    }

    pub fn cur_lock_id(&self) -> DlId {
        self.state_locks[self.cur_move_i]
    }

    pub fn cur_move_i(&self) -> usize {
        self.cur_move_i
    }

    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    pub fn move_at(&self, i: usize) -> Action {
        self.moves[i]
    }

    pub fn lock_at(&self, i: usize) -> DlId {
        self.state_locks[i]
    }

    pub fn first_generalization(&self) -> Option<usize> {
        self.first_generalization
    }

    pub fn is_on_start(&self) -> bool {
        self.cur_move_i == 0
    }

    pub fn is_on_end(&self) -> bool {
        self.cur_move_i == self.moves.len()
    }

    pub fn is_solved(&self) -> bool {
        self.state().is_solved()
    }

    /// The current position matches a deadlock created elsewhere.
    pub fn is_locked(&self) -> bool {
        self.deadlocks.set.get(self.cur_lock_id()).stack_index != self.cur_move_i as i32
    }

    pub fn is_locked_full(&self) -> bool {
        self.deadlocks.set.get(self.cur_lock_id()).stack_index < 0
    }

    /// Discard the redo history beyond the cursor, removing the deadlocks
    /// owned by the dropped slots.
    fn drop_redo(&mut self) {
        if self
            .first_generalization
            .is_some_and(|first| first > self.cur_move_i)
        {
            self.first_generalization = None;
        }
        let mut discard = Vec::new();
        for i in self.cur_move_i + 1..self.state_locks.len() {
            let lock = self.state_locks[i];
            if self.deadlocks.set.get(lock).stack_index == i as i32 {
                discard.push(lock);
            }
        }
        self.deadlocks.remove(&discard);
        self.base_states.truncate(self.cur_move_i + 1);
        self.gener_states.truncate(self.cur_move_i + 1);
        self.state_locks.truncate(self.cur_move_i + 1);
        self.moves.truncate(self.cur_move_i);
    }

    /// Replace the generalization of the current slot and re-derive its
    /// lock: reuse the previous one when it still matches, search the set
    /// otherwise, create a fresh owned lock as a last resort.
    pub fn generalize_current(&mut self, state: SokoState, check: bool) -> Result<(), SearchError> {
        if check && !self.base_state().is_generalized_by(&state) {
            return Err(StateError::NotAGeneralization.into());
        }
        if self.cur_move_i < self.moves.len() {
            self.drop_redo();
        }
        let prev_lock = self
            .state_locks
            .pop()
            .expect("state lock stack is never empty");
        let prev_lock = if self.deadlocks.set.get(prev_lock).stack_index == self.cur_move_i as i32 {
            self.deadlocks.remove(&[prev_lock]);
            None
        } else {
            Some(prev_lock)
        };
        let prev_state = self
            .gener_states
            .pop()
            .expect("generalized state stack is never empty");

        let lock = match prev_lock {
            None => self.deadlocks.set.find_by_state(&state, Some(&prev_state)),
            Some(lock) if self.deadlocks.set.get(lock).check_state(&state) => Some(lock),
            Some(_) => self.deadlocks.set.find_by_state(&state, None),
        };
        self.gener_states.push(state);
        let lock = lock.unwrap_or_else(|| {
            self.deadlocks
                .add_state(&self.gener_states[self.cur_move_i], self.cur_move_i)
        });
        self.state_locks.push(lock);

        if self.first_generalization == Some(self.cur_move_i) {
            self.first_generalization = None;
        }
        if self.first_generalization.is_none() && !self.gener_states[self.cur_move_i].sub_full {
            self.first_generalization = Some(self.cur_move_i);
        }
        Ok(())
    }

    pub fn change_sub_boxes(&mut self, new_sub_boxes: &Mask) -> Result<(), SearchError> {
        if *new_sub_boxes == self.state().sub_boxes {
            return Ok(());
        }
        let state = self
            .base_state()
            .generalize(new_sub_boxes.clone(), self.state().sup_boxes.clone(), None)?;
        let keeper = self.state().storekeeper;
        let state = if state.storekeepers.get(keeper) {
            state.set_storekeeper(keeper)?
        } else {
            state
        };
        self.generalize_current(state, false)
    }

    pub fn change_sup_boxes(&mut self, new_sup_boxes: &Mask) -> Result<(), SearchError> {
        if *new_sup_boxes == self.state().sup_boxes {
            return Ok(());
        }
        if !(self.base_state().sub_full
            || self.base_state().sup_boxes.is_subset_of(new_sup_boxes))
        {
            return Err(StateError::NotAGeneralization.into());
        }
        let mut state = self.state().clone();
        // the upper bound influences nothing else in the state
        state.sup_boxes = new_sup_boxes.clone();
        self.generalize_current(state, true)
    }

    pub fn set_storekeeper(&mut self, storekeeper: Pos) -> Result<(), SearchError> {
        let state = self.state().set_storekeeper(storekeeper)?;
        self.gener_states[self.cur_move_i] = state;
        Ok(())
    }

    /// Cursor movement only; returns whether the cursor moved.
    pub fn set_cur_move_i(&mut self, i: usize) -> bool {
        let clamped = i.min(self.moves.len());
        if clamped == self.cur_move_i {
            return false;
        }
        self.cur_move_i = clamped;
        true
    }

    pub fn reset(&mut self) -> bool {
        self.set_cur_move_i(0)
    }

    pub fn undo(&mut self) -> bool {
        if self.cur_move_i == 0 {
            return false;
        }
        self.cur_move_i -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        self.set_cur_move_i(self.cur_move_i + 1)
    }

    pub fn redo_max(&mut self) -> bool {
        self.set_cur_move_i(self.moves.len())
    }

    pub fn revert_generalizations(&mut self) {
        if let Some(first) = self.first_generalization {
            if first <= self.cur_move_i {
                self.cur_move_i = first;
            }
        }
    }

    fn push_move(
        &mut self,
        mv: Action,
        next_state: SokoState,
        next_gener: SokoState,
        lock: Option<DlId>,
    ) {
        debug_assert!(self.cur_move_i == self.moves.len());
        self.moves.push(mv);
        self.cur_move_i += 1;
        self.base_states.push(next_state);
        let lock = lock.unwrap_or_else(|| self.deadlocks.add_state(&next_gener, self.cur_move_i));
        self.gener_states.push(next_gener);
        self.state_locks.push(lock);
        if self.first_generalization.is_none() && !self.gener_states[self.cur_move_i].sub_full {
            self.first_generalization = Some(self.cur_move_i);
        }
    }

    fn find_next_lock(&self, next_state: &SokoState) -> Option<DlId> {
        let ori_lock = self.cur_lock_id();
        if self.deadlocks.set.get(ori_lock).check_state(next_state) {
            return Some(ori_lock);
        }
        let state = self.state();
        let mut ori_state: Option<&SokoState> = None;
        if !state.multi_component
            && (next_state.storekeepers.get(state.storekeeper)
                || state.storekeepers.get(next_state.storekeeper))
        {
            ori_state = Some(state);
        }
        if ori_state.is_none() {
            let open = next_state
                .available
                .minus(&next_state.sub_boxes)
                .minus(&state.sub_boxes);
            let keeper_intersection = component(&open, next_state.storekeepers.iter_ones());
            if state.storekeepers.is_subset_of(&keeper_intersection) {
                ori_state = Some(state);
            }
        }
        self.deadlocks.set.find_by_state(next_state, ori_state)
    }

    /// Push one move. Disable `search_for_lock` only when the move is known
    /// not to lead into a deadlock.
    pub fn add_move(
        &mut self,
        mv: Action,
        next_state: SokoState,
        auto_generalize: bool,
        search_for_lock: bool,
    ) -> Result<(), SearchError> {
        if self.cur_move_i < self.moves.len() {
            self.drop_redo();
        }
        let lock = if search_for_lock {
            self.find_next_lock(&next_state)
        } else {
            None
        };
        let next_gener = if auto_generalize {
            if lock.is_none() || lock == Some(self.cur_lock_id()) {
                let state = self.state();
                if next_state.sub_boxes.minus(&state.sup_boxes).any()
                    && state.sub_boxes.minus(&next_state.sub_boxes).any()
                {
                    next_state.clone()
                } else {
                    next_state.generalize(
                        next_state.sub_boxes.clone(),
                        &next_state.sup_boxes | &state.sup_boxes,
                        None,
                    )?
                }
            } else {
                let deadlock = self.deadlocks.set.get(lock.expect("checked above"));
                deadlock
                    .to_soko_state(&next_state)
                    .set_storekeeper(next_state.storekeeper)?
            }
        } else {
            next_state.clone()
        };
        self.push_move(mv, next_state, next_gener, lock);
        Ok(())
    }

    pub fn apply_action(&mut self, action: Action) -> Result<(), SearchError> {
        self.apply_action_with(action, true, true)
    }

    pub fn apply_action_with(
        &mut self,
        action: Action,
        auto_generalize: bool,
        search_for_lock: bool,
    ) -> Result<(), SearchError> {
        let next_state = self.state().move_box(action, self.fw_mode)?;
        self.add_move(action, next_state, auto_generalize, search_for_lock)
    }

    /// Every legal action with the deadlock it would run into, plus the
    /// subset of lock-free actions. Drops the redo history first.
    pub fn find_actions_locks(&mut self) -> (Vec<Action>, Vec<Option<DlId>>, Vec<Action>) {
        self.drop_redo();
        let actions = self.state().action_mask(self.fw_mode).actions();
        let locks = self
            .deadlocks
            .set
            .find_for_actions(self.state(), &actions, self.fw_mode);
        let free_actions = actions
            .iter()
            .zip(&locks)
            .filter(|(_, lock)| lock.is_none())
            .map(|(&action, _)| action)
            .collect();
        (actions, locks, free_actions)
    }

    /// Heuristic-weighted softmax choice; the first action when no
    /// heuristic is given.
    pub fn choose_action(
        &mut self,
        heuristic: Option<&HeuristicFn>,
        actions: Option<Vec<Action>>,
    ) -> Option<Action> {
        let actions = match actions {
            Some(actions) => actions,
            None => {
                if self.is_locked() {
                    return None;
                }
                self.find_actions_locks().2
            }
        };
        if actions.is_empty() {
            return None;
        }
        let choice = match heuristic {
            Some(heuristic) => {
                let scores = heuristic(self.state(), self.fw_mode);
                let logits: Vec<f64> = actions
                    .iter()
                    .map(|action| scores.get(action.box_pos(), action.dir))
                    .collect();
                let probs = softmax(&logits);
                sample_categorical(&probs, self.rng.random::<f64>())
            }
            None => 0,
        };
        Some(actions[choice])
    }

    /// The search kernel: back out of locked positions, apply a free push
    /// if one exists, otherwise prove the position dead and re-scan the
    /// path against the newly promoted deadlocks.
    pub fn search_step(
        &mut self,
        heuristic: Option<&HeuristicFn>,
        min_move: usize,
        auto_generalize: bool,
    ) -> Result<SearchOutcome, SearchError> {
        loop {
            while self.is_locked() {
                if self.cur_move_i == min_move {
                    log::info!("not solvable, every continuation is deadlocked");
                    return Ok(SearchOutcome::Unsolvable);
                }
                self.undo();
            }

            if self.state().is_solved() {
                log::info!("not a deadlock, every box can rest on a storage");
                return Ok(SearchOutcome::NotADeadlock);
            }

            let (actions, action_locks, free_actions) = self.find_actions_locks();

            if !free_actions.is_empty() {
                let action = self
                    .choose_action(heuristic, Some(free_actions))
                    .expect("free action list is non-empty");
                self.apply_action_with(action, auto_generalize, false)?;
                return Ok(SearchOutcome::Applied(action));
            }

            let locks: Vec<DlId> = action_locks
                .into_iter()
                .map(|lock| lock.expect("no free action means every action is locked"))
                .collect();
            let cur_lock = self.cur_lock_id();
            let promotion = self.deadlocks.set_descendants(cur_lock, &actions, &locks)?;
            self.recheck_deadlocks_on_path(promotion);
        }
    }

    /// Walk the history backwards and re-lock slots covered by the newly
    /// promoted (or lowered) deadlocks, discarding replaced owned locks.
    pub fn recheck_deadlocks_on_path(&mut self, promotion: Promotion) {
        let Promotion {
            scc,
            mut to_check,
            index_to_drop_num,
        } = promotion;
        let mut discard: Vec<DlId> = Vec::new();
        for i in (0..self.cur_move_i).rev() {
            let drop_num = index_to_drop_num.get(&(i as i32)).copied().unwrap_or(0);
            if drop_num > 0 {
                to_check.truncate(to_check.len().saturating_sub(drop_num));
                if to_check.is_empty() {
                    break;
                }
            }
            let lock = self.state_locks[i];
            let lock_stack_index = self.deadlocks.set.get(lock).stack_index;
            if lock_stack_index < 0 {
                continue;
            }
            let candidates: &[DlId] = if lock_stack_index != i as i32 {
                &scc
            } else {
                &to_check
            };
            let replacement = candidates
                .iter()
                .copied()
                .find(|&dl| self.deadlocks.set.get(dl).check_state(&self.gener_states[i]));
            if let Some(dl) = replacement {
                if lock_stack_index == i as i32 {
                    discard.push(lock);
                }
                self.state_locks[i] = dl;
            }
        }
        self.deadlocks.remove(&discard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::direction::Dir;
    use crate::board::level::decode_level_from_lines;

    fn stack_from(lines: &[&str]) -> MoveStack {
        let state = SokoState::from_level(&decode_level_from_lines(lines).unwrap());
        MoveStack::new(state, None, true)
    }

    #[test]
    fn corner_box_promotes_and_reports_unsolvable() {
        // the box is stuck in the top-left corner from the very start
        let mut stack = stack_from(&["####", "#$ #", "# .#", "#@ #", "####"]);
        assert!(!stack.is_locked());
        let outcome = stack.search_step(None, 0, true).unwrap();
        assert_eq!(outcome, SearchOutcome::Unsolvable);
        assert!(stack.is_locked_full());
        assert_eq!(stack.deadlocks.full_count(), 1);
    }

    #[test]
    fn stuck_square_has_no_actions_and_one_scc() {
        let mut stack = stack_from(&[
            "######", "#$$ .#", "#$$..#", "#  . #", "#@   #", "######",
        ]);
        assert!(stack.state().action_mask(true).actions().is_empty());
        let outcome = stack.search_step(None, 0, true).unwrap();
        assert_eq!(outcome, SearchOutcome::Unsolvable);
        assert_eq!(stack.deadlocks.full_count(), 1);
    }

    #[test]
    fn solvable_corridor_applies_the_push() {
        let mut stack = stack_from(&["######", "#@ $.#", "######"]);
        let outcome = stack.search_step(None, 0, true).unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Applied(Action::new(1, 3, Dir::Right))
        );
        assert!(stack.is_solved());
        let next = stack.search_step(None, 0, true).unwrap();
        assert_eq!(next, SearchOutcome::NotADeadlock);
    }

    #[test]
    fn apply_and_undo_restore_the_cursor_state() {
        let mut stack = stack_from(&["#######", "#@ $ .#", "#######"]);
        let before_state = stack.state().clone();
        let before_cursor = stack.cur_move_i();
        stack.apply_action(Action::new(1, 3, Dir::Right)).unwrap();
        assert_eq!(stack.cur_move_i(), 1);
        assert!(stack.undo());
        assert_eq!(stack.cur_move_i(), before_cursor);
        assert_eq!(stack.state().sub_boxes, before_state.sub_boxes);
        assert_eq!(stack.state().sup_boxes, before_state.sup_boxes);
        assert_eq!(stack.state().storekeepers, before_state.storekeepers);
        assert_eq!(stack.state().storekeeper, before_state.storekeeper);
        // redo history is retained until a structural change
        assert_eq!(stack.move_count(), 1);
        assert!(stack.redo());
        assert!(stack.state().sub_boxes.get(crate::board::mask::Pos::new(2, 5)));
    }

    #[test]
    fn change_sub_boxes_to_current_is_identity() {
        let mut stack = stack_from(&["#######", "#@ $ .#", "#######"]);
        let lock_before = stack.cur_lock_id();
        let sub = stack.state().sub_boxes.clone();
        stack.change_sub_boxes(&sub).unwrap();
        assert_eq!(stack.cur_lock_id(), lock_before);
        let sup = stack.state().sup_boxes.clone();
        stack.change_sup_boxes(&sup).unwrap();
        assert_eq!(stack.cur_lock_id(), lock_before);
    }

    #[test]
    fn generalizing_away_the_box_unlocks_nothing_new() {
        let mut stack = stack_from(&["#######", "#@ $ .#", "#######"]);
        let empty = Mask::new(
            stack.state().available.height(),
            stack.state().available.width(),
        );
        stack.change_sub_boxes(&empty).unwrap();
        assert!(!stack.state().sub_full);
        assert_eq!(stack.first_generalization(), Some(0));
        // the base state is still what it was
        assert!(stack.base_state().sub_boxes.any());
    }

    #[test]
    fn recheck_replaces_owned_locks_with_the_promoted_deadlock() {
        let mut stack = stack_from(&["########", "#@ $   #", "#     .#", "########"]);
        stack.apply_action(Action::new(1, 3, Dir::Right)).unwrap();
        stack.apply_action(Action::new(1, 4, Dir::Right)).unwrap();
        let slot1_lock = stack.lock_at(1);

        // generalize the current slot to the empty family, then declare it
        // dead: the promoted deadlock covers every earlier slot as well
        let empty = Mask::new(
            stack.state().available.height(),
            stack.state().available.width(),
        );
        stack.change_sub_boxes(&empty).unwrap();
        let cur_lock = stack.cur_lock_id();
        let promotion = stack.deadlocks.set_descendants(cur_lock, &[], &[]).unwrap();
        assert_eq!(promotion.scc, vec![cur_lock]);
        stack.recheck_deadlocks_on_path(promotion);

        assert_eq!(stack.lock_at(1), cur_lock);
        assert_eq!(stack.lock_at(0), cur_lock);
        assert!(!stack.deadlocks.set.contains(slot1_lock));
        assert!(stack.is_locked_full());
    }
}
