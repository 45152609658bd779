//! Dependency tracking over tentative deadlocks.
//!
//! Every tentative deadlock sits at the move-stack slot it was created at.
//! When all actions out of a deadlock are themselves covered by deadlocks,
//! `set_descendants` wires the dependency edges and re-derives stack
//! indices: dependents that can still escape through a lower slot get
//! lowered, and the rest form a strongly connected component with no way
//! out, which is promoted to full deadlocks and appended to the store.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::set::DeadlockSet;
use super::{Deadlock, DlId, NO_STACK_INDEX, store};
use crate::board::mask::Action;
use crate::board::state::SokoState;

const REPLAY_DUMP_FILE: &str = "bug.log";

#[derive(Debug, Error)]
pub enum StackError {
    #[error("deadlock dependency inconsistency: {0}")]
    Inconsistency(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of a `set_descendants` call, consumed by the move stack to
/// re-scan its history.
pub struct Promotion {
    /// Newly promoted full deadlocks, in promotion (= `full_index`) order.
    pub scc: Vec<DlId>,
    /// Candidates for re-locking path slots: the SCC followed by the
    /// lowered deadlocks, most recently lowered last.
    pub to_check: Vec<DlId>,
    /// How many entries to drop from the tail of `to_check` when the
    /// backward path walk passes each stack index.
    pub index_to_drop_num: FxHashMap<i32, usize>,
}

pub struct DeadlockStack {
    pub set: DeadlockSet,
    /// Edge `a -> b`: deadlock `a` depends on descendant `b`.
    deps: DiGraphMap<DlId, ()>,
    last_full_index: i64,
    fname: Option<PathBuf>,
    replay: Vec<String>,
    replay_dump: Option<PathBuf>,
}

impl DeadlockStack {
    pub fn new(fname: Option<PathBuf>, sample_state: Option<&SokoState>) -> DeadlockStack {
        let replay_dump = match &fname {
            Some(path) => path.with_file_name(REPLAY_DUMP_FILE),
            None => PathBuf::from(REPLAY_DUMP_FILE),
        };
        let mut stack = DeadlockStack {
            set: DeadlockSet::new(),
            deps: DiGraphMap::new(),
            last_full_index: -1,
            fname: fname.clone(),
            replay: Vec::new(),
            replay_dump: Some(replay_dump),
        };
        if let (Some(path), Some(base_state)) = (fname, sample_state) {
            if path.exists() {
                log::info!("loading deadlocks from {}", path.display());
                match store::load_blocks(&path, base_state) {
                    Ok(blocks) => stack.install_blocks(blocks),
                    Err(err) => {
                        log::warn!("unreadable deadlock store: {}", err);
                        match store::backup_corrupted(&path) {
                            Ok(backup) => log::warn!(
                                "deadlock file corrupted, renamed to '{}'",
                                backup.display()
                            ),
                            Err(io_err) => log::warn!(
                                "could not back up the corrupted deadlock file: {}",
                                io_err
                            ),
                        }
                    }
                }
            }
        }
        stack
    }

    fn install_blocks(&mut self, blocks: Vec<store::Block>) {
        let mut by_full_index: Vec<DlId> = Vec::new();
        for block in blocks {
            let start = by_full_index.len();
            let mut wirings = Vec::new();
            for (deadlock, actions) in block {
                let full_index = deadlock
                    .full_index
                    .expect("loader assigns full indices");
                self.last_full_index = full_index as i64;
                let id = self.set.add(deadlock);
                self.replay
                    .push(format!("{:?} = load_full({})", id, full_index));
                by_full_index.push(id);
                wirings.push((id, actions));
            }
            debug_assert!(start < by_full_index.len());
            for (id, actions) in wirings {
                let descendants = actions
                    .into_iter()
                    .map(|(action, desc)| (action, by_full_index[desc as usize]))
                    .collect();
                self.set.get_mut(id).descendants = Some(descendants);
            }
        }
        log::info!("loaded {} deadlocks", self.last_full_index + 1);
    }

    /// Number of full deadlocks known so far.
    pub fn full_count(&self) -> u64 {
        (self.last_full_index + 1) as u64
    }

    pub fn has_dependents(&self, id: DlId) -> bool {
        self.deps
            .neighbors_directed(id, Direction::Incoming)
            .next()
            .is_some()
    }

    pub fn add(&mut self, mut deadlock: Deadlock, stack_index: usize) -> DlId {
        deadlock.stack_index = stack_index as i32;
        let id = self.set.add(deadlock);
        self.deps.add_node(id);
        self.replay
            .push(format!("{:?} = add(stack_index={})", id, stack_index));
        id
    }

    pub fn add_state(&mut self, state: &SokoState, stack_index: usize) -> DlId {
        self.add(Deadlock::from_state(state), stack_index)
    }

    /// Remove deadlocks together with everything that depends on them.
    pub fn remove(&mut self, deadlocks: &[DlId]) {
        self.replay.push(format!("remove({:?})", deadlocks));
        let dependent = self.closure_dependents(deadlocks);
        for id in dependent {
            self.set.remove(id);
            self.deps.remove_node(id);
        }
    }

    /// All deadlocks transitively depending on any of `start`, including the
    /// start deadlocks themselves, in discovery order.
    fn closure_dependents(&self, start: &[DlId]) -> IndexSet<DlId> {
        let mut out = IndexSet::new();
        let mut stack: Vec<DlId> = start.to_vec();
        while let Some(id) = stack.pop() {
            if !out.insert(id) {
                continue;
            }
            stack.extend(self.deps.neighbors_directed(id, Direction::Incoming));
        }
        out
    }

    fn make_full(&mut self, id: DlId) -> Result<(), StackError> {
        let deadlock = self.set.get_mut(id);
        if deadlock.full_index.is_some() {
            return Err(StackError::Inconsistency("deadlock is already full"));
        }
        deadlock.stack_index = NO_STACK_INDEX;
        self.deps.remove_node(id);
        self.last_full_index += 1;
        self.set.get_mut(id).full_index = Some(self.last_full_index as u32);
        Ok(())
    }

    /// Record the descendants of an on-stack deadlock and re-derive stack
    /// indices of everything depending on it. Preconditions: descendants are
    /// not yet set, one descendant per action, every descendant is full or
    /// sits at a stack index not above this deadlock's.
    pub fn set_descendants(
        &mut self,
        id: DlId,
        actions: &[Action],
        descendants: &[DlId],
    ) -> Result<Promotion, StackError> {
        self.replay.push(format!(
            "set_descendants({:?}, {} actions, {:?})",
            id,
            actions.len(),
            descendants
        ));
        match self.set_descendants_inner(id, actions, descendants) {
            Ok(promotion) => Ok(promotion),
            Err(err) => {
                self.dump_replay();
                Err(err)
            }
        }
    }

    fn set_descendants_inner(
        &mut self,
        id: DlId,
        actions: &[Action],
        descendants: &[DlId],
    ) -> Result<Promotion, StackError> {
        {
            let deadlock = self.set.get(id);
            if deadlock.descendants.is_some() {
                return Err(StackError::Inconsistency("descendants already recorded"));
            }
            if !deadlock.is_on_stack() {
                return Err(StackError::Inconsistency("deadlock is not on the stack"));
            }
        }
        if actions.len() != descendants.len() {
            return Err(StackError::Inconsistency(
                "one descendant per action required",
            ));
        }
        self.set.get_mut(id).descendants = Some(
            actions
                .iter()
                .copied()
                .zip(descendants.iter().copied())
                .collect(),
        );
        for &desc in descendants {
            if self.set.get(desc).is_on_stack() {
                self.deps.add_edge(id, desc, ());
            }
        }

        let to_check = self.closure_dependents(&[id]);
        let ori_stack_index = self.set.get(id).stack_index;
        for &dl in &to_check {
            if self.set.get(dl).stack_index != ori_stack_index {
                return Err(StackError::Inconsistency(
                    "dependent sits at a different stack index",
                ));
            }
        }

        // which dependents can still escape through a lower stack slot?
        let mut escape_groups: BTreeMap<i32, Vec<DlId>> = BTreeMap::new();
        for &dl in &to_check {
            let new_index = self
                .deps
                .neighbors(dl)
                .map(|desc| self.set.get(desc).stack_index)
                .filter(|&idx| idx != ori_stack_index)
                .max()
                .unwrap_or(NO_STACK_INDEX);
            if new_index >= 0 {
                if new_index >= ori_stack_index {
                    return Err(StackError::Inconsistency(
                        "descendant above its dependent on the stack",
                    ));
                }
                escape_groups.entry(new_index).or_default().push(dl);
            }
        }

        // propagate escape indices backwards over dependents, highest first
        let mut dfs_stack: Vec<(DlId, i32)> = escape_groups
            .into_iter()
            .flat_map(|(idx, dls)| dls.into_iter().map(move |dl| (dl, idx)))
            .collect();
        let mut remaining = to_check;
        let mut lowered: Vec<DlId> = Vec::new();
        let mut index_to_drop_num: FxHashMap<i32, usize> = FxHashMap::default();
        while let Some((dl, idx)) = dfs_stack.pop() {
            if !remaining.shift_remove(&dl) {
                continue;
            }
            lowered.push(dl);
            *index_to_drop_num.entry(idx).or_insert(0) += 1;
            self.set.get_mut(dl).stack_index = idx;
            dfs_stack.extend(
                self.deps
                    .neighbors_directed(dl, Direction::Incoming)
                    .map(|dependent| (dependent, idx)),
            );
        }

        // what is left cannot escape: a strongly connected component of
        // mutually dependent deadlocks, collectively unsolvable
        let scc: Vec<DlId> = remaining.into_iter().collect();
        if !scc.is_empty() {
            for &dl in &scc {
                self.make_full(dl)?;
            }
            if let Some(path) = self.fname.clone() {
                self.append_block(&path, &scc)?;
                let first = self.full_index_of(scc[0]);
                let last = self.full_index_of(scc[scc.len() - 1]);
                if scc.len() == 1 {
                    log::info!("saved deadlock {}", first);
                } else {
                    log::info!("saved deadlocks {}-{}", first, last);
                }
            }
        }

        lowered.reverse();
        let mut to_check_out = scc.clone();
        to_check_out.extend(lowered);
        Ok(Promotion {
            scc,
            to_check: to_check_out,
            index_to_drop_num,
        })
    }

    fn full_index_of(&self, id: DlId) -> u32 {
        self.set
            .get(id)
            .full_index
            .expect("promoted deadlock has a full index")
    }

    fn append_block(&self, path: &Path, scc: &[DlId]) -> Result<(), StackError> {
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        writeln!(file)?;
        for &dl in scc {
            store::write_record(&mut file, self.set.get(dl), &self.set)?;
        }
        Ok(())
    }

    /// Debug invariant: a deadlock with known descendants sits exactly at
    /// the highest stack index among them.
    pub fn check_correct(&self) -> Result<(), StackError> {
        for id in self.deps.nodes() {
            let deadlock = self.set.get(id);
            let Some(descendants) = &deadlock.descendants else {
                continue;
            };
            let expected = descendants
                .iter()
                .map(|&(_, desc)| self.set.get(desc).stack_index)
                .max()
                .unwrap_or(NO_STACK_INDEX);
            if deadlock.stack_index != expected {
                return Err(StackError::Inconsistency(
                    "stack index does not match the descendants",
                ));
            }
        }
        Ok(())
    }

    fn dump_replay(&mut self) {
        let Some(path) = self.replay_dump.take() else {
            return;
        };
        let mut text = self.replay.join("\n");
        text.push('\n');
        match fs::write(&path, text) {
            Ok(()) => log::error!(
                "deadlock stack error, replay log stored in {}",
                path.display()
            ),
            Err(err) => log::error!("deadlock stack error, replay log not written: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::direction::Dir;
    use crate::board::level::decode_level_from_lines;
    use crate::board::mask::Pos;

    fn base_state() -> SokoState {
        SokoState::from_level(
            &decode_level_from_lines(&["######", "#@$ .#", "#  $.#", "######"]).unwrap(),
        )
    }

    fn deadlock_at(base: &SokoState, boxes: &[Pos]) -> Deadlock {
        let mut open = (*base.available).clone();
        for &b in boxes {
            open.set(b, false);
        }
        let sk_component = crate::analysis::component(&open, [base.storekeeper]);
        Deadlock::new(boxes.to_vec(), Vec::new(), sk_component)
    }

    fn act(n: usize) -> Action {
        Action::new(0, n, Dir::Right)
    }

    #[test]
    fn lone_deadlock_with_no_actions_promotes_immediately() {
        let base = base_state();
        let mut stack = DeadlockStack::new(None, None);
        let id = stack.add(deadlock_at(&base, &[Pos::new(2, 3)]), 0);
        let promotion = stack.set_descendants(id, &[], &[]).unwrap();
        assert_eq!(promotion.scc, vec![id]);
        assert_eq!(promotion.to_check, vec![id]);
        assert!(promotion.index_to_drop_num.is_empty());
        let deadlock = stack.set.get(id);
        assert_eq!(deadlock.full_index, Some(0));
        assert_eq!(deadlock.stack_index, NO_STACK_INDEX);
        assert!(stack.check_correct().is_ok());
    }

    #[test]
    fn escape_to_a_lower_slot_lowers_the_index() {
        let base = base_state();
        let mut stack = DeadlockStack::new(None, None);
        let low = stack.add(deadlock_at(&base, &[Pos::new(2, 3)]), 0);
        let high = stack.add(deadlock_at(&base, &[Pos::new(3, 4)]), 2);
        let promotion = stack.set_descendants(high, &[act(0)], &[low]).unwrap();
        assert!(promotion.scc.is_empty());
        assert_eq!(promotion.to_check, vec![high]);
        assert_eq!(promotion.index_to_drop_num.get(&0), Some(&1));
        assert_eq!(stack.set.get(high).stack_index, 0);
        assert!(stack.check_correct().is_ok());
    }

    #[test]
    fn three_cycle_promotes_as_one_block() {
        let base = base_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        let mut stack = DeadlockStack::new(Some(path.clone()), Some(&base));
        let a = stack.add(deadlock_at(&base, &[Pos::new(2, 3)]), 0);
        let b = stack.add(deadlock_at(&base, &[Pos::new(3, 4)]), 1);
        let c = stack.add(deadlock_at(&base, &[Pos::new(2, 3), Pos::new(3, 4)]), 2);

        // c escapes to a's slot, then b escapes to c's new slot
        let p1 = stack.set_descendants(c, &[act(0)], &[a]).unwrap();
        assert!(p1.scc.is_empty());
        assert_eq!(stack.set.get(c).stack_index, 0);
        let p2 = stack.set_descendants(b, &[act(1)], &[c]).unwrap();
        assert!(p2.scc.is_empty());
        assert_eq!(stack.set.get(b).stack_index, 0);

        // closing the cycle leaves no way out: everything promotes
        let p3 = stack.set_descendants(a, &[act(2)], &[b]).unwrap();
        assert_eq!(p3.scc, vec![a, c, b]);
        assert_eq!(stack.set.get(a).full_index, Some(0));
        assert_eq!(stack.set.get(c).full_index, Some(1));
        assert_eq!(stack.set.get(b).full_index, Some(2));

        // the persisted block contains the three records with the new
        // indices wired between them
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Deadlock ").count(), 3);
        assert!(text.contains("-> 2")); // a depends on b
        assert!(text.contains("-> 1")); // b depends on c... seen from c's record
        assert!(text.contains("-> 0"));

        // and it loads back as a single block
        let blocks = store::load_blocks(&path, &base).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 3);
    }

    #[test]
    fn remove_discards_dependents_too() {
        let base = base_state();
        let mut stack = DeadlockStack::new(None, None);
        let low = stack.add(deadlock_at(&base, &[Pos::new(2, 3)]), 0);
        let high = stack.add(deadlock_at(&base, &[Pos::new(3, 4)]), 1);
        stack.set_descendants(high, &[act(0)], &[low]).unwrap();
        assert!(stack.has_dependents(low));
        stack.remove(&[low]);
        assert!(!stack.set.contains(low));
        assert!(!stack.set.contains(high));
    }

    #[test]
    fn length_mismatch_is_an_inconsistency() {
        let base = base_state();
        let dir = tempfile::tempdir().unwrap();
        let mut stack = DeadlockStack::new(Some(dir.path().join("deadlocks")), Some(&base));
        let id = stack.add(deadlock_at(&base, &[Pos::new(2, 3)]), 0);
        let other = stack.add(deadlock_at(&base, &[Pos::new(3, 4)]), 0);
        assert!(matches!(
            stack.set_descendants(id, &[act(0)], &[other, other]),
            Err(StackError::Inconsistency(_))
        ));
        // the replay log lands next to the store
        assert!(dir.path().join("bug.log").exists());
    }
}
