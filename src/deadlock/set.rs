//! Multi-key deadlock index.
//!
//! Lookup must answer: which stored deadlock covers a state whose box set
//! just changed by a few cells? Every deadlock is keyed under each of its
//! boxes and blocked cells together with its size, so a query only touches
//! deadlocks sharing one of the changed cells. For dense keys the index
//! switches to enumerating box subsets of the matching size instead.

use itertools::Itertools;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::{FxHashMap, FxHashSet};

use super::arena::{DeadlockArena, DlId};
use super::Deadlock;
use crate::board::direction::Dir;
use crate::board::mask::{Action, Mask, Pos};
use crate::board::state::SokoState;
use crate::util::binom;

/// Bipartite index graph: key nodes (cell, size) point at the deadlocks
/// registered under them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SetNode {
    Key(u32),
    Dl(DlId),
}

pub struct DeadlockSet {
    arena: DeadlockArena,
    index: DiGraphMap<SetNode, ()>,
    boxes_to_dl: FxHashMap<Vec<Pos>, Vec<DlId>>,
    box_keys: FxHashMap<Pos, FxHashMap<usize, u32>>,
    nbox_keys: FxHashMap<Pos, FxHashMap<usize, u32>>,
    next_key: u32,
}

impl Default for DeadlockSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlockSet {
    pub fn new() -> DeadlockSet {
        DeadlockSet {
            arena: DeadlockArena::new(),
            index: DiGraphMap::new(),
            boxes_to_dl: FxHashMap::default(),
            box_keys: FxHashMap::default(),
            nbox_keys: FxHashMap::default(),
            next_key: 0,
        }
    }

    pub fn get(&self, id: DlId) -> &Deadlock {
        self.arena.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: DlId) -> &mut Deadlock {
        self.arena.get_mut(id)
    }

    pub fn contains(&self, id: DlId) -> bool {
        self.arena.contains(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DlId, &Deadlock)> {
        self.arena.iter()
    }

    fn key_in(
        keys: &mut FxHashMap<Pos, FxHashMap<usize, u32>>,
        index: &mut DiGraphMap<SetNode, ()>,
        next_key: &mut u32,
        pos: Pos,
        size: usize,
    ) -> u32 {
        *keys
            .entry(pos)
            .or_default()
            .entry(size)
            .or_insert_with(|| {
                let key = *next_key;
                *next_key += 1;
                index.add_node(SetNode::Key(key));
                key
            })
    }

    pub fn add(&mut self, deadlock: Deadlock) -> DlId {
        let boxes = deadlock.boxes.clone();
        let not_boxes = deadlock.not_boxes.clone();
        let id = self.arena.insert(deadlock);
        self.index.add_node(SetNode::Dl(id));
        self.boxes_to_dl.entry(boxes.clone()).or_default().push(id);
        let size = boxes.len();
        for &b in &boxes {
            let key = Self::key_in(&mut self.box_keys, &mut self.index, &mut self.next_key, b, size);
            self.index.add_edge(SetNode::Key(key), SetNode::Dl(id), ());
        }
        for &nb in &not_boxes {
            let key =
                Self::key_in(&mut self.nbox_keys, &mut self.index, &mut self.next_key, nb, size);
            self.index.add_edge(SetNode::Key(key), SetNode::Dl(id), ());
        }
        id
    }

    pub fn add_state(&mut self, state: &SokoState) -> DlId {
        self.add(Deadlock::from_state(state))
    }

    pub fn remove(&mut self, id: DlId) {
        let deadlock = self.arena.remove(id);
        if let Some(list) = self.boxes_to_dl.get_mut(&deadlock.boxes) {
            list.retain(|&other| other != id);
        }
        self.index.remove_node(SetNode::Dl(id));
    }

    fn key_deadlocks(&self, key: u32) -> Vec<DlId> {
        self.index
            .neighbors(SetNode::Key(key))
            .filter_map(|node| match node {
                SetNode::Dl(id) => Some(id),
                SetNode::Key(_) => None,
            })
            .collect()
    }

    /// Visit every stored deadlock consistent with the updated position
    /// sets, sizes ascending, ids ascending within a size. Stops early when
    /// `visit` returns `true`.
    fn scan(
        &self,
        new_boxes: &[Pos],
        new_nboxes: &[Pos],
        ori_boxes: &[Pos],
        ori_nboxes: Option<&[Pos]>,
        storekeeper: Pos,
        visit: &mut dyn FnMut(DlId, &Deadlock) -> bool,
    ) {
        let mut size_to_keys: FxHashMap<usize, Vec<u32>> = FxHashMap::default();
        for b in new_boxes {
            if let Some(sizes) = self.box_keys.get(b) {
                for (&size, &key) in sizes {
                    size_to_keys.entry(size).or_default().push(key);
                }
            }
        }
        for nb in new_nboxes {
            if let Some(sizes) = self.nbox_keys.get(nb) {
                for (&size, &key) in sizes {
                    size_to_keys.entry(size).or_default().push(key);
                }
            }
        }
        if size_to_keys.is_empty() {
            return;
        }

        let mut boxes_set: FxHashSet<Pos> = ori_boxes.iter().copied().collect();
        boxes_set.extend(new_boxes.iter().copied());
        for nb in new_nboxes {
            boxes_set.remove(nb);
        }
        let mut boxes_sorted: Vec<Pos> = boxes_set.iter().copied().collect();
        boxes_sorted.sort_unstable();
        let max_size = boxes_sorted.len();

        let nboxes_set: Option<FxHashSet<Pos>> = ori_nboxes.map(|ori| {
            let mut set: FxHashSet<Pos> = ori.iter().copied().collect();
            set.extend(new_nboxes.iter().copied());
            for b in new_boxes {
                set.remove(b);
            }
            set
        });

        let mut sizes: Vec<(usize, Vec<u32>)> = size_to_keys
            .into_iter()
            .filter(|&(size, _)| size <= max_size)
            .collect();
        sizes.sort_unstable_by_key(|&(size, _)| size);

        for (size, keys) in sizes {
            let candidate_sets: Vec<Vec<DlId>> =
                keys.iter().map(|&key| self.key_deadlocks(key)).collect();
            let total: usize = candidate_sets.iter().map(Vec::len).sum();
            if total < size.saturating_mul(binom(max_size, size)) {
                let mut candidates: Vec<DlId> = candidate_sets.concat();
                candidates.sort_unstable();
                candidates.dedup();
                for id in candidates {
                    let deadlock = self.arena.get(id);
                    if deadlock.check_sets(&boxes_set, nboxes_set.as_ref(), storekeeper)
                        && visit(id, deadlock)
                    {
                        return;
                    }
                }
            } else {
                for combo in boxes_sorted.iter().copied().combinations(size) {
                    let Some(list) = self.boxes_to_dl.get(&combo) else {
                        continue;
                    };
                    for &id in list {
                        let deadlock = self.arena.get(id);
                        if deadlock.sk_component.get(storekeeper)
                            && deadlock.check_not_boxes(&boxes_set, nboxes_set.as_ref())
                            && visit(id, deadlock)
                        {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// First match, with an optional extra condition.
    pub fn find_one(
        &self,
        new_boxes: &[Pos],
        new_nboxes: &[Pos],
        ori_boxes: &[Pos],
        ori_nboxes: Option<&[Pos]>,
        storekeeper: Pos,
        condition: Option<&dyn Fn(&Deadlock) -> bool>,
    ) -> Option<DlId> {
        let mut found = None;
        self.scan(
            new_boxes,
            new_nboxes,
            ori_boxes,
            ori_nboxes,
            storekeeper,
            &mut |id, deadlock| {
                if condition.is_none_or(|cond| cond(deadlock)) {
                    found = Some(id);
                    true
                } else {
                    false
                }
            },
        );
        found
    }

    /// Every match, in scan order.
    pub fn find(
        &self,
        new_boxes: &[Pos],
        new_nboxes: &[Pos],
        ori_boxes: &[Pos],
        ori_nboxes: Option<&[Pos]>,
        storekeeper: Pos,
    ) -> Vec<DlId> {
        let mut out = Vec::new();
        self.scan(
            new_boxes,
            new_nboxes,
            ori_boxes,
            ori_nboxes,
            storekeeper,
            &mut |id, _| {
                out.push(id);
                false
            },
        );
        out
    }

    /// Match a whole state, expressed as the delta from `ori_state` (or from
    /// the trivial all-open state).
    pub fn find_by_state(&self, state: &SokoState, ori_state: Option<&SokoState>) -> Option<DlId> {
        let sub_boxes = &state.sub_boxes;
        let sup_boxes: &Mask = if state.sub_full {
            &state.sub_boxes
        } else {
            &state.sup_boxes
        };
        let (ori_sub, ori_sup): (Mask, Mask) = match ori_state {
            None => (
                Mask::new(state.available.height(), state.available.width()),
                (*state.available).clone(),
            ),
            Some(ori) => (
                ori.sub_boxes.clone(),
                if ori.sub_full {
                    ori.sub_boxes.clone()
                } else {
                    ori.sup_boxes.clone()
                },
            ),
        };
        let ori_boxes = sub_boxes.positions();
        let ori_nboxes = state.available.minus(sup_boxes).positions();
        let new_boxes = sub_boxes.minus(&ori_sub).positions();
        let new_nboxes = ori_sup.minus(sup_boxes).positions();

        let covers_all = |deadlock: &Deadlock| {
            state.storekeepers.is_subset_of(&deadlock.sk_component)
        };
        let condition: Option<&dyn Fn(&Deadlock) -> bool> = if state.multi_component {
            Some(&covers_all)
        } else {
            None
        };
        self.find_one(
            &new_boxes,
            &new_nboxes,
            &ori_boxes,
            Some(&ori_nboxes),
            state.storekeeper,
            condition,
        )
    }

    /// One lookup per prospective action, without building the successor
    /// states (unless the keeper region is split).
    pub fn find_for_actions(
        &self,
        state: &SokoState,
        actions: &[Action],
        fw_mode: bool,
    ) -> Vec<Option<DlId>> {
        let box_moves: Vec<(Pos, Pos, Dir)> = actions
            .iter()
            .map(|action| {
                let src = action.box_pos();
                let dest = action.dir.shift(src);
                let sk_dir = if fw_mode {
                    action.dir.opposite()
                } else {
                    action.dir
                };
                (src, dest, sk_dir)
            })
            .collect();
        self.find_for_box_moves(state, &box_moves)
    }

    pub fn find_for_box_moves(
        &self,
        state: &SokoState,
        box_moves: &[(Pos, Pos, Dir)],
    ) -> Vec<Option<DlId>> {
        if state.multi_component {
            box_moves
                .iter()
                .map(|&(src, dest, sk_dir)| {
                    let mut sub_boxes = state.sub_boxes.clone();
                    sub_boxes.set(src, false);
                    sub_boxes.set(dest, true);
                    let mut sup_boxes = state.sup_boxes.clone();
                    sup_boxes.set(src, false);
                    sup_boxes.set(dest, true);
                    let next = SokoState::with_parts(
                        state.available.clone(),
                        state.storages.clone(),
                        sub_boxes,
                        sup_boxes,
                        sk_dir.shift(dest),
                        None,
                        Some(state.sub_full),
                        state.storekeeper_goal,
                        None,
                    );
                    self.find_by_state(&next, None)
                })
                .collect()
        } else {
            let ori_boxes = state.sub_boxes.positions();
            let ori_nboxes: Option<Vec<Pos>> = if state.sub_full {
                None
            } else {
                Some(state.available.minus(&state.sup_boxes).positions())
            };
            box_moves
                .iter()
                .map(|&(src, dest, sk_dir)| {
                    self.find_one(
                        &[dest],
                        &[src],
                        &ori_boxes,
                        ori_nboxes.as_deref(),
                        sk_dir.shift(dest),
                        None,
                    )
                })
                .collect()
        }
    }
}
