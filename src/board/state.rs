//! The generalized Sokoban state.
//!
//! A `SokoState` describes a family of concrete configurations through a
//! lower bound `sub_boxes` and an upper bound `sup_boxes` on the box set: a
//! concrete configuration `C` is represented iff
//! `sub_boxes ⊆ C.boxes ⊆ sup_boxes`. The keeper is tracked as a whole
//! reachable region (`storekeepers`) plus one representative cell.

use std::rc::Rc;

use thiserror::Error;

use super::direction::DIRECTIONS;
use super::level::SokobanLevel;
use super::mask::{Action, DirGrid, Mask, Pos};
use crate::analysis::component::{component, component_split};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("illegal move {action:?} (forward mode: {fw_mode})")]
    IllegalMove { action: Action, fw_mode: bool },
    #[error("bounds do not generalize the current state")]
    NotAGeneralization,
    #[error("storekeeper cell {0:?} is outside the reachable region")]
    UnreachableStorekeeper(Pos),
}

#[derive(Clone)]
pub struct SokoState {
    /// Original size, without the added border.
    pub height: usize,
    pub width: usize,
    /// Complement of walls; constant throughout a level.
    pub available: Rc<Mask>,
    /// Target cells; constant throughout a level.
    pub storages: Rc<Mask>,
    /// Boxes known to be present.
    pub sub_boxes: Mask,
    /// Positions that may still contain a box.
    pub sup_boxes: Mask,
    /// Keeper-reachable region (possibly several components).
    pub storekeepers: Mask,
    /// Representative keeper cell inside `storekeepers`.
    pub storekeeper: Pos,
    /// Target keeper cell, for dual (backward) play.
    pub storekeeper_goal: Option<Pos>,
    /// All boxes are represented by `sub_boxes`.
    pub sub_full: bool,
    /// `storekeepers` consists of more than one component.
    pub multi_component: bool,
}

impl SokoState {
    pub(crate) fn with_parts(
        available: Rc<Mask>,
        storages: Rc<Mask>,
        sub_boxes: Mask,
        sup_boxes: Mask,
        storekeeper: Pos,
        storekeepers: Option<Mask>,
        sub_full: Option<bool>,
        storekeeper_goal: Option<Pos>,
        multi_component: Option<bool>,
    ) -> SokoState {
        let (h, w) = (available.height(), available.width());
        let (storekeepers, multi_component) = match storekeepers {
            None => (
                component(&available.minus(&sub_boxes), [storekeeper]),
                Some(false),
            ),
            Some(sks) => (sks, multi_component),
        };
        let multi_component = multi_component.unwrap_or_else(|| match storekeepers.first_one() {
            None => false,
            Some(pos) => component(&storekeepers, [pos]) != storekeepers,
        });
        let sub_full =
            sub_full.unwrap_or_else(|| sub_boxes.count_ones() == storages.count_ones());
        SokoState {
            height: h - 2,
            width: w - 2,
            available,
            storages,
            sub_boxes,
            sup_boxes,
            storekeepers,
            storekeeper,
            storekeeper_goal,
            sub_full,
            multi_component,
        }
    }

    /// Initial forward state: all boxes visible, every cell may hold one.
    pub fn from_level(level: &SokobanLevel) -> SokoState {
        let (available, boxes, storages) = pad_level_masks(level);
        let storekeeper = Pos::new(level.storekeeper.y + 1, level.storekeeper.x + 1);
        let available = Rc::new(available);
        let sup_boxes = (*available).clone();
        SokoState::with_parts(
            Rc::clone(&available),
            Rc::new(storages),
            boxes,
            sup_boxes,
            storekeeper,
            None,
            Some(true),
            None,
            None,
        )
    }

    /// Dual state for backward play: boxes start on the storages and are
    /// pulled towards the original box cells; the keeper must end in the
    /// component of its original cell.
    pub fn dual_from_level(level: &SokobanLevel) -> SokoState {
        let (available, ori_boxes, ori_storages) = pad_level_masks(level);
        let boxes = ori_storages;
        let storages = ori_boxes;
        let mut keeper_seeds = Mask::new(available.height(), available.width());
        for d in DIRECTIONS {
            keeper_seeds = &keeper_seeds | &boxes.shifted(d);
        }
        let storekeepers = component(&available.minus(&boxes), keeper_seeds.iter_ones());
        let max_component = component_split(&storekeepers)
            .into_iter()
            .map(|(_, comp)| comp)
            .max_by_key(Mask::count_ones)
            .expect("dual state has at least one keeper component");
        let storekeeper = (&keeper_seeds & &max_component)
            .first_one()
            .expect("keeper seeds intersect the largest component");
        let goal = Pos::new(level.storekeeper.y + 1, level.storekeeper.x + 1);
        let available = Rc::new(available);
        let sup_boxes = (*available).clone();
        SokoState::with_parts(
            Rc::clone(&available),
            Rc::new(storages),
            boxes,
            sup_boxes,
            storekeeper,
            Some(storekeepers),
            Some(true),
            Some(goal),
            None,
        )
    }

    /// Legal pushes (forward) or pulls (backward). A push `(y, x, d)` is
    /// legal iff a box is present at the padded cell (or the upper mask
    /// permits one there and forbids one at the destination), the keeper can
    /// reach the cell on the anti-direction side, and the destination is
    /// available and empty.
    pub fn action_mask(&self, fw_mode: bool) -> DirGrid<bool> {
        let dest_base = self.available.minus(&self.sub_boxes);
        let mut mask = DirGrid::new(self.available.height(), self.available.width());
        for d in DIRECTIONS {
            let mut has_box = self.sub_boxes.clone();
            if !self.sub_full {
                let hidden = &self.sup_boxes & &(!&self.sup_boxes).shifted(d.opposite());
                has_box = &has_box | &hidden;
            }
            let (sk_reachable, dest_available) = if fw_mode {
                (
                    self.storekeepers.shifted(d),
                    dest_base.shifted(d.opposite()),
                )
            } else {
                (
                    self.storekeepers.shifted(d.opposite()),
                    dest_base.shifted(d.opposite()).shifted(d.opposite()),
                )
            };
            let legal = &(&sk_reachable & &dest_available) & &has_box;
            for pos in legal.iter_ones() {
                mask.set(pos, d, true);
            }
        }
        mask
    }

    /// Execute one push (forward) or pull (backward).
    pub fn move_box(&self, action: Action, fw_mode: bool) -> Result<SokoState, StateError> {
        let illegal = || StateError::IllegalMove { action, fw_mode };
        let box_pos = action.box_pos();
        if box_pos.y + 1 >= self.available.height() || box_pos.x + 1 >= self.available.width() {
            return Err(illegal());
        }
        let d = action.dir;
        let box_dest = d.shift(box_pos);
        if self.sub_boxes.get(box_dest) || !self.available.get(box_dest) {
            return Err(illegal());
        }
        if !(self.sub_boxes.get(box_pos)
            || (self.sup_boxes.get(box_pos) && !self.sup_boxes.get(box_dest)))
        {
            return Err(illegal());
        }
        let storekeeper = if fw_mode {
            if !self.storekeepers.get(d.opposite().shift(box_pos)) {
                return Err(illegal());
            }
            box_pos
        } else {
            if !self.storekeepers.get(box_dest) {
                return Err(illegal());
            }
            d.shift(box_dest)
        };
        let mut sub_boxes = self.sub_boxes.clone();
        sub_boxes.set(box_pos, false);
        sub_boxes.set(box_dest, true);
        let mut sup_boxes = self.sup_boxes.clone();
        sup_boxes.set(box_pos, false);
        sup_boxes.set(box_dest, true);
        Ok(SokoState::with_parts(
            Rc::clone(&self.available),
            Rc::clone(&self.storages),
            sub_boxes,
            sup_boxes,
            storekeeper,
            None,
            None,
            self.storekeeper_goal,
            None,
        ))
    }

    /// Weaken the bounds. The new lower bound must shrink and (unless
    /// `sub_full`) the new upper bound must grow.
    pub fn generalize(
        &self,
        sub_boxes: Mask,
        sup_boxes: Mask,
        storekeepers: Option<Mask>,
    ) -> Result<SokoState, StateError> {
        if !sub_boxes.is_subset_of(&self.sub_boxes) {
            return Err(StateError::NotAGeneralization);
        }
        if !self.sub_full && !self.sup_boxes.is_subset_of(&sup_boxes) {
            return Err(StateError::NotAGeneralization);
        }
        let storekeepers = match storekeepers {
            Some(sks) => sks,
            None => {
                if sub_boxes == self.sub_boxes {
                    self.storekeepers.clone()
                } else {
                    component(
                        &self.available.minus(&sub_boxes),
                        self.storekeepers.iter_ones(),
                    )
                }
            }
        };
        Ok(SokoState::with_parts(
            Rc::clone(&self.available),
            Rc::clone(&self.storages),
            sub_boxes,
            sup_boxes,
            self.storekeeper,
            Some(storekeepers),
            None,
            self.storekeeper_goal,
            Some(self.multi_component),
        ))
    }

    /// Partial-order predicate: `other` represents every configuration that
    /// `self` represents.
    pub fn is_generalized_by(&self, other: &SokoState) -> bool {
        other.sub_boxes.is_subset_of(&self.sub_boxes)
            && (self.sub_full || self.sup_boxes.is_subset_of(&other.sup_boxes))
            && self.storekeepers.is_subset_of(&other.storekeepers)
    }

    pub fn is_solved(&self) -> bool {
        self.is_solved_for(&self.storages, self.storekeeper_goal)
    }

    pub fn is_solved_for(&self, storages: &Mask, storekeeper_goal: Option<Pos>) -> bool {
        if let Some(goal) = storekeeper_goal {
            if !self.storekeepers.get(goal) {
                return false;
            }
        }
        self.sub_boxes.is_subset_of(storages) && storages.is_subset_of(&self.sup_boxes)
    }

    /// Partial credit for boxes settled on storages, counting a possibly
    /// present box as half.
    pub fn score(&self) -> f64 {
        let sub = (&self.sub_boxes & &self.storages).count_ones();
        let sup = (&self.sup_boxes & &self.storages).count_ones();
        (sub + sup) as f64 / 2.0
    }

    pub fn set_storekeeper(&self, storekeeper: Pos) -> Result<SokoState, StateError> {
        if !self.storekeepers.get(storekeeper) {
            return Err(StateError::UnreachableStorekeeper(storekeeper));
        }
        let mut state = self.clone();
        state.storekeeper = storekeeper;
        Ok(state)
    }
}

/// The same box move seen from the other play direction.
pub fn dual_action(action: Action) -> Action {
    Action::from_box_pos(action.dir.shift(action.box_pos()), action.dir.opposite())
}

fn pad_level_masks(level: &SokobanLevel) -> (Mask, Mask, Mask) {
    let (h, w) = (level.height + 2, level.width + 2);
    let mut available = Mask::new(h, w);
    let mut boxes = Mask::new(h, w);
    let mut storages = Mask::new(h, w);
    for y in 0..level.height {
        for x in 0..level.width {
            let src = Pos::new(y, x);
            let dst = Pos::new(y + 1, x + 1);
            available.set(dst, !level.walls.get(src));
            boxes.set(dst, level.boxes.get(src));
            storages.set(dst, level.storages.get(src));
        }
    }
    (available, boxes, storages)
}
