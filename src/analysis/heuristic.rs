//! Storage-reachability heuristic.
//!
//! Scores an action non-zero iff, after the push, the box can still be
//! walked to some free storage by a sequence of pushes from the keeper side
//! the push ends on. The scores feed `choose_action` as softmax logits.

use crate::analysis::jump::{JumpMap, find_all_box_jumps, find_box_jumps};
use crate::board::direction::DIRECTIONS;
use crate::board::mask::{DirGrid, Mask, Pos};
use crate::board::state::SokoState;

const TO_STORAGE_SCORE: f64 = 2.0;

pub fn storage_heuristic(state: &SokoState, fw_mode: bool) -> DirGrid<f64> {
    storage_heuristic_for(state, fw_mode, &state.storages)
}

pub fn storage_heuristic_for(state: &SokoState, fw_mode: bool, storages: &Mask) -> DirGrid<f64> {
    let (h, w) = (state.available.height(), state.available.width());
    let mut cur_avail = state.available.minus(&state.sub_boxes);
    let mut jump_map = JumpMap::create(&cur_avail);

    // backward sweep: from which (cell, push direction) nodes is a free
    // storage reachable?
    let mut starts = Vec::new();
    for stor in storages.minus(&state.sub_boxes).iter_ones() {
        for d in DIRECTIONS {
            let keeper = if fw_mode {
                d.shift(stor)
            } else {
                d.opposite().shift(stor)
            };
            if state.storekeepers.get(keeper) {
                starts.push((stor, d));
            }
        }
    }
    let storage_jumps = find_box_jumps(&jump_map, &cur_avail, &starts, !fw_mode);

    let mut reaches = DirGrid::<bool>::new(h, w);
    if let Some(jumps) = &storage_jumps {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let pos = Pos::new(y, x);
                for d in DIRECTIONS {
                    if jumps.visited(pos, d.opposite()) {
                        reaches.set(pos, d, true);
                    }
                }
            }
        }
    }

    // forward sweep per box overrides the box cells with exact reachability
    let box_jumps = find_all_box_jumps(
        &mut cur_avail,
        &state.sub_boxes,
        &state.storekeepers,
        fw_mode,
        &mut jump_map,
    );
    for (box_pos, jumps) in &box_jumps {
        reaches.fill_pos(*box_pos, false);
        if storages.get(*box_pos) {
            continue;
        }
        for d in DIRECTIONS {
            // the stored first direction is the keeper side of the start
            // node; for a push that is the anti-direction of the push itself
            let want = if fw_mode { d.opposite() } else { d };
            let hit = storages.iter_ones().any(|stor| {
                DIRECTIONS
                    .into_iter()
                    .any(|side| jumps.first_dir(stor, side) == Some(want))
            });
            if hit {
                reaches.set(*box_pos, d, true);
            }
        }
    }

    let mut scores = DirGrid::<f64>::new(h, w);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let pos = Pos::new(y, x);
            for d in DIRECTIONS {
                if reaches.get(pos, d) {
                    scores.set(pos, d, TO_STORAGE_SCORE);
                }
            }
        }
    }
    scores
}
