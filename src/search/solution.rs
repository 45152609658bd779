//! Solution logs: keeper moves and push sequences.
//!
//! On a solved forward position the driver writes two files into the
//! level's var directory: `moves.txt`, one LURD string with pushes in
//! uppercase, and `actions.txt`, one wire-format push per line.

use std::fs;
use std::io;
use std::path::Path;

use super::move_stack::MoveStack;
use crate::analysis::component::find_path;
use crate::board::direction::Dir;

/// Reconstruct the full keeper walk up to the cursor, one `(direction,
/// is_push)` pair per keeper step. Only meaningful in forward mode.
pub fn keeper_moves(stack: &MoveStack) -> Option<Vec<(Dir, bool)>> {
    if !stack.fw_mode() {
        return None;
    }
    let mut out = Vec::new();
    for i in 0..stack.cur_move_i() {
        let state = stack.base_state_at(i);
        let action = stack.move_at(i);
        let target = action.dir.opposite().shift(action.box_pos());
        let open = state.available.minus(&state.sub_boxes);
        let walk = find_path(&open, state.storekeeper, target)?;
        out.extend(walk.into_iter().map(|d| (d, false)));
        out.push((action.dir, true));
    }
    Some(out)
}

/// Write the move and action logs; returns `(pushes, moves)` counts, or
/// `None` in backward mode.
pub fn write_solution(dir: &Path, stack: &MoveStack) -> io::Result<Option<(usize, usize)>> {
    let Some(moves) = keeper_moves(stack) else {
        return Ok(None);
    };
    fs::create_dir_all(dir)?;
    let mut lurd: String = moves.iter().map(|&(d, push)| d.move_char(push)).collect();
    lurd.push('\n');
    fs::write(dir.join("moves.txt"), lurd)?;
    let mut actions_text = String::new();
    for i in 0..stack.cur_move_i() {
        let action = stack.move_at(i);
        actions_text.push_str(&format!(
            "{} {} {}\n",
            action.y,
            action.x,
            action.dir.to_char()
        ));
    }
    fs::write(dir.join("actions.txt"), actions_text)?;
    Ok(Some((stack.cur_move_i(), moves.len())))
}
