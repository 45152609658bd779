//! Wall-following jump maps and box-jump reachability.
//!
//! The jump map stores, for every available cell and entry direction, the
//! next direction of the wall-following cycle that keeps the wall on the
//! left. Walking the cycle around a box cell enumerates the keeper-accessible
//! sides of the box without flooding the whole keeper region, which makes
//! enumerating multi-push box destinations cheap.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::board::direction::{DIRECTIONS, Dir};
use crate::board::mask::{Action, DirGrid, Mask, Pos};

#[derive(Clone)]
pub struct JumpMap {
    jumps: DirGrid<Option<Dir>>,
}

impl JumpMap {
    pub fn create(available: &Mask) -> JumpMap {
        let (h, w) = (available.height(), available.width());
        let mut map = JumpMap {
            jumps: DirGrid::new(h, w),
        };
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let pos = Pos::new(y, x);
                if !available.get(pos) {
                    continue;
                }
                for d in DIRECTIONS {
                    if map.jumps.get(pos, d).is_none() {
                        map.trace_wall(available, pos, d);
                    }
                }
            }
        }
        map
    }

    /// Record the wall-following cycle through `(start, start_d)`. Every
    /// (cell, direction) visit on the cycle gets its successor direction.
    fn trace_wall(&mut self, available: &Mask, start: Pos, start_d: Dir) {
        let mut visited: FxHashMap<Pos, SmallVec<[Dir; 4]>> = FxHashMap::default();
        let mut pos = start;
        let mut d = start_d;
        loop {
            visited.entry(pos).or_default().push(d);
            let ahead = d.shift(pos);
            if !available.get(ahead) {
                d = d.turn_right();
            } else {
                pos = ahead;
                d = d.turn_left();
            }
            if pos == start && d == start_d {
                break;
            }
        }
        for (pos, ds) in visited {
            for i in 0..ds.len() {
                self.jumps.set(pos, ds[i], Some(ds[(i + 1) % ds.len()]));
            }
        }
    }

    /// Open one cell; cost is proportional to the perimeter of the affected
    /// region.
    pub fn add_avail(&mut self, pos: Pos, available: &mut Mask) {
        available.set(pos, true);
        for d in DIRECTIONS {
            if self.jumps.get(pos, d).is_none() {
                self.trace_wall(available, pos, d);
            }
        }
    }

    /// Close one cell again; neighboring cycles are re-traced.
    pub fn remove_avail(&mut self, pos: Pos, available: &mut Mask) {
        available.set(pos, false);
        self.jumps.fill_pos(pos, None);
        for d in DIRECTIONS {
            let neighbor = d.shift(pos);
            if available.get(neighbor) {
                self.trace_wall(available, neighbor, d.opposite());
            }
        }
    }

    /// The cycle of keeper-accessible sides of a box at `pos`, starting from
    /// the side `ori` the keeper currently occupies.
    pub fn accessible_sides(&self, pos: Pos, ori: Dir) -> SmallVec<[Dir; 4]> {
        let mut out = SmallVec::new();
        let mut d = ori;
        loop {
            out.push(d);
            let next = self
                .jumps
                .get(pos, d)
                .expect("jump map entry missing for an available cell");
            d = next.turn_left();
            if d == ori {
                break;
            }
        }
        out
    }

    #[cfg(test)]
    fn entry(&self, pos: Pos, d: Dir) -> Option<Dir> {
        self.jumps.get(pos, d)
    }
}

/// Result of a box-jump reachability sweep: one node per (cell, keeper-side)
/// pair reached by a sequence of valid pushes or pulls.
pub struct BoxJumps {
    fw_mode: bool,
    first: DirGrid<Option<Dir>>,
    dist: DirGrid<i32>,
    prev: DirGrid<Option<(Pos, Dir)>>,
    cells: usize,
}

impl BoxJumps {
    pub fn visited(&self, pos: Pos, side: Dir) -> bool {
        self.dist.get(pos, side) >= 0
    }

    /// Keeper side of the start node this node was first reached from.
    pub fn first_dir(&self, pos: Pos, side: Dir) -> Option<Dir> {
        self.first.get(pos, side)
    }

    /// Keeper side at arrival; present exactly for visited nodes.
    pub fn last_dir(&self, pos: Pos, side: Dir) -> Option<Dir> {
        if self.visited(pos, side) { Some(side) } else { None }
    }

    pub fn dist(&self, pos: Pos, side: Dir) -> Option<i32> {
        let d = self.dist.get(pos, side);
        if d >= 0 { Some(d) } else { None }
    }

    /// Number of distinct cells the box can occupy (including its start).
    pub fn cells_visited(&self) -> usize {
        self.cells
    }

    /// Reconstruct a minimal push (or pull) sequence ending in the node
    /// `(dest, last_side)`.
    pub fn pushes_to(&self, dest: Pos, last_side: Dir) -> Option<Vec<Action>> {
        if !self.visited(dest, last_side) {
            return None;
        }
        let mut out = Vec::new();
        let mut node = (dest, last_side);
        while let Some((pos, side)) = self.prev.get(node.0, node.1) {
            let dir = if self.fw_mode { side.opposite() } else { side };
            out.push(Action::from_box_pos(pos, dir));
            node = (pos, side);
        }
        out.reverse();
        Some(out)
    }
}

/// BFS over (cell, keeper-side) nodes. `starts` lists the sides of the box
/// the keeper can reach; `clear` is the available region without boxes but
/// with the moving box's own cell opened. Returns `None` when nothing is
/// reachable.
pub fn find_box_jumps(
    jump_map: &JumpMap,
    clear: &Mask,
    starts: &[(Pos, Dir)],
    fw_mode: bool,
) -> Option<BoxJumps> {
    let (h, w) = (clear.height(), clear.width());
    let mut jumps = BoxJumps {
        fw_mode,
        first: DirGrid::new(h, w),
        dist: DirGrid::filled(h, w, -1),
        prev: DirGrid::new(h, w),
        cells: 0,
    };
    let mut cell_seen = Mask::new(h, w);
    let mut queue: VecDeque<(i32, Pos, Dir, Dir, Option<(Pos, Dir)>)> = starts
        .iter()
        .map(|&(pos, d)| (0, pos, d, d, None))
        .collect();
    while let Some((dist, pos, side, first, prev)) = queue.pop_front() {
        if jumps.visited(pos, side) {
            continue;
        }
        jumps.dist.set(pos, side, dist);
        jumps.first.set(pos, side, Some(first));
        jumps.prev.set(pos, side, prev);
        if !cell_seen.get(pos) {
            cell_seen.set(pos, true);
            jumps.cells += 1;
        }
        let next_pos = if fw_mode {
            // keeper on side `side` pushes the box the other way
            let next = side.opposite().shift(pos);
            if !clear.get(next) {
                continue;
            }
            next
        } else {
            // the box is pulled onto the keeper cell; the keeper retreats
            let next = side.shift(pos);
            if !clear.get(side.shift(next)) {
                continue;
            }
            next
        };
        for next_side in jump_map.accessible_sides(next_pos, side) {
            queue.push_back((dist + 1, next_pos, next_side, first, Some((pos, side))));
        }
    }
    if jumps.cells == 0 { None } else { Some(jumps) }
}

/// Run `find_box_jumps` for every present box, temporarily opening its own
/// cell. Boxes that cannot leave their cell are skipped.
pub fn find_all_box_jumps(
    clear: &mut Mask,
    boxes: &Mask,
    component: &Mask,
    fw_mode: bool,
    jump_map: &mut JumpMap,
) -> Vec<(Pos, BoxJumps)> {
    let mut out = Vec::new();
    for pos in boxes.positions() {
        let starts: SmallVec<[(Pos, Dir); 4]> = DIRECTIONS
            .into_iter()
            .filter(|d| component.get(d.shift(pos)))
            .map(|d| (pos, d))
            .collect();
        if starts.is_empty() {
            continue;
        }
        jump_map.add_avail(pos, clear);
        if let Some(jumps) = find_box_jumps(jump_map, clear, &starts, fw_mode) {
            if jumps.cells_visited() > 1 {
                out.push((pos, jumps));
            }
        }
        jump_map.remove_avail(pos, clear);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Mask {
        let mut mask = Mask::new(rows.len(), rows[0].len());
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                if c != '#' {
                    mask.set(Pos::new(y, x), true);
                }
            }
        }
        mask
    }

    fn maps_equal(a: &JumpMap, b: &JumpMap, available: &Mask) -> bool {
        for pos in available.iter_ones() {
            for d in DIRECTIONS {
                if a.entry(pos, d) != b.entry(pos, d) {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn every_available_cell_is_covered() {
        let available = mask_from(&["#####", "#   #", "# # #", "#   #", "#####"]);
        let map = JumpMap::create(&available);
        for pos in available.iter_ones() {
            for d in DIRECTIONS {
                assert!(map.entry(pos, d).is_some(), "{:?} {:?}", pos, d);
            }
        }
    }

    #[test]
    fn add_and_remove_restore_the_map() {
        let rows = ["######", "#    #", "#  # #", "#    #", "######"];
        let available = mask_from(&rows);
        let map = JumpMap::create(&available);
        let mut working = available.clone();
        let mut incremental = map.clone();
        let cell = Pos::new(2, 3);
        incremental.add_avail(cell, &mut working);
        let opened = JumpMap::create(&working);
        assert!(maps_equal(&incremental, &opened, &working));
        incremental.remove_avail(cell, &mut working);
        assert_eq!(working, available);
        assert!(maps_equal(&incremental, &map, &available));
    }

    #[test]
    fn corridor_box_jumps_reach_the_far_end() {
        // keeper left of the box; the box can be pushed to the right wall
        let mut clear = mask_from(&["#######", "#     #", "#######"]);
        let box_pos = Pos::new(1, 3);
        clear.set(box_pos, false);
        let mut jump_map = JumpMap::create(&clear);
        jump_map.add_avail(box_pos, &mut clear);
        let starts = [(box_pos, Dir::Left)];
        let jumps = find_box_jumps(&jump_map, &clear, &starts, true).unwrap();
        assert!(jumps.visited(Pos::new(1, 5), Dir::Left));
        assert_eq!(jumps.dist(Pos::new(1, 5), Dir::Left), Some(2));
        // the wall behind the keeper blocks pushes to the left
        assert!(!jumps.visited(Pos::new(1, 2), Dir::Right));
        let pushes = jumps.pushes_to(Pos::new(1, 5), Dir::Left).unwrap();
        assert_eq!(
            pushes,
            vec![
                Action::new(0, 2, Dir::Right),
                Action::new(0, 3, Dir::Right),
            ]
        );
    }

    #[test]
    fn open_room_lets_the_keeper_walk_around() {
        let mut clear = mask_from(&["######", "#    #", "#    #", "#    #", "######"]);
        let box_pos = Pos::new(2, 2);
        clear.set(box_pos, false);
        let component = clear.clone();
        let mut jump_map = JumpMap::create(&clear);
        let mut boxes = Mask::new(clear.height(), clear.width());
        boxes.set(box_pos, true);
        let all = find_all_box_jumps(&mut clear, &boxes, &component, true, &mut jump_map);
        let (pos, jumps) = &all[0];
        assert_eq!(*pos, box_pos);
        // the keeper can reach every side, so every open cell is reachable
        assert_eq!(jumps.cells_visited(), 12);
    }
}
