//! Connected-component flood fill and shortest keeper paths.

use std::collections::VecDeque;

use crate::board::direction::{DIRECTIONS, Dir};
use crate::board::mask::{Mask, Pos};

/// 4-connected flood fill of `available` from `starts`. Start cells outside
/// the available region are ignored.
pub fn component(available: &Mask, starts: impl IntoIterator<Item = Pos>) -> Mask {
    let mut res = Mask::new(available.height(), available.width());
    let mut queue: VecDeque<Pos> = starts.into_iter().collect();
    while let Some(pos) = queue.pop_front() {
        if res.get(pos) || !available.get(pos) {
            continue;
        }
        res.set(pos, true);
        for d in DIRECTIONS {
            queue.push_back(d.shift(pos));
        }
    }
    res
}

/// Split a mask into its connected components, each with a representative
/// cell, in row-major order of the representatives.
pub fn component_split(mask: &Mask) -> Vec<(Pos, Mask)> {
    let mut out = Vec::new();
    let mut remaining = mask.clone();
    while let Some(pos) = remaining.first_one() {
        let comp = component(&remaining, [pos]);
        remaining = remaining.minus(&comp);
        out.push((pos, comp));
    }
    out
}

/// Shortest 4-connected path through `available`, as a direction sequence.
pub fn find_path(available: &Mask, start: Pos, end: Pos) -> Option<Vec<Dir>> {
    if !available.get(start) || !available.get(end) {
        return None;
    }
    if start == end {
        return Some(Vec::new());
    }
    let (h, w) = (available.height(), available.width());
    let mut arrival: Vec<Option<Dir>> = vec![None; h * w];
    let mut queue = VecDeque::new();
    queue.push_back(start);
    while let Some(pos) = queue.pop_front() {
        for d in DIRECTIONS {
            let next = d.shift(pos);
            if !available.get(next) || next == start || arrival[next.y * w + next.x].is_some() {
                continue;
            }
            arrival[next.y * w + next.x] = Some(d);
            if next == end {
                let mut path = Vec::new();
                let mut cur = end;
                while cur != start {
                    let d = arrival[cur.y * w + cur.x].expect("arrival chain leads to the start");
                    path.push(d);
                    cur = d.opposite().shift(cur);
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }
    None
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

    #[test]
    fn component_is_shift_closed_and_contains_starts() {
        let available = mask_from(&["#####", "# # #", "# # #", "#   #", "#####"]);
        let starts = [Pos::new(1, 1)];
        let comp = component(&available, starts);
        for start in starts {
            assert!(comp.get(start));
        }
        for pos in comp.positions() {
            for d in DIRECTIONS {
                let next = d.shift(pos);
                assert_eq!(comp.get(next), available.get(next), "at {:?} -> {:?}", pos, next);
            }
        }
        assert_eq!(comp.count_ones(), available.count_ones());
    }

    #[test]
    fn split_finds_separate_components() {
        let available = mask_from(&["#####", "# #.#", "# #.#", "#####"]);
        let comps = component_split(&available);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].0, Pos::new(1, 1));
        assert_eq!(comps[1].0, Pos::new(1, 3));
        assert_eq!(comps[0].1.count_ones(), 2);
    }

    #[test]
    fn find_path_is_shortest() {
        let available = mask_from(&["#####", "#  .#", "#.#.#", "#...#", "#####"]);
        let path = find_path(&available, Pos::new(1, 1), Pos::new(3, 3)).unwrap();
        assert_eq!(path.len(), 4);
        let mut pos = Pos::new(1, 1);
        for d in path {
            pos = d.shift(pos);
            assert!(available.get(pos));
        }
        assert_eq!(pos, Pos::new(3, 3));
    }

    #[test]
    fn find_path_detects_unreachable_targets() {
        let available = mask_from(&["#####", "#.#.#", "#####"]);
        assert!(find_path(&available, Pos::new(1, 1), Pos::new(1, 3)).is_none());
        assert_eq!(
            find_path(&available, Pos::new(1, 1), Pos::new(1, 1)),
            Some(vec![])
        );
    }
}
