//! Persisted deadlock file format.
//!
//! Plain text, blank lines between records, 0-based coordinates on the wire
//! (converted to padded 1-based positions on load):
//!
//! ```text
//! Deadlock 3
//!   Storekeeper: 1 1, 4 6
//!   Boxes: 2 2, 2 3
//!   Blocked: 3 2
//!   Action 2 3 > -> 1
//! ```
//!
//! Records are grouped into blocks: within one block every descendant
//! reference points at an earlier block or a peer of the same block, so a
//! block is complete once the largest descendant index seen equals the
//! current record index.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::set::DeadlockSet;
use super::{Deadlock, DlId};
use crate::analysis::component::{component, component_split};
use crate::board::direction::Dir;
use crate::board::mask::{Action, Pos};
use crate::board::state::SokoState;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Deadlock (\d+)$").expect("title line pattern"));
static ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Action (\d+) (\d+) (.) -> (\d+)$").expect("action line pattern"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("record {index} out of order")]
    OutOfOrder { index: u32 },
    #[error("unterminated deadlock block at end of file")]
    OpenBlock,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One block of mutually referring records, ready to be wired up.
pub type Block = Vec<(Deadlock, Vec<(Action, u32)>)>;

struct RawRecord {
    index: u32,
    storekeeper: Vec<Pos>,
    boxes: Vec<Pos>,
    blocked: Vec<Pos>,
    actions: Vec<(Action, u32)>,
}

fn parse_positions(
    data: &str,
    line: usize,
    height: usize,
    width: usize,
) -> Result<Vec<Pos>, StoreError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    data.split(',')
        .map(|pair| {
            let mut nums = pair.split_whitespace();
            let (Some(y), Some(x), None) = (nums.next(), nums.next(), nums.next()) else {
                return Err(StoreError::Parse {
                    line,
                    reason: format!("expected 'y x' pair, got '{}'", pair.trim()),
                });
            };
            let parse = |s: &str| {
                s.parse::<usize>().map_err(|_| StoreError::Parse {
                    line,
                    reason: format!("bad coordinate '{}'", s),
                })
            };
            let pos = Pos::new(parse(y)? + 1, parse(x)? + 1);
            if pos.y + 1 >= height || pos.x + 1 >= width {
                return Err(StoreError::Parse {
                    line,
                    reason: format!("position {:?} outside the level", pos),
                });
            }
            Ok(pos)
        })
        .collect()
}

fn parse_labeled(
    line_text: &str,
    line: usize,
    label: &str,
    height: usize,
    width: usize,
) -> Result<Vec<Pos>, StoreError> {
    let Some((found, data)) = line_text.split_once(':') else {
        return Err(StoreError::Parse {
            line,
            reason: format!("expected '{}:' line", label),
        });
    };
    if found.trim() != label {
        return Err(StoreError::Parse {
            line,
            reason: format!("expected label '{}', got '{}'", label, found.trim()),
        });
    }
    parse_positions(data, line, height, width)
}

fn parse_records(text: &str, height: usize, width: usize) -> Result<Vec<RawRecord>, StoreError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|&(_, l)| !l.is_empty())
        .peekable();
    let mut records = Vec::new();
    while let Some((line, text)) = lines.next() {
        let Some(caps) = TITLE_RE.captures(text) else {
            return Err(StoreError::Parse {
                line,
                reason: format!("expected 'Deadlock <n>' line, got '{}'", text),
            });
        };
        let index: u32 = caps[1].parse().map_err(|_| StoreError::Parse {
            line,
            reason: "deadlock index does not fit".into(),
        })?;
        let mut labeled = |label: &str| -> Result<Vec<Pos>, StoreError> {
            let Some((line, text)) = lines.next() else {
                return Err(StoreError::Parse {
                    line: 0,
                    reason: format!("missing '{}:' line at end of file", label),
                });
            };
            parse_labeled(text, line, label, height, width)
        };
        let storekeeper = labeled("Storekeeper")?;
        let boxes = labeled("Boxes")?;
        let blocked = labeled("Blocked")?;
        let mut actions = Vec::new();
        while let Some(&(line, text)) = lines.peek() {
            let Some(caps) = ACTION_RE.captures(text) else {
                break;
            };
            lines.next();
            let num = |i: usize| -> Result<usize, StoreError> {
                caps[i].parse::<usize>().map_err(|_| StoreError::Parse {
                    line,
                    reason: format!("bad action number '{}'", &caps[i]),
                })
            };
            let (y, x) = (num(1)?, num(2)?);
            let dir_char = caps[3].chars().next().expect("regex captures one char");
            let Some(dir) = Dir::from_char(dir_char) else {
                return Err(StoreError::Parse {
                    line,
                    reason: format!("bad direction '{}'", dir_char),
                });
            };
            let descendant: u32 = caps[4].parse().map_err(|_| StoreError::Parse {
                line,
                reason: "descendant index does not fit".into(),
            })?;
            if y + 2 >= height || x + 2 >= width {
                return Err(StoreError::Parse {
                    line,
                    reason: format!("action at {} {} outside the level", y, x),
                });
            }
            actions.push((Action::new(y, x, dir), descendant));
        }
        records.push(RawRecord {
            index,
            storekeeper,
            boxes,
            blocked,
            actions,
        });
    }
    Ok(records)
}

/// Load and group the persisted deadlocks. The keeper component of each
/// record is recomputed over the base level with the record's boxes closed.
pub fn load_blocks(path: &Path, base_state: &SokoState) -> Result<Vec<Block>, StoreError> {
    let (h, w) = (
        base_state.available.height(),
        base_state.available.width(),
    );
    let text = fs::read_to_string(path)?;
    let records = parse_records(&text, h, w)?;

    let mut blocks = Vec::new();
    let mut cur_block: Block = Vec::new();
    let mut next_index = 0u32;
    let mut max_index = 0u32;
    for record in records {
        if record.index != next_index {
            return Err(StoreError::OutOfOrder {
                index: record.index,
            });
        }
        let mut open = (*base_state.available).clone();
        for &b in &record.boxes {
            open.set(b, false);
        }
        let sk_component = component(&open, record.storekeeper.iter().copied());
        let mut deadlock = Deadlock::new(record.boxes, record.blocked, sk_component);
        deadlock.full_index = Some(record.index);
        let record_max = record
            .actions
            .iter()
            .map(|&(_, desc)| desc)
            .max()
            .unwrap_or(max_index);
        max_index = max_index.max(record_max);
        cur_block.push((deadlock, record.actions));
        if max_index == record.index {
            max_index += 1;
            blocks.push(std::mem::take(&mut cur_block));
        }
        next_index += 1;
    }
    if !cur_block.is_empty() {
        return Err(StoreError::OpenBlock);
    }
    Ok(blocks)
}

/// Append one record in wire format. Only full deadlocks are persisted, and
/// all of their descendants are full by the time a block is written.
pub fn write_record<W: Write>(
    w: &mut W,
    deadlock: &Deadlock,
    set: &DeadlockSet,
) -> io::Result<()> {
    let full_index = deadlock
        .full_index
        .expect("only full deadlocks are persisted");
    writeln!(w, "Deadlock {}", full_index)?;
    let keeper_cells = component_split(&deadlock.sk_component)
        .into_iter()
        .map(|(pos, _)| format!("{} {}", pos.y - 1, pos.x - 1))
        .join(", ");
    writeln!(w, "  Storekeeper: {}", keeper_cells)?;
    let fmt_cells =
        |cells: &[Pos]| cells.iter().map(|p| format!("{} {}", p.y - 1, p.x - 1)).join(", ");
    writeln!(w, "  Boxes: {}", fmt_cells(&deadlock.boxes))?;
    writeln!(w, "  Blocked: {}", fmt_cells(&deadlock.not_boxes))?;
    if let Some(descendants) = &deadlock.descendants {
        for &(action, desc) in descendants {
            let desc_index = resolve_full_index(set, desc);
            writeln!(
                w,
                "  Action {} {} {} -> {}",
                action.y,
                action.x,
                action.dir.to_char(),
                desc_index
            )?;
        }
    }
    Ok(())
}

fn resolve_full_index(set: &DeadlockSet, id: DlId) -> u32 {
    set.get(id)
        .full_index
        .expect("descendant of a persisted deadlock is full")
}

/// Rename an unreadable store out of the way; the first free name of
/// `<name>_backup`, `<name>_backup0`, `<name>_backup1`, ... is used.
pub fn backup_corrupted(path: &Path) -> io::Result<PathBuf> {
    let base = format!("{}_backup", path.display());
    let mut candidate = PathBuf::from(&base);
    let mut counter = 0usize;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}{}", base, counter));
        counter += 1;
    }
    fs::rename(path, &candidate)?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::level::decode_level_from_lines;

    fn base_state() -> SokoState {
        SokoState::from_level(
            &decode_level_from_lines(&["######", "#@$ .#", "# $. #", "######"]).unwrap(),
        )
    }

    #[test]
    fn single_record_round_trip() {
        let base = base_state();
        let text = "\nDeadlock 0\n  Storekeeper: 1 1\n  Boxes: 1 2\n  Blocked: \n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        fs::write(&path, text).unwrap();
        let blocks = load_blocks(&path, &base).unwrap();
        assert_eq!(blocks.len(), 1);
        let (deadlock, actions) = &blocks[0][0];
        assert_eq!(deadlock.full_index, Some(0));
        assert_eq!(deadlock.boxes, vec![Pos::new(2, 3)]);
        assert!(actions.is_empty());
        assert!(deadlock.sk_component.get(Pos::new(2, 2)));
    }

    #[test]
    fn blocks_wait_for_their_descendants() {
        let base = base_state();
        let text = "\
Deadlock 0
  Storekeeper: 1 1
  Boxes: 1 2
  Blocked:
  Action 1 2 > -> 1

Deadlock 1
  Storekeeper: 1 1
  Boxes: 1 3
  Blocked:
  Action 1 3 > -> 0
";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        fs::write(&path, text).unwrap();
        let blocks = load_blocks(&path, &base).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 2);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let base = base_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        fs::write(&path, "Deadlock zero\n").unwrap();
        assert!(matches!(
            load_blocks(&path, &base),
            Err(StoreError::Parse { .. })
        ));
        fs::write(&path, "Deadlock 0\n  Storekeeper: 0 0\n").unwrap();
        assert!(matches!(
            load_blocks(&path, &base),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn truncated_blocks_are_rejected() {
        let base = base_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        let text = "Deadlock 0\n  Storekeeper: 0 0\n  Boxes: 0 1\n  Blocked: \n  Action 0 1 > -> 1\n";
        fs::write(&path, text).unwrap();
        assert!(matches!(
            load_blocks(&path, &base),
            Err(StoreError::OpenBlock)
        ));
    }

    #[test]
    fn backups_pick_fresh_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deadlocks");
        fs::write(&path, "junk").unwrap();
        let first = backup_corrupted(&path).unwrap();
        assert!(first.to_string_lossy().ends_with("deadlocks_backup"));
        fs::write(&path, "junk").unwrap();
        let second = backup_corrupted(&path).unwrap();
        assert!(second.to_string_lossy().ends_with("deadlocks_backup0"));
        assert!(first.exists() && second.exists());
    }
}
