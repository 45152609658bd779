//! XSB level model, decoding and encoding.
//!
//! Level sets are plain text in the `windows-1250` encoding; the cell
//! alphabet itself is ASCII, so decoding works on raw bytes and any line
//! containing a byte outside the alphabet acts as a level separator.

use std::fs;
use std::path::Path;

use bitflags::bitflags;
use thiserror::Error;

use super::mask::{Mask, Pos};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cell: u8 {
        const WALL = 1;
        const STORAGE = 2;
        const BOX = 4;
        const KEEPER = 8;
    }
}

impl Cell {
    pub fn from_char(c: char) -> Option<Cell> {
        match c {
            ' ' => Some(Cell::empty()),
            '#' => Some(Cell::WALL),
            '.' => Some(Cell::STORAGE),
            '$' => Some(Cell::BOX),
            '*' => Some(Cell::STORAGE | Cell::BOX),
            '@' => Some(Cell::KEEPER),
            '+' => Some(Cell::STORAGE | Cell::KEEPER),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        if self.contains(Cell::WALL) {
            '#'
        } else if self.contains(Cell::STORAGE | Cell::BOX) {
            '*'
        } else if self.contains(Cell::STORAGE | Cell::KEEPER) {
            '+'
        } else if self.contains(Cell::BOX) {
            '$'
        } else if self.contains(Cell::KEEPER) {
            '@'
        } else if self.contains(Cell::STORAGE) {
            '.'
        } else {
            ' '
        }
    }
}

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level has no rows")]
    Empty,
    #[error("level has {boxes} boxes but {storages} storages")]
    CountMismatch { boxes: usize, storages: usize },
    #[error("level has no boxes")]
    NoBoxes,
    #[error("level is already solved")]
    AlreadySolved,
    #[error("level must have exactly one storekeeper, found {0}")]
    KeeperCount(usize),
    #[error("storekeeper starts on a wall or box")]
    KeeperBlocked,
    #[error("level {index}: {source}")]
    InLevel {
        index: usize,
        source: Box<LevelError>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One parsed level. Masks are unpadded (`height x width`); the storekeeper
/// position is 0-based within the same grid.
pub struct SokobanLevel {
    pub walls: Mask,
    pub storages: Mask,
    pub boxes: Mask,
    pub storekeeper: Pos,
    pub height: usize,
    pub width: usize,
}

impl SokobanLevel {
    pub fn new(
        walls: Mask,
        storages: Mask,
        boxes: Mask,
        storekeeper: Pos,
    ) -> Result<SokobanLevel, LevelError> {
        let (h, w) = (walls.height(), walls.width());
        if h == 0 || w == 0 {
            return Err(LevelError::Empty);
        }
        let box_count = boxes.count_ones();
        let storage_count = storages.count_ones();
        if box_count != storage_count {
            return Err(LevelError::CountMismatch {
                boxes: box_count,
                storages: storage_count,
            });
        }
        if box_count == 0 {
            return Err(LevelError::NoBoxes);
        }
        if boxes == storages {
            return Err(LevelError::AlreadySolved);
        }
        if walls.get(storekeeper) || boxes.get(storekeeper) {
            return Err(LevelError::KeeperBlocked);
        }
        Ok(SokobanLevel {
            walls,
            storages,
            boxes,
            storekeeper,
            height: h,
            width: w,
        })
    }
}

pub fn decode_level_from_lines<S: AsRef<str>>(lines: &[S]) -> Result<SokobanLevel, LevelError> {
    if lines.is_empty() {
        return Err(LevelError::Empty);
    }
    let h = lines.len();
    let w = lines
        .iter()
        .map(|l| l.as_ref().chars().count())
        .max()
        .unwrap_or(0);
    if w == 0 {
        return Err(LevelError::Empty);
    }
    let mut walls = Mask::new(h, w);
    let mut storages = Mask::new(h, w);
    let mut boxes = Mask::new(h, w);
    let mut keepers = Vec::new();
    for (y, line) in lines.iter().enumerate() {
        for (x, c) in line.as_ref().chars().enumerate() {
            // rows are right-padded with empty cells up to the level width
            let cell = Cell::from_char(c).unwrap_or(Cell::empty());
            let pos = Pos::new(y, x);
            if cell.contains(Cell::WALL) {
                walls.set(pos, true);
            }
            if cell.contains(Cell::STORAGE) {
                storages.set(pos, true);
            }
            if cell.contains(Cell::BOX) {
                boxes.set(pos, true);
            }
            if cell.contains(Cell::KEEPER) {
                keepers.push(pos);
            }
        }
    }
    if keepers.len() != 1 {
        return Err(LevelError::KeeperCount(keepers.len()));
    }
    SokobanLevel::new(walls, storages, boxes, keepers[0])
}

pub fn encode_level_to_lines(level: &SokobanLevel) -> Vec<String> {
    (0..level.height)
        .map(|y| {
            (0..level.width)
                .map(|x| {
                    let pos = Pos::new(y, x);
                    let mut cell = Cell::empty();
                    if level.walls.get(pos) {
                        cell |= Cell::WALL;
                    }
                    if level.storages.get(pos) {
                        cell |= Cell::STORAGE;
                    }
                    if level.boxes.get(pos) {
                        cell |= Cell::BOX;
                    }
                    if pos == level.storekeeper {
                        cell |= Cell::KEEPER;
                    }
                    cell.to_char()
                })
                .collect()
        })
        .collect()
}

fn is_level_line(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| Cell::from_char(c).is_some())
}

/// Load every level of an XSB file; blank (or unparseable) lines separate
/// levels.
pub fn load_xsb_levels(path: &Path) -> Result<Vec<SokobanLevel>, LevelError> {
    let bytes = fs::read(path)?;
    // windows-1250 shares its ASCII plane with the level alphabet; anything
    // above 0x7f cannot be a level character, so lossy decoding is exact here.
    let text = String::from_utf8_lossy(&bytes);
    let mut levels = Vec::new();
    let mut level_lines: Vec<String> = Vec::new();
    let flush =
        |level_lines: &mut Vec<String>, levels: &mut Vec<SokobanLevel>| -> Result<(), LevelError> {
            if level_lines.is_empty() {
                return Ok(());
            }
            let level =
                decode_level_from_lines(level_lines).map_err(|err| LevelError::InLevel {
                    index: levels.len() + 1,
                    source: Box::new(err),
                })?;
            levels.push(level);
            level_lines.clear();
            Ok(())
        };
    for raw in text.lines() {
        let line = raw.trim_end();
        if is_level_line(line) {
            level_lines.push(line.to_string());
        } else {
            flush(&mut level_lines, &mut levels)?;
        }
    }
    flush(&mut level_lines, &mut levels)?;
    Ok(levels)
}
