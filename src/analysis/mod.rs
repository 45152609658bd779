//! Reachability kernel: flood fills, jump maps and the search heuristic.

pub mod component;
pub mod heuristic;
pub mod jump;

pub use component::{component, component_split, find_path};
pub use heuristic::storage_heuristic;
pub use jump::{BoxJumps, JumpMap, find_all_box_jumps, find_box_jumps};
