//! Grid primitives and the generalized Sokoban state.

pub mod direction;
pub mod level;
pub mod mask;
pub mod state;

pub use direction::{DIRECTIONS, Dir};
pub use level::{LevelError, SokobanLevel, load_xsb_levels};
pub use mask::{Action, DirGrid, Mask, Pos};
pub use state::{SokoState, StateError, dual_action};
