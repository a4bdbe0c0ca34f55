pub mod enums;
pub mod turn;

pub use enums::{Emotion, Role};
pub use turn::Turn;
