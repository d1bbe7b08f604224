// Game rules: rooms, picks, elimination, deals, and rematches.

pub mod deal;
pub mod elimination;
pub mod pick;
pub mod rematch;
pub mod result;
pub mod room;
pub mod team;
