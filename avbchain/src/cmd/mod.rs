mod pack;
mod unpack;

pub use pack::{PackSummary, pack};
pub use unpack::{UnpackSummary, unpack};
