//! 后台任务

pub mod reaper;

pub use reaper::{Reaper, ReaperHandle, SweepReport};
