pub mod calendar;
pub mod carryover;
pub mod expansion;
pub mod holidays;
pub mod mirror;
pub mod planner;
pub mod regeneration;
pub mod sync;
