pub mod directory;
pub mod job;
pub mod outcome;
pub mod record;
pub mod summary;
pub mod unit;
