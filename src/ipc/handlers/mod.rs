pub mod announcements;
pub mod attendance;
pub mod core;
pub mod lectures;
pub mod marks;
pub mod org;
pub mod reports;
pub mod students;
