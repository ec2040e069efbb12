mod check_time;

pub use check_time::CheckTimeTask;
