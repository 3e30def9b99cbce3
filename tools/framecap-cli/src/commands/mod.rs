pub mod check;
pub mod compose;
pub mod record;
