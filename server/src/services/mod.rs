pub mod object;
pub mod persistence;
pub mod room;
pub mod user;
