pub mod list;
pub mod select;
pub mod serve;
