pub mod base;
pub mod enumerator;
pub mod filter_alarm;
pub mod instance;
pub mod motion_saver;
pub mod select;
pub mod sensor;
