pub mod device;
pub mod hass;
pub mod http;
pub mod state;
