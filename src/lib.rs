pub mod availability;
pub mod booking;
pub mod browser_pool;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod site;
pub mod web_interface;

pub use configuration::types::CourtNumber;
pub use controller::Controller;
