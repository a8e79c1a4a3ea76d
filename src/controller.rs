// Controller module root
pub mod controller_handler;

// Re-export commonly used items
pub use controller_handler::Controller;
