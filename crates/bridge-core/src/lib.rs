pub mod config;
pub mod event_log;
pub mod events;
pub mod projection;
pub mod snapshot;
pub mod types;

pub use config::*;
pub use event_log::*;
pub use events::*;
pub use projection::*;
pub use types::*;
