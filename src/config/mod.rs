//! Configuration and persisted state for the kiosk
//!
//! - **paths**: where everything lives under the state root
//! - **settings**: operator-tunable `settings.json` (timeouts, browser, seed targets)
//! - **store**: the durable KEY=value records for targets and display state

pub mod paths;
pub mod settings;
pub mod store;

pub use paths::Paths;
pub use settings::Settings;
pub use store::{FileStore, Store};
