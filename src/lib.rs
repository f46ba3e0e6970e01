pub mod audio;
pub mod config;
pub mod llm;
pub mod server;
pub mod session;
pub mod storage;
pub mod summary;
pub mod transcript;

pub use config::Config;
pub use server::{create_router, AppState, ControlHooks, Hub};
pub use session::{Detector, Manager};
pub use storage::SqliteStore;
