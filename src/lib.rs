// Library exports for the binary and tests

pub mod config;
pub mod coordinator;
pub mod dom;
pub mod engine;
pub mod host;
pub mod storage;

// Re-export commonly used types for tests
pub use config::{EngineConfig, WindowMode};
pub use coordinator::{Badge, ToggleCoordinator};
pub use engine::EngineController;
pub use host::{EventLoop, Page};
pub use storage::{FlagStore, MemoryFlagStore, SqliteFlagStore};
