// Application Layer - Use Cases and Business Logic

mod alert;
pub mod enqueue;
pub mod manager;
pub mod reclaimer;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod worker;

// Re-exports
pub use enqueue::{EnqueueRequest, EnqueueService};
pub use manager::WorkerManager;
pub use reclaimer::StuckJobReclaimer;
pub use recorder::OutcomeRecorder;
pub use registry::{HandlerRegistry, RegisteredHandler};
pub use session::{SessionFactory, SharedSession};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
