pub mod offsets;
pub mod pipeline;
pub mod retry_queue;
pub mod shutdown;
pub mod source;
pub mod worker;

pub use offsets::CommitCoordinator;
pub use pipeline::{ConsumptionLoop, PipelineSettings};
pub use retry_queue::RetryQueue;
pub use shutdown::{PipelineState, ShutdownController};
pub use source::{ConsumerError, InboundMessage, KafkaMessageSource, MessageSource};
pub use worker::{InfraRetry, WorkItem};
