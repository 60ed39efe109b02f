pub mod backoff;
pub mod dead_letter;
pub mod dedup;
pub mod dispatchers;
pub mod ledger;
pub mod metrics;
pub mod processor;

pub use backoff::BackoffPolicy;
pub use dead_letter::{
    DeadLetterSink, FileDeadLetterSink, InMemoryDeadLetterSink, KafkaDeadLetterSink,
    MongoDeadLetterSink,
};
pub use dedup::{DedupStore, InMemoryDedupStore, RedisDedupStore};
pub use dispatchers::{
    ChannelError, DispatchReceipt, FcmDispatcher, LogDispatcher, MockDispatcher, Msg91Dispatcher,
    NotificationDispatcher, RecipientTemplate, SmtpDispatcher,
};
pub use ledger::{InMemoryRetryLedger, RetryLedger};
pub use metrics::{get_metrics, init_metrics};
pub use processor::{EventProcessor, Processed, ProcessorSettings};
