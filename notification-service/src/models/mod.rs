pub mod channel;
pub mod event;
pub mod outcome;
pub mod record;

pub use channel::Channel;
pub use event::{decode, EventEnvelope, OrderCreatedEvent, TransportMetadata};
pub use outcome::Outcome;
pub use record::{
    Attempt, AttemptOutcome, DeadLetterRecord, ErrorClass, ProcessingRecord, ProcessingStatus,
};
