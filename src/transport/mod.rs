//! Cross-process sample transport.
//!
//! - [`ring`]: the shared-memory ring buffer and the consumer's read cursor
//! - [`decimator`]: producer-side keep-one-in-N counter
//! - [`supervisor`]: consumer-side spawning, restart and teardown of the producer

pub mod decimator;
pub mod ring;
pub mod supervisor;

pub use decimator::SampleDecimator;
pub use ring::{RawSample, ReadCursor, RingBuffer};
pub use supervisor::{ProducerStatus, ProducerSupervisor, RestartPolicy, SupervisorConfig};
