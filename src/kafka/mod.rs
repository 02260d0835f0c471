pub mod envelope;
pub mod inmemory;
pub mod listener;
pub mod producer;
pub mod serializer;

pub use envelope::Envelope;
pub use inmemory::InMemoryPublisher;
pub use listener::{Disposition, ListenerContainer, ListenerSettings, RecordHandler, Restartable};
pub use producer::{Delivery, DeliveryHandle, KafkaProducer, Publisher};
pub use serializer::JsonSerializer;
