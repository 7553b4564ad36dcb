//! Synchronized entities and their local sync metadata.

mod customer;
mod entity;
mod kind;
mod measurement;
mod order;
mod record;
mod sync_status;

pub use customer::Customer;
pub use entity::{Entity, KeyPart, NaturalKey, RecordError};
pub use kind::EntityKind;
pub use measurement::{BlouseMeasurements, KurtiMeasurements, Measurement, PantMeasurements};
pub use order::Order;
pub use record::Record;
pub use sync_status::SyncStatus;
