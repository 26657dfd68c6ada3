// Протокол: формат данных на проводе и внешние сервисы

pub mod directory;
pub mod messages;
pub mod wire;

pub use directory::{KeyDirectory, ParameterSource};
pub use messages::Envelope;
pub use wire::{ParametersWire, PublicValueWire};
