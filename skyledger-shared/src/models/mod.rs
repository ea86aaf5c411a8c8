pub mod events;
pub mod primitives;
