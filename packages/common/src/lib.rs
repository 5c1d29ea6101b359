pub mod keys;
pub mod reference;
pub mod storage;

pub use keys::StorageKeys;
pub use reference::{
    EntityType, Reference, ReferenceError, ResizeAxis, ResizeDirective, ResizePolicy,
};
