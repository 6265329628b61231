// Shared token helpers for the built-in stages
pub mod base;

// Individual stage implementations
pub mod closure;
pub mod event;
pub mod field;
pub mod line_filter;

// Re-export the main components
pub use closure::FnStage;
pub use event::EventNormalizer;
pub use field::FieldNormalizer;
pub use line_filter::LineFilter;
