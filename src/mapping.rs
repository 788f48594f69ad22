//! Mapping rules and the mapping editor

pub mod editor;
pub mod rules;

pub use editor::{EditorState, MappingEditor, Selection};
pub use rules::{ParamSpec, ParamType};
