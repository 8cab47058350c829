pub mod name;
pub mod document;
