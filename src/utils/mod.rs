pub mod fields;
pub mod sanitize;
