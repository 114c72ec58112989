pub mod auto_id;
pub mod deep_merge;

pub use auto_id::{generate_auto_id, AUTO_ID_LENGTH};
pub use deep_merge::{assign_fields, deep_merge, remove_field_path};
