pub mod color_scheme;
pub mod error;
pub mod registry;
pub mod scheme;
pub mod search_index;

pub use color_scheme::{BuiltInScheme, ColorScheme, Rgb};
pub use error::SchemeError;
pub use registry::{BulkReplace, SchemeRegistry};
pub use scheme::{
    EDITABLE_COPY_PREFIX, EditableScheme, Scheme, SchemeState, display_name, editable_copy_name,
    is_editable_copy, scheme_display_name,
};
pub use search_index::{SchemeSearch, SearchMode};
