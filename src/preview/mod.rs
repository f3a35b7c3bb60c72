//! Intent email previews.

pub mod intent;
pub mod render;

pub use intent::{
    PageData, PreviewError, PreviewRequest, TemplateData, compute_subject_prefix, page_data,
    sections_to_show, template_data,
};
pub use render::{escape_html, render_intent_preview};
