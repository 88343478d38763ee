//! `{{field}}` template rendering against local records.

use crmsync_types::LocalRecord;
use handlebars::Handlebars;

/// Renders mustache-style templates.
///
/// Missing variables render as empty strings. Output is not HTML-escaped:
/// rendered values are written to CRM fields, not to markup.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Creates a renderer.
    #[must_use]
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Renders `template` with the record's fields as context.
    pub fn render(&self, template: &str, record: &LocalRecord) -> Result<String, String> {
        self.handlebars
            .render_template(template, record.fields())
            .map_err(|e| e.to_string())
    }

    /// Renders `template`, falling back to the literal template text when
    /// rendering fails.
    #[must_use]
    pub fn render_or_literal(&self, template: &str, record: &LocalRecord) -> String {
        self.render(template, record)
            .unwrap_or_else(|_| template.to_string())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
