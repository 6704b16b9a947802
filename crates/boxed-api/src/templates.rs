//! Template name to image resolution

/// Image used when no template is given or the name is unknown.
pub const DEFAULT_IMAGE: &str = "python:3.10-slim";

/// Friendly template names mapped to concrete images.
const NAMED_TEMPLATES: &[(&str, &str)] = &[
    ("python-data-science", "boxed-python:3.9"),
    ("node", "node:20-slim"),
];

/// Resolve a template reference to an image. A reference containing `:` is
/// treated as a concrete image; known friendly names map through the table;
/// anything else falls back to the default image.
pub fn resolve_template(template: &str) -> String {
    if let Some((_, image)) = NAMED_TEMPLATES.iter().find(|(name, _)| *name == template) {
        return image.to_string();
    }
    if template.contains(':') {
        return template.to_string();
    }
    DEFAULT_IMAGE.to_string()
}
