//! Target URL templates.
//!
//! `{name}` is replaced by the captured value of the same name; `{{` and
//! `}}` produce literal braces. Anything after a `:` inside a placeholder
//! is ignored so that a capture declaration copied from a pattern
//! (`{rest:.*}`) still renders.

use super::pattern::Captures;
use crate::error::TemplateError;

pub fn render(template: &str, captures: &Captures) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        let offset = template.len() - rest.len();
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            return Err(TemplateError::Malformed(offset + pos));
        } else {
            let close = tail
                .find('}')
                .ok_or(TemplateError::Malformed(offset + pos))?;
            let body = &tail[1..close];
            let name = body.split_once(':').map_or(body, |(name, _)| name);
            if name.is_empty() || name.contains('{') {
                return Err(TemplateError::Malformed(offset + pos));
            }
            let value = captures
                .get(name)
                .ok_or_else(|| TemplateError::MissingCapture(name.to_string()))?;
            out.push_str(value);
            rest = &tail[close + 1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}
