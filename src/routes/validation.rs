//! Validation of route records submitted through the management API.
//!
//! [`validate`] checks the name, both patterns, and the shape of the
//! target template, and returns every problem found as a
//! [`ValidationError`] with a suggestion where one is obvious. Whether a
//! template placeholder is actually captured by the patterns is not
//! checked here; a mismatch surfaces as a 502 when the route is used.

use super::pattern::Pattern;
use super::RouteRecord;
use crate::error::ValidationError;

/// Validate a route name. Names become store keys, so they must be a
/// single non-empty key segment that is not a relative path step.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".into());
    }
    if name.chars().all(|c| c == '.') {
        return Err(format!("'{name}' is not a usable key segment"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '-' | '_' | '.')))
    {
        return Err(format!(
            "'{bad}' is not allowed (use letters, digits, '-', '_' or '.')"
        ));
    }
    Ok(())
}

/// Validate a target template: a placeholder-free rendering must be an
/// absolute http(s) URL.
pub fn validate_target(target: &str) -> Result<(), String> {
    let probe = replace_placeholders_for_validation(target);
    match url::Url::parse(&probe) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!(
            "unsupported scheme '{}' (expected http or https)",
            parsed.scheme()
        )),
        Err(_) => Err(format!("'{target}' is not a valid URL")),
    }
}

pub fn validate(record: &RouteRecord) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let route_id = if record.name.is_empty() {
        "(unnamed)".to_string()
    } else {
        record.name.clone()
    };

    if let Err(msg) = validate_name(&record.name) {
        errors.push(ValidationError {
            route: route_id.clone(),
            field: "name".into(),
            message: msg,
            suggestion: None,
        });
    }

    if let Some(ref domain) = record.domain {
        if let Err(e) = Pattern::host(domain) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "domain".into(),
                message: e.to_string(),
                suggestion: None,
            });
        }
    }

    if let Some(ref path) = record.path {
        if let Err(e) = Pattern::path(path) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "path".into(),
                message: e.to_string(),
                suggestion: None,
            });
        } else if !path.is_empty() && !path.starts_with('/') && !path.starts_with('{') {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "path".into(),
                message: "path must start with '/'".into(),
                suggestion: Some(format!("did you mean '/{path}'?")),
            });
        }
    }

    if let Err(msg) = validate_target(&record.target) {
        errors.push(ValidationError {
            route: route_id,
            field: "target".into(),
            message: msg,
            suggestion: None,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Replace `{name}` placeholders with a plain token so the template can
/// be parsed as a URL.
fn replace_placeholders_for_validation(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut inside = false;
    for ch in template.chars() {
        match ch {
            '{' if !inside => {
                inside = true;
                result.push('p');
            }
            '}' if inside => inside = false,
            _ if inside => {}
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, domain: Option<&str>, path: Option<&str>, target: &str) -> RouteRecord {
        RouteRecord {
            name: name.into(),
            domain: domain.map(String::from),
            path: path.map(String::from),
            target: target.into(),
        }
    }

    #[test]
    fn valid_record_passes() {
        let r = record(
            "web",
            Some("{sub}.example.com"),
            Some("/api/{rest:.*}"),
            "http://{sub}.backend:8080/{rest}",
        );
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn name_with_slash_is_rejected() {
        let errors = validate(&record("a/b", None, None, "http://b/")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "name");
    }

    #[test]
    fn dot_only_names_are_rejected() {
        for name in [".", "..", "..."] {
            let errors = validate(&record(name, None, None, "http://b/")).unwrap_err();
            assert_eq!(errors[0].field, "name", "{name}");
        }
        assert!(validate(&record("v1.2", None, None, "http://b/")).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let errors = validate(&record("", Some("{"), Some("api"), "ftp://b/")).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "domain", "path", "target"]);
        assert_eq!(errors[2].suggestion.as_deref(), Some("did you mean '/api'?"));
    }

    #[test]
    fn templated_host_is_accepted() {
        assert!(validate_target("http://{app}.internal/{rest}").is_ok());
        assert!(validate_target("not a url").is_err());
    }
}
