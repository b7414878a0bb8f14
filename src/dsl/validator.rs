//! Path validation: DSL values and route uniqueness across resources.

use crate::error::BootError;
use crate::registry::Resource;
use axum::http::Method;
use std::collections::HashMap;

fn is_url_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}

/// A single path segment: non-empty, URL-safe, no slashes.
pub fn validate_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("must not be empty".into());
    }
    if segment == "." || segment == ".." {
        return Err(format!("'{}' is not a valid segment", segment));
    }
    if let Some(c) = segment.chars().find(|c| !is_url_safe(*c)) {
        return Err(format!("'{}' contains invalid character '{}'", segment, c));
    }
    Ok(())
}

/// URL parameter name: identifier characters only.
pub fn validate_param(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err("must not be empty".into()),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => Err(format!("'{}' must start with a letter", name)),
        _ if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_')) => {
            Err(format!("'{}' must contain only letters, digits and '_'", name))
        }
        _ => Ok(()),
    }
}

/// One or more segments separated by '/'.
pub fn validate_path_suffix(suffix: &str) -> Result<(), String> {
    if suffix.is_empty() {
        return Err("must not be empty".into());
    }
    suffix.split('/').try_for_each(validate_segment)
}

/// Endpoint segments unique under the API root; no two enabled routes with the same method may match one URL.
pub fn validate_routes(resources: &[Resource]) -> Result<(), BootError> {
    let mut endpoints: HashMap<&str, &str> = HashMap::new();
    for r in resources {
        if let Some(other) = endpoints.insert(r.endpoint.as_str(), r.type_id.as_str()) {
            return Err(BootError::PathConflict(format!(
                "endpoint '{}' claimed by {} and {}",
                r.endpoint, other, r.type_id
            )));
        }
    }

    let mut seen: HashMap<Method, Vec<(String, &str)>> = HashMap::new();
    for r in resources {
        for route in r.routes() {
            let claimed = seen.entry(route.method.clone()).or_default();
            if let Some((other_path, other_type)) = claimed.iter().find(|(p, _)| overlaps(p, &route.path)) {
                return Err(BootError::PathConflict(format!(
                    "{} {} ({}) overlaps {} ({})",
                    route.method, route.path, r.type_id, other_path, other_type
                )));
            }
            claimed.push((route.path, r.type_id.as_str()));
        }
    }
    Ok(())
}

/// Two paths overlap when every segment pair is equal or either side is a `:param`.
/// A static segment never shadows a parameter at the same position.
fn overlaps(a: &str, b: &str) -> bool {
    let (a, b): (Vec<&str>, Vec<&str>) = (a.split('/').collect(), b.split('/').collect());
    a.len() == b.len()
        && a.iter()
            .zip(&b)
            .all(|(x, y)| x == y || x.starts_with(':') || y.starts_with(':'))
}
