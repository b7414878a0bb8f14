//! Type identity and default path naming.

/// Stable identity of a registered type: its fully qualified Rust path.
pub fn type_identity<T: ?Sized + 'static>() -> &'static str {
    std::any::type_name::<T>()
}

/// Last path segment of a type name, without generic arguments.
/// e.g. "my_app::model::User" -> "User", "a::Page<b::User>" -> "Page"
pub fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// English plural of a lowercase word. Covers regular forms only.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let ends_with_any = |suffixes: &[&str]| suffixes.iter().any(|s| word.ends_with(s));
    if ends_with_any(&["s", "x", "z", "ch", "sh"]) {
        return format!("{}es", word);
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.map(|c| !"aeiou".contains(c)).unwrap_or(false) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", word)
}

/// Default endpoint segment: lowercase plural of the type name.
pub fn default_endpoint(type_name: &str) -> String {
    pluralize(&short_type_name(type_name).to_lowercase())
}

/// Default URL parameter name: lowercase singular of the type name.
pub fn default_param(type_name: &str) -> String {
    short_type_name(type_name).to_lowercase()
}
