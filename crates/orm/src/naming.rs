//! Deterministic naming of tables, columns, indexes and join-table keys

use heck::ToSnakeCase;

/// Nouns whose plural is not formed by a suffix rule
const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("datum", "data"),
];

/// How generated identifiers are derived from type and field names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingStrategy {
    pub table_prefix: String,
    pub singular_table: bool,
}

impl NamingStrategy {
    pub fn new(table_prefix: impl Into<String>, singular_table: bool) -> Self {
        Self {
            table_prefix: table_prefix.into(),
            singular_table,
        }
    }

    /// `UserLanguage` -> `user_languages`
    pub fn table_name(&self, type_name: &str) -> String {
        let snake = to_snake(type_name);
        let base = if self.singular_table { snake } else { pluralize(&snake) };
        format!("{}{}", self.table_prefix, base)
    }

    /// Apply the configured prefix to an explicitly declared table name
    pub fn prefixed(&self, table: &str) -> String {
        if self.table_prefix.is_empty() || table.starts_with(&self.table_prefix) {
            table.to_string()
        } else {
            format!("{}{}", self.table_prefix, table)
        }
    }

    pub fn column_name(&self, field_name: &str) -> String {
        to_snake(field_name)
    }

    /// `idx_users_email` or `uix_users_email`
    pub fn index_name(&self, unique: bool, table: &str, column: &str) -> String {
        let prefix = if unique { "uix" } else { "idx" };
        format!("{}_{}_{}", prefix, table, column)
    }

    /// Join-table column for one side of a many-to-many, e.g. `user_id`
    pub fn join_table_column(&self, type_name: &str, key_column: &str) -> String {
        format!("{}_{}", to_snake(type_name), key_column)
    }
}

/// Snake-case a Rust-style identifier: `OwnerID` -> `owner_id`
pub fn to_snake(name: &str) -> String {
    name.to_snake_case()
}

/// Strip module path and generic arguments from `std::any::type_name`
pub fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// English-centric pluralization of the last word of a snake-case name
pub fn pluralize(name: &str) -> String {
    let (head, last) = match name.rfind('_') {
        Some(pos) => name.split_at(pos + 1),
        None => ("", name),
    };

    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == last) {
        return format!("{}{}", head, plural);
    }

    let plural = if last.ends_with('y')
        && !last.ends_with("ay")
        && !last.ends_with("ey")
        && !last.ends_with("iy")
        && !last.ends_with("oy")
        && !last.ends_with("uy")
    {
        format!("{}ies", &last[..last.len() - 1])
    } else if last.ends_with('s')
        || last.ends_with("sh")
        || last.ends_with("ch")
        || last.ends_with('x')
        || last.ends_with('z')
    {
        format!("{}es", last)
    } else {
        format!("{}s", last)
    };

    format!("{}{}", head, plural)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_acronyms() {
        assert_eq!(to_snake("OwnerID"), "owner_id");
        assert_eq!(to_snake("ID"), "id");
        assert_eq!(to_snake("CreatedAt"), "created_at");
        assert_eq!(to_snake("UserLanguage"), "user_language");
    }

    #[test]
    fn table_names_are_plural_snake_case() {
        let naming = NamingStrategy::default();
        assert_eq!(naming.table_name("User"), "users");
        assert_eq!(naming.table_name("Category"), "categories");
        assert_eq!(naming.table_name("Box"), "boxes");
        assert_eq!(naming.table_name("Child"), "children");
        assert_eq!(naming.table_name("UserLanguage"), "user_languages");
    }

    #[test]
    fn prefix_and_singular_are_applied() {
        let naming = NamingStrategy::new("app_", true);
        assert_eq!(naming.table_name("User"), "app_user");
        assert_eq!(naming.prefixed("user_languages"), "app_user_languages");
        assert_eq!(naming.prefixed("app_things"), "app_things");
    }

    #[test]
    fn index_and_join_columns() {
        let naming = NamingStrategy::default();
        assert_eq!(naming.index_name(false, "users", "email"), "idx_users_email");
        assert_eq!(naming.index_name(true, "users", "email"), "uix_users_email");
        assert_eq!(naming.join_table_column("User", "id"), "user_id");
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name("my_app::models::User"), "User");
        assert_eq!(short_type_name("my_app::Wrapper<my_app::User>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
