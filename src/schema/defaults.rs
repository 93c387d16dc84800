//! Reserved system classes and their default fields.
//!
//! Every class carries the four base fields; the reserved `_`-prefixed
//! classes additionally carry fixed columns that the schema merges into any
//! submission and that user schemas can never shadow.

use std::collections::BTreeMap;

use crate::schema::types::FieldType;

/// Classes the engine reserves. Any other `_`-prefixed name is invalid.
pub const SYSTEM_CLASSES: [&str; 5] = ["_User", "_Installation", "_Role", "_Session", "_Product"];

pub fn is_system_class(class_name: &str) -> bool {
    SYSTEM_CLASSES.contains(&class_name)
}

/// The four fields every class owns.
pub fn base_fields() -> BTreeMap<String, FieldType> {
    let mut fields = BTreeMap::new();
    fields.insert("objectId".to_string(), FieldType::String);
    fields.insert("createdAt".to_string(), FieldType::Date);
    fields.insert("updatedAt".to_string(), FieldType::Date);
    fields.insert("ACL".to_string(), FieldType::Acl);
    fields
}

/// Default fields for `class_name`: the base fields plus any reserved columns
/// of the system classes.
pub fn default_fields(class_name: &str) -> BTreeMap<String, FieldType> {
    let mut fields = base_fields();
    match class_name {
        "_User" => {
            fields.insert("username".to_string(), FieldType::String);
            fields.insert("password".to_string(), FieldType::String);
            fields.insert("email".to_string(), FieldType::String);
            fields.insert("emailVerified".to_string(), FieldType::Boolean);
            fields.insert("authData".to_string(), FieldType::Object);
        }
        "_Installation" => {
            fields.insert("installationId".to_string(), FieldType::String);
            fields.insert("deviceToken".to_string(), FieldType::String);
            fields.insert("channels".to_string(), FieldType::Array);
            fields.insert("deviceType".to_string(), FieldType::String);
            fields.insert("pushType".to_string(), FieldType::String);
            fields.insert("badge".to_string(), FieldType::Number);
            fields.insert("timeZone".to_string(), FieldType::String);
            fields.insert("localeIdentifier".to_string(), FieldType::String);
            fields.insert("appVersion".to_string(), FieldType::String);
            fields.insert("appName".to_string(), FieldType::String);
            fields.insert("appIdentifier".to_string(), FieldType::String);
        }
        "_Role" => {
            fields.insert("name".to_string(), FieldType::String);
            fields.insert(
                "users".to_string(),
                FieldType::Relation {
                    target_class: "_User".to_string(),
                },
            );
            fields.insert(
                "roles".to_string(),
                FieldType::Relation {
                    target_class: "_Role".to_string(),
                },
            );
        }
        "_Session" => {
            fields.insert("restricted".to_string(), FieldType::Boolean);
            fields.insert(
                "user".to_string(),
                FieldType::Pointer {
                    target_class: "_User".to_string(),
                },
            );
            fields.insert("installationId".to_string(), FieldType::String);
            fields.insert("sessionToken".to_string(), FieldType::String);
            fields.insert("expiresAt".to_string(), FieldType::Date);
            fields.insert("createdWith".to_string(), FieldType::Object);
        }
        "_Product" => {
            fields.insert("productIdentifier".to_string(), FieldType::String);
            fields.insert("download".to_string(), FieldType::File);
            fields.insert("downloadName".to_string(), FieldType::String);
            fields.insert("icon".to_string(), FieldType::File);
            fields.insert("order".to_string(), FieldType::Number);
            fields.insert("title".to_string(), FieldType::String);
            fields.insert("subtitle".to_string(), FieldType::String);
        }
        _ => {}
    }
    fields
}

/// Columns that can be neither omitted on create nor deleted on update.
pub fn required_columns(class_name: &str) -> &'static [&'static str] {
    match class_name {
        "_Role" => &["name", "ACL"],
        "_Product" => &["productIdentifier", "icon", "order", "title", "subtitle"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_gets_base_fields() {
        let fields = default_fields("Diary");
        assert_eq!(fields.get("objectId"), Some(&FieldType::String));
        assert_eq!(fields.get("createdAt"), Some(&FieldType::Date));
        assert_eq!(fields.get("updatedAt"), Some(&FieldType::Date));
        assert_eq!(fields.get("ACL"), Some(&FieldType::Acl));
    }

    #[test]
    fn role_defaults_carry_relations() {
        let fields = default_fields("_Role");
        assert_eq!(
            fields.get("users"),
            Some(&FieldType::Relation {
                target_class: "_User".to_string()
            })
        );
        assert_eq!(required_columns("_Role"), &["name", "ACL"]);
    }

    #[test]
    fn product_required_columns() {
        assert_eq!(
            required_columns("_Product"),
            &["productIdentifier", "icon", "order", "title", "subtitle"]
        );
        assert!(required_columns("Diary").is_empty());
    }
}
