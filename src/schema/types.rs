//! Core schema types: field types, class schemas, and class-level permissions.
//!
//! A [`ClassSchema`] is the REST-facing description of one class. Its storage
//! counterpart ([`crate::adapter::StorageSchema`]) replaces structured field
//! types with compact type tokens; the conversions in this module are the only
//! place the two shapes meet.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{PlinthError, PlinthResult};
use crate::value::RestValue;

/// `^[A-Za-z][A-Za-z0-9_]*$`, the shape of user-visible class and field names.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid name regex"));

/// Synthetic join collections: `_Join:<field>:<owning class>`.
static JOIN_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_Join:[A-Za-z0-9_]+:[A-Za-z0-9_]+$").expect("valid join regex"));

/// 24-char alphanumeric user ids appearing as CLP grantees.
static USER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{24}$").expect("valid user id regex"));

/// The semantic type of one schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    Bytes,
    Acl,
    Pointer { target_class: String },
    Relation { target_class: String },
}

impl FieldType {
    /// Compact token used in persisted schema documents: scalar names in
    /// lowercase, `*<class>` for pointers, `relation<<class>>` for relations.
    pub fn to_token(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::Object => "object".to_string(),
            FieldType::Array => "array".to_string(),
            FieldType::GeoPoint => "geopoint".to_string(),
            FieldType::File => "file".to_string(),
            FieldType::Bytes => "bytes".to_string(),
            FieldType::Acl => "acl".to_string(),
            FieldType::Pointer { target_class } => format!("*{}", target_class),
            FieldType::Relation { target_class } => format!("relation<{}>", target_class),
        }
    }

    /// Parses a persisted type token. `map` is accepted as an alias for
    /// `object` so that older schema documents keep loading.
    pub fn from_token(token: &str) -> PlinthResult<FieldType> {
        if let Some(target) = token.strip_prefix('*') {
            return Ok(FieldType::Pointer {
                target_class: target.to_string(),
            });
        }
        if let Some(inner) = token
            .strip_prefix("relation<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(FieldType::Relation {
                target_class: inner.to_string(),
            });
        }
        match token {
            "string" => Ok(FieldType::String),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "object" | "map" => Ok(FieldType::Object),
            "array" => Ok(FieldType::Array),
            "geopoint" => Ok(FieldType::GeoPoint),
            "file" => Ok(FieldType::File),
            "bytes" => Ok(FieldType::Bytes),
            "acl" => Ok(FieldType::Acl),
            other => Err(PlinthError::IncorrectType(format!(
                "unknown field type token '{}'",
                other
            ))),
        }
    }

    /// REST shape: `{"type":"String"}` or `{"type":"Pointer","targetClass":"x"}`.
    pub fn to_rest(&self) -> Value {
        match self {
            FieldType::Pointer { target_class } => {
                json!({"type": "Pointer", "targetClass": target_class})
            }
            FieldType::Relation { target_class } => {
                json!({"type": "Relation", "targetClass": target_class})
            }
            scalar => json!({ "type": scalar.rest_name() }),
        }
    }

    fn rest_name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Object => "Object",
            FieldType::Array => "Array",
            FieldType::GeoPoint => "GeoPoint",
            FieldType::File => "File",
            FieldType::Bytes => "Bytes",
            FieldType::Acl => "ACL",
            FieldType::Pointer { .. } => "Pointer",
            FieldType::Relation { .. } => "Relation",
        }
    }

    /// Parses a REST field description as submitted to the schema API.
    pub fn from_rest(value: &Value) -> PlinthResult<FieldType> {
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PlinthError::IncorrectType("field spec requires a type".to_string()))?;
        let target = value.get("targetClass").and_then(Value::as_str);
        match type_name {
            "String" => Ok(FieldType::String),
            "Number" => Ok(FieldType::Number),
            "Boolean" => Ok(FieldType::Boolean),
            "Date" => Ok(FieldType::Date),
            "Object" => Ok(FieldType::Object),
            "Array" => Ok(FieldType::Array),
            "GeoPoint" => Ok(FieldType::GeoPoint),
            "File" => Ok(FieldType::File),
            "Bytes" => Ok(FieldType::Bytes),
            "ACL" => Ok(FieldType::Acl),
            "Pointer" => match target {
                Some(target_class) => Ok(FieldType::Pointer {
                    target_class: target_class.to_string(),
                }),
                None => Err(PlinthError::IncorrectType(
                    "Pointer field requires a targetClass".to_string(),
                )),
            },
            "Relation" => match target {
                Some(target_class) => Ok(FieldType::Relation {
                    target_class: target_class.to_string(),
                }),
                None => Err(PlinthError::IncorrectType(
                    "Relation field requires a targetClass".to_string(),
                )),
            },
            other => Err(PlinthError::IncorrectType(format!(
                "invalid field type '{}'",
                other
            ))),
        }
    }

    /// Infers the field type implied by a decoded value. `Null` carries no
    /// type information.
    pub fn from_value(value: &RestValue) -> Option<FieldType> {
        match value {
            RestValue::Null => None,
            RestValue::Bool(_) => Some(FieldType::Boolean),
            RestValue::Number(_) => Some(FieldType::Number),
            RestValue::String(_) => Some(FieldType::String),
            RestValue::Date(_) => Some(FieldType::Date),
            RestValue::Pointer { class_name, .. } => Some(FieldType::Pointer {
                target_class: class_name.clone(),
            }),
            RestValue::Relation { class_name } => Some(FieldType::Relation {
                target_class: class_name.clone(),
            }),
            RestValue::GeoPoint { .. } => Some(FieldType::GeoPoint),
            RestValue::File { .. } => Some(FieldType::File),
            RestValue::Bytes(_) => Some(FieldType::Bytes),
            RestValue::Array(_) => Some(FieldType::Array),
            RestValue::Object(_) => Some(FieldType::Object),
        }
    }
}

/// Infers the field type implied by a raw REST value, decoding update
/// operators first. Returns `Ok(None)` for values that carry no type
/// information (null, `Delete` ops).
pub fn infer_rest_type(value: &Value) -> PlinthResult<Option<FieldType>> {
    if let Some(op) = value.get("__op").and_then(Value::as_str) {
        return match op {
            "Delete" => Ok(None),
            "Increment" => Ok(Some(FieldType::Number)),
            "Add" | "AddUnique" | "Remove" => Ok(Some(FieldType::Array)),
            "AddRelation" | "RemoveRelation" => {
                let first = value
                    .get("objects")
                    .and_then(Value::as_array)
                    .and_then(|objects| objects.first());
                match first.map(RestValue::from_json).transpose()? {
                    Some(RestValue::Pointer { class_name, .. }) => Ok(Some(FieldType::Relation {
                        target_class: class_name,
                    })),
                    _ => Err(PlinthError::IncorrectType(format!(
                        "{} requires an array of Pointer values",
                        op
                    ))),
                }
            }
            "Batch" => {
                let first = value
                    .get("ops")
                    .and_then(Value::as_array)
                    .and_then(|ops| ops.first());
                match first {
                    Some(first) => infer_rest_type(first),
                    None => Err(PlinthError::IncorrectType(
                        "Batch requires a non-empty ops array".to_string(),
                    )),
                }
            }
            other => Err(PlinthError::IncorrectType(format!(
                "unknown update operator '{}'",
                other
            ))),
        };
    }
    Ok(FieldType::from_value(&RestValue::from_json(value)?))
}

/// Per-operation grantee maps plus the pointer-field exemption lists.
///
/// An operation left unspecified (`None`) is unrestricted. An operation with
/// an explicit grantee map only admits those grantees; an explicit empty map
/// admits nobody, which is how classes restrict access to the pointer-field
/// exemptions alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLevelPermissions {
    pub find: Option<BTreeMap<String, bool>>,
    pub get: Option<BTreeMap<String, bool>>,
    pub create: Option<BTreeMap<String, bool>>,
    pub update: Option<BTreeMap<String, bool>>,
    pub delete: Option<BTreeMap<String, bool>>,
    pub add_field: Option<BTreeMap<String, bool>>,
    pub read_user_fields: Vec<String>,
    pub write_user_fields: Vec<String>,
}

/// The operations a CLP can scope.
pub const CLP_OPERATIONS: [&str; 6] = ["find", "get", "create", "update", "delete", "addField"];

impl ClassLevelPermissions {
    /// Open permissions: every operation granted to `*`. Used when a class is
    /// created without an explicit CLP.
    pub fn open() -> Self {
        let mut star = BTreeMap::new();
        star.insert("*".to_string(), true);
        ClassLevelPermissions {
            find: Some(star.clone()),
            get: Some(star.clone()),
            create: Some(star.clone()),
            update: Some(star.clone()),
            delete: Some(star.clone()),
            add_field: Some(star),
            read_user_fields: Vec::new(),
            write_user_fields: Vec::new(),
        }
    }

    /// The grantee map restricting one operation, or `None` when the
    /// operation is unrestricted.
    pub fn operation(&self, operation: &str) -> Option<&BTreeMap<String, bool>> {
        match operation {
            "find" => self.find.as_ref(),
            "get" => self.get.as_ref(),
            "create" => self.create.as_ref(),
            "update" => self.update.as_ref(),
            "delete" => self.delete.as_ref(),
            "addField" => self.add_field.as_ref(),
            _ => None,
        }
    }

    /// The pointer-field exemption list relevant to one operation: read
    /// fields for the read operations, write fields otherwise.
    pub fn user_fields(&self, operation: &str) -> &[String] {
        match operation {
            "find" | "get" | "count" => &self.read_user_fields,
            _ => &self.write_user_fields,
        }
    }

    /// Whether the grantee map for `operation` admits everyone or one of
    /// `acl_group`. Exemption lists and authentication rules are layered on
    /// separately.
    pub fn is_granted(&self, operation: &str, acl_group: &[String]) -> bool {
        match self.operation(operation) {
            None => true,
            Some(perms) => {
                perms.get("*").copied().unwrap_or(false)
                    || acl_group
                        .iter()
                        .any(|entry| perms.get(entry).copied().unwrap_or(false))
            }
        }
    }

    fn operation_mut(&mut self, operation: &str) -> Option<&mut BTreeMap<String, bool>> {
        let slot = match operation {
            "find" => &mut self.find,
            "get" => &mut self.get,
            "create" => &mut self.create,
            "update" => &mut self.update,
            "delete" => &mut self.delete,
            "addField" => &mut self.add_field,
            _ => return None,
        };
        Some(slot.get_or_insert_with(BTreeMap::new))
    }

    /// Parses and validates a REST CLP blob. Unknown operations, malformed
    /// grantees and non-`true` grants are all rejected here, before any
    /// schema write happens.
    pub fn from_rest(value: &Value) -> PlinthResult<ClassLevelPermissions> {
        let map = value.as_object().ok_or_else(|| {
            PlinthError::IncorrectType("classLevelPermissions must be an object".to_string())
        })?;
        let mut clp = ClassLevelPermissions::default();
        for (operation, grants) in map {
            match operation.as_str() {
                "readUserFields" | "writeUserFields" => {
                    let fields = grants.as_array().ok_or_else(|| {
                        PlinthError::IncorrectType(format!(
                            "'{}' must be an array of field names",
                            operation
                        ))
                    })?;
                    let mut names = Vec::new();
                    for field in fields {
                        let name = field.as_str().ok_or_else(|| {
                            PlinthError::IncorrectType(format!(
                                "'{}' entries must be field names",
                                operation
                            ))
                        })?;
                        names.push(name.to_string());
                    }
                    if operation == "readUserFields" {
                        clp.read_user_fields = names;
                    } else {
                        clp.write_user_fields = names;
                    }
                }
                op if CLP_OPERATIONS.contains(&op) => {
                    let grantee_map = grants.as_object().ok_or_else(|| {
                        PlinthError::IncorrectType(format!(
                            "'{}' permission must be a grantee map",
                            op
                        ))
                    })?;
                    for (grantee, allowed) in grantee_map {
                        if !grantee_is_valid(grantee) {
                            return Err(PlinthError::IncorrectType(format!(
                                "'{}' is not a valid permission grantee",
                                grantee
                            )));
                        }
                        if allowed != &Value::Bool(true) {
                            return Err(PlinthError::IncorrectType(format!(
                                "permission grant for '{}' must be true",
                                grantee
                            )));
                        }
                    }
                    if let Some(target) = clp.operation_mut(op) {
                        for grantee in grantee_map.keys() {
                            target.insert(grantee.clone(), true);
                        }
                    }
                }
                other => {
                    return Err(PlinthError::IncorrectType(format!(
                        "'{}' is not a valid class-level permission",
                        other
                    )));
                }
            }
        }
        Ok(clp)
    }

    /// REST shape of the CLP, the inverse of [`Self::from_rest`].
    /// Unspecified operations are omitted rather than printed as empty.
    pub fn to_rest(&self) -> Value {
        let mut out = Map::new();
        for operation in CLP_OPERATIONS {
            if let Some(grants) = self.operation(operation) {
                let grants: Map<String, Value> = grants
                    .iter()
                    .map(|(grantee, allowed)| (grantee.clone(), Value::Bool(*allowed)))
                    .collect();
                out.insert(operation.to_string(), Value::Object(grants));
            }
        }
        if !self.read_user_fields.is_empty() {
            out.insert("readUserFields".to_string(), json!(self.read_user_fields));
        }
        if !self.write_user_fields.is_empty() {
            out.insert("writeUserFields".to_string(), json!(self.write_user_fields));
        }
        Value::Object(out)
    }
}

fn grantee_is_valid(grantee: &str) -> bool {
    grantee == "*"
        || grantee == "requiresAuthentication"
        || grantee
            .strip_prefix("role:")
            .map(|name| !name.is_empty())
            .unwrap_or(false)
        || USER_ID_RE.is_match(grantee)
}

/// The REST-facing description of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSchema {
    pub class_name: String,
    pub fields: BTreeMap<String, FieldType>,
    pub class_level_permissions: ClassLevelPermissions,
}

impl ClassSchema {
    pub fn new(class_name: &str) -> Self {
        ClassSchema {
            class_name: class_name.to_string(),
            fields: BTreeMap::new(),
            class_level_permissions: ClassLevelPermissions::open(),
        }
    }

    /// The declared type of `key`, if the class carries it.
    pub fn expected_type(&self, key: &str) -> Option<&FieldType> {
        self.fields.get(key)
    }

    /// Names of every Relation-typed field.
    pub fn relation_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, ty)| matches!(ty, FieldType::Relation { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// REST shape: `{className, fields, classLevelPermissions}`.
    pub fn to_rest(&self) -> Value {
        let mut fields = Map::new();
        for (name, ty) in &self.fields {
            fields.insert(name.clone(), ty.to_rest());
        }
        json!({
            "className": self.class_name,
            "fields": Value::Object(fields),
            "classLevelPermissions": self.class_level_permissions.to_rest(),
        })
    }

    /// Decodes a persisted schema. A schema stored without permissions is
    /// treated as open.
    pub fn from_storage(storage: &crate::adapter::StorageSchema) -> PlinthResult<ClassSchema> {
        let mut fields = BTreeMap::new();
        for (name, token) in &storage.fields {
            fields.insert(name.clone(), FieldType::from_token(token)?);
        }
        let class_level_permissions = if storage.class_permissions.is_null() {
            ClassLevelPermissions::open()
        } else {
            ClassLevelPermissions::from_rest(&storage.class_permissions)?
        };
        Ok(ClassSchema {
            class_name: storage.class_name.clone(),
            fields,
            class_level_permissions,
        })
    }

    /// The persisted shape of the schema, the inverse of
    /// [`Self::from_storage`].
    pub fn to_storage(&self) -> crate::adapter::StorageSchema {
        let fields = self
            .fields
            .iter()
            .map(|(name, ty)| (name.clone(), ty.to_token()))
            .collect();
        crate::adapter::StorageSchema {
            class_name: self.class_name.clone(),
            fields,
            class_permissions: self.class_level_permissions.to_rest(),
        }
    }
}

/// Whether `class_name` is acceptable: a user-visible name, a reserved system
/// class, or a synthetic join collection.
pub fn class_name_is_valid(class_name: &str) -> bool {
    crate::schema::defaults::is_system_class(class_name)
        || JOIN_CLASS_RE.is_match(class_name)
        || NAME_RE.is_match(class_name)
}

/// Whether `field_name` is an acceptable user field name.
pub fn field_name_is_valid(field_name: &str) -> bool {
    NAME_RE.is_match(field_name)
}

/// True when the name addresses a join collection.
pub fn is_join_class(class_name: &str) -> bool {
    JOIN_CLASS_RE.is_match(class_name)
}

/// The synthetic collection backing one relation field.
pub fn join_class_name(field_name: &str, owning_class: &str) -> String {
    format!("_Join:{}:{}", field_name, owning_class)
}
