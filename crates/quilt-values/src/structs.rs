use crate::error::{ValueError, ValueResult};
use crate::value::Value;

/// A named record with fields sorted by name.
///
/// Field names are unique and match `[A-Za-z][A-Za-z0-9_]*`; the struct
/// name follows the same pattern or is empty. Structs are immutable:
/// `set` and `remove` return new structs.
#[derive(Clone, Debug, PartialEq)]
pub struct Struct {
    name: String,
    fields: Vec<(String, Value)>,
}

/// Whether `name` is usable as a struct field name.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `name` is usable as a struct name. Anonymous structs have an
/// empty name.
pub fn is_valid_struct_name(name: &str) -> bool {
    name.is_empty() || is_valid_field_name(name)
}

impl Struct {
    /// Build a struct, validating names and sorting fields.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<(String, Value)>,
    ) -> ValueResult<Self> {
        let name = name.into();
        if !is_valid_struct_name(&name) {
            return Err(ValueError::InvalidStructName(name));
        }
        let mut fields = fields;
        for (field_name, _) in &fields {
            if !is_valid_field_name(field_name) {
                return Err(ValueError::InvalidFieldName(field_name.clone()));
            }
        }
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        for pair in fields.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(ValueError::InvalidFieldName(format!(
                    "duplicate field {:?}",
                    pair[0].0
                )));
            }
        }
        Ok(Self { name, fields })
    }

    /// Build from fields that must already be strictly sorted by name.
    /// The decoder uses this to enforce canonical field order on the
    /// wire.
    pub fn from_sorted_fields(
        name: impl Into<String>,
        fields: Vec<(String, Value)>,
    ) -> ValueResult<Self> {
        let name = name.into();
        if !is_valid_struct_name(&name) {
            return Err(ValueError::InvalidStructName(name));
        }
        for (field_name, _) in &fields {
            if !is_valid_field_name(field_name) {
                return Err(ValueError::InvalidFieldName(field_name.clone()));
            }
        }
        for pair in fields.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(ValueError::InvalidFieldName(format!(
                    "fields out of order at {:?}",
                    pair[1].0
                )));
            }
        }
        Ok(Self { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in name order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| &self.fields[i].1)
    }

    /// A copy with `name` set to `value` (replacing or inserting).
    pub fn set(&self, name: impl Into<String>, value: Value) -> ValueResult<Self> {
        let name = name.into();
        if !is_valid_field_name(&name) {
            return Err(ValueError::InvalidFieldName(name));
        }
        let mut fields = self.fields.clone();
        match fields.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            Ok(i) => fields[i].1 = value,
            Err(i) => fields.insert(i, (name, value)),
        }
        Ok(Self {
            name: self.name.clone(),
            fields,
        })
    }

    /// A copy without the named field; unchanged if absent.
    pub fn remove(&self, name: &str) -> Self {
        let mut fields = self.fields.clone();
        if let Ok(i) = fields.binary_search_by(|(n, _)| n.as_str().cmp(name)) {
            fields.remove(i);
        }
        Self {
            name: self.name.clone(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Struct {
        Struct::new(
            "Point",
            vec![
                ("y".into(), Value::Number(2.0)),
                ("x".into(), Value::Number(1.0)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn fields_are_sorted_by_name() {
        let s = point();
        let names: Vec<&str> = s.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn get_finds_fields() {
        let s = point();
        assert_eq!(s.get("x"), Some(&Value::Number(1.0)));
        assert_eq!(s.get("z"), None);
    }

    #[test]
    fn set_replaces_and_inserts() {
        let s = point();
        let replaced = s.set("x", Value::Number(9.0)).unwrap();
        assert_eq!(replaced.get("x"), Some(&Value::Number(9.0)));

        let extended = s.set("z", Value::Number(3.0)).unwrap();
        assert_eq!(extended.len(), 3);
        let names: Vec<&str> = extended.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        // Original untouched.
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn remove_drops_field() {
        let s = point();
        let removed = s.remove("x");
        assert_eq!(removed.len(), 1);
        assert!(removed.get("x").is_none());
        assert_eq!(s.remove("missing").len(), 2);
    }

    #[test]
    fn field_name_validation() {
        assert!(is_valid_field_name("abc"));
        assert!(is_valid_field_name("A1_b2"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("1abc"));
        assert!(!is_valid_field_name("_abc"));
        assert!(!is_valid_field_name("a-b"));
        assert!(!is_valid_field_name("a b"));
    }

    #[test]
    fn invalid_field_name_is_rejected() {
        let err = Struct::new("S", vec![("9bad".into(), Value::Bool(true))]).unwrap_err();
        assert!(matches!(err, ValueError::InvalidFieldName(_)));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let err = Struct::new(
            "S",
            vec![
                ("a".into(), Value::Bool(true)),
                ("a".into(), Value::Bool(false)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ValueError::InvalidFieldName(_)));
    }

    #[test]
    fn anonymous_struct_name_is_allowed() {
        assert!(Struct::new("", vec![]).is_ok());
        assert!(Struct::new("bad name", vec![]).is_err());
    }

    #[test]
    fn from_sorted_fields_rejects_disorder() {
        let err = Struct::from_sorted_fields(
            "S",
            vec![
                ("b".into(), Value::Bool(true)),
                ("a".into(), Value::Bool(false)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ValueError::InvalidFieldName(_)));
    }
}
