use quilt_hash::Address;

use crate::blob::Blob;
use crate::codec;
use crate::kind::Kind;
use crate::list::List;
use crate::map::Map;
use crate::refs::Ref;
use crate::sequence::{Sequence, SequenceData};
use crate::set::Set;
use crate::structs::Struct;
use crate::types::{StructType, Type};

/// An immutable Quilt value.
///
/// Values compare by canonical encoding, so equality is structural and
/// two equal values always share an address. Collection variants hold
/// their root sequence node; children beyond the root live in chunk
/// storage and are fetched through a [`crate::store::ValueReader`] at
/// access time.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    Blob(Blob),
    List(List),
    Map(Map),
    Set(Set),
    Struct(Struct),
    Ref(Ref),
    Type(Type),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Blob(_) => Kind::Blob,
            Value::List(_) => Kind::List,
            Value::Map(_) => Kind::Map,
            Value::Set(_) => Kind::Set,
            Value::Struct(_) => Kind::Struct,
            Value::Ref(_) => Kind::Ref,
            Value::Type(_) => Kind::Type,
        }
    }

    /// The canonical encoding of this value (its root node only, for
    /// collections).
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_value(self)
    }

    /// The content address: hash of the canonical encoding.
    pub fn address(&self) -> Address {
        Address::of(&self.encode())
    }

    /// The root sequence node of a chunked collection.
    pub fn sequence(&self) -> Option<&Sequence> {
        match self {
            Value::Blob(b) => Some(b.sequence()),
            Value::List(l) => Some(l.sequence()),
            Value::Map(m) => Some(m.sequence()),
            Value::Set(s) => Some(s.sequence()),
            _ => None,
        }
    }

    /// The type describing this value.
    ///
    /// Collection element types are unioned over the members actually
    /// present (recovered from child ref types at meta levels, so no
    /// subtree loading is needed). Struct types are derived from fields.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::BOOL,
            Value::Number(_) => Type::NUMBER,
            Value::String(_) => Type::STRING,
            Value::Blob(_) => Type::BLOB,
            Value::Type(_) => Type::Primitive(Kind::Type),
            Value::Ref(r) => Type::Ref(Box::new(r.target_type().clone())),
            Value::Struct(s) => Type::Struct(StructType {
                name: s.name().to_string(),
                fields: s
                    .fields()
                    .iter()
                    .map(|(n, v)| (n.clone(), v.type_of()))
                    .collect(),
            }),
            Value::List(l) => Type::List(Box::new(element_type(l.sequence()))),
            Value::Set(s) => Type::Set(Box::new(element_type(s.sequence()))),
            Value::Map(m) => {
                let (k, v) = map_entry_type(m.sequence());
                Type::Map(Box::new(k), Box::new(v))
            }
        }
    }

    /// The tallest ref height reachable in this value without loading
    /// chunks. Zero when the value contains no refs.
    pub fn max_ref_height(&self) -> u64 {
        match self {
            Value::Ref(r) => r.height(),
            Value::Struct(s) => s
                .fields()
                .iter()
                .map(|(_, v)| v.max_ref_height())
                .max()
                .unwrap_or(0),
            Value::Blob(b) => sequence_ref_height(b.sequence()),
            Value::List(l) => sequence_ref_height(l.sequence()),
            Value::Map(m) => sequence_ref_height(m.sequence()),
            Value::Set(s) => sequence_ref_height(s.sequence()),
            _ => 0,
        }
    }
}

fn sequence_ref_height(seq: &Sequence) -> u64 {
    match &seq.data {
        SequenceData::Bytes(_) => 0,
        SequenceData::Values(values) => values
            .iter()
            .map(Value::max_ref_height)
            .max()
            .unwrap_or(0),
        SequenceData::Entries(entries) => entries
            .iter()
            .map(|e| e.key.max_ref_height().max(e.value.max_ref_height()))
            .max()
            .unwrap_or(0),
        SequenceData::Meta(tuples) => tuples
            .iter()
            .map(|t| t.child.height())
            .max()
            .unwrap_or(0),
    }
}

// Union of member types for a List/Set sequence node.
fn element_type(seq: &Sequence) -> Type {
    match &seq.data {
        SequenceData::Values(values) => {
            Type::union_of(values.iter().map(Value::type_of).collect())
        }
        SequenceData::Meta(tuples) => Type::union_of(
            tuples
                .iter()
                .filter_map(|t| t.child.target_type().element().cloned())
                .collect(),
        ),
        _ => Type::union_of(vec![]),
    }
}

fn map_entry_type(seq: &Sequence) -> (Type, Type) {
    match &seq.data {
        SequenceData::Entries(entries) => (
            Type::union_of(entries.iter().map(|e| e.key.type_of()).collect()),
            Type::union_of(entries.iter().map(|e| e.value.type_of()).collect()),
        ),
        SequenceData::Meta(tuples) => {
            let mut keys = Vec::new();
            let mut values = Vec::new();
            for t in tuples {
                if let Some((k, v)) = t.child.target_type().map_entry_types() {
                    keys.push(k.clone());
                    values.push(v.clone());
                }
            }
            (Type::union_of(keys), Type::union_of(values))
        }
        _ => (Type::union_of(vec![]), Type::union_of(vec![])),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.encode().hash(state);
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Struct(s) => {
                write!(f, "Struct {}(", s.name())?;
                for (i, (name, value)) in s.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value:?}")?;
                }
                write!(f, ")")
            }
            Value::Ref(r) => write!(f, "Ref({} h{})", r.address().short(), r.height()),
            Value::Type(t) => write!(f, "Type({t})"),
            other => write!(f, "{}({})", other.kind(), other.address().short()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
