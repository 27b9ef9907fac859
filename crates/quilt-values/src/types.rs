//! Type descriptions.
//!
//! Types describe values: primitives stand alone, collections carry
//! element types, refs carry target types, and structs carry named
//! fields. Recursive shapes (a commit whose parents are refs to commits)
//! are closed with [`Type::Cycle`], a back reference to the k-th
//! enclosing struct constructor, which keeps every type finite.

use crate::codec;
use crate::kind::Kind;

/// A struct type: name plus fields sorted by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// A type description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// Bool, Number, String, Blob, Type, or Value (the any-type).
    Primitive(Kind),
    List(Box<Type>),
    Set(Box<Type>),
    Ref(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Union(Vec<Type>),
    Struct(StructType),
    /// Back reference to the k-th enclosing struct constructor.
    Cycle(u64),
}

impl Type {
    pub const BOOL: Type = Type::Primitive(Kind::Bool);
    pub const NUMBER: Type = Type::Primitive(Kind::Number);
    pub const STRING: Type = Type::Primitive(Kind::String);
    pub const BLOB: Type = Type::Primitive(Kind::Blob);
    pub const VALUE: Type = Type::Primitive(Kind::Value);

    /// The kind this type describes.
    pub fn kind(&self) -> Kind {
        match self {
            Type::Primitive(k) => *k,
            Type::List(_) => Kind::List,
            Type::Set(_) => Kind::Set,
            Type::Ref(_) => Kind::Ref,
            Type::Map(_, _) => Kind::Map,
            Type::Union(_) => Kind::Union,
            Type::Struct(_) => Kind::Struct,
            Type::Cycle(_) => Kind::Cycle,
        }
    }

    /// Union of member types: flattened, deduplicated, sorted into the
    /// canonical (encoded-byte) order. An empty input stays an empty
    /// union; a single distinct member collapses to itself.
    pub fn union_of(members: Vec<Type>) -> Type {
        let mut flat = Vec::new();
        for m in members {
            match m {
                Type::Union(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        let mut keyed: Vec<(Vec<u8>, Type)> = flat
            .into_iter()
            .map(|t| (codec::encode_type(&t), t))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        let mut flat: Vec<Type> = keyed.into_iter().map(|(_, t)| t).collect();
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Type::Union(flat)
    }

    /// Element type of a homogeneous container type, unfolding one level
    /// of union. `Map` yields its value side; use [`Type::map_entry_types`]
    /// for both sides.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::List(e) | Type::Set(e) | Type::Ref(e) => Some(e),
            Type::Map(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn map_entry_types(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Map(k, v) => Some((k, v)),
            _ => None,
        }
    }

    /// Structural conformance with cycle unfolding: `self` conforms to
    /// `pattern` if they match shape for shape, where a `Cycle(k)` in the
    /// pattern matches a struct named like the pattern's k-th enclosing
    /// struct (or another cycle of the same depth), and `Value` in the
    /// pattern matches anything. Unions on the checked side conform when
    /// every member does.
    pub fn conforms_to(&self, pattern: &Type) -> bool {
        self.conforms_inner(pattern, &mut Vec::new(), &mut Vec::new())
    }

    fn conforms_inner<'a>(
        &'a self,
        pattern: &'a Type,
        self_stack: &mut Vec<&'a str>,
        pattern_stack: &mut Vec<&'a str>,
    ) -> bool {
        if matches!(pattern, Type::Primitive(Kind::Value)) {
            return true;
        }
        if let Type::Union(members) = self {
            return members
                .iter()
                .all(|m| m.conforms_inner(pattern, self_stack, pattern_stack));
        }
        match (self, pattern) {
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::List(a), Type::List(b))
            | (Type::Set(a), Type::Set(b))
            | (Type::Ref(a), Type::Ref(b)) => a.conforms_inner(b, self_stack, pattern_stack),
            (Type::Map(ak, av), Type::Map(bk, bv)) => {
                ak.conforms_inner(bk, self_stack, pattern_stack)
                    && av.conforms_inner(bv, self_stack, pattern_stack)
            }
            (Type::Union(_), _) => false, // handled above
            (_, Type::Union(members)) => members
                .iter()
                .any(|m| self.conforms_inner(m, self_stack, pattern_stack)),
            (Type::Struct(a), Type::Struct(b)) => {
                if a.name != b.name || a.fields.len() != b.fields.len() {
                    return false;
                }
                self_stack.push(&a.name);
                pattern_stack.push(&b.name);
                let ok = a.fields.iter().zip(b.fields.iter()).all(
                    |((an, at), (bn, bt))| {
                        an == bn && at.conforms_inner(bt, self_stack, pattern_stack)
                    },
                );
                self_stack.pop();
                pattern_stack.pop();
                ok
            }
            // A concrete struct on the checked side matches a pattern
            // cycle when it is the struct the cycle refers back to.
            (Type::Struct(a), Type::Cycle(k)) => {
                let depth = pattern_stack.len();
                *k < depth as u64
                    && pattern_stack[depth - 1 - *k as usize] == a.name
            }
            (Type::Cycle(a), Type::Cycle(b)) => a == b,
            // A cycle on the checked side refers to an enclosing struct;
            // it matches a pattern struct of that name.
            (Type::Cycle(k), Type::Struct(b)) => {
                let depth = self_stack.len();
                *k < depth as u64 && self_stack[depth - 1 - *k as usize] == b.name
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Primitive(k) => write!(f, "{k}"),
            Type::List(e) => write!(f, "List<{e}>"),
            Type::Set(e) => write!(f, "Set<{e}>"),
            Type::Ref(e) => write!(f, "Ref<{e}>"),
            Type::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            Type::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "Union<{}>", parts.join(" | "))
            }
            Type::Struct(st) => {
                write!(f, "Struct {} {{", st.name)?;
                for (i, (name, t)) in st.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {t}")?;
                }
                write!(f, " }}")
            }
            Type::Cycle(k) => write!(f, "Cycle<{k}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_pattern() -> Type {
        Type::Struct(StructType {
            name: "Commit".into(),
            fields: vec![
                ("meta".into(), Type::VALUE),
                (
                    "parents".into(),
                    Type::Set(Box::new(Type::Ref(Box::new(Type::Cycle(0))))),
                ),
                ("value".into(), Type::VALUE),
            ],
        })
    }

    // -------------------------------------------------------------------
    // Union construction
    // -------------------------------------------------------------------

    #[test]
    fn union_flattens_and_dedupes() {
        let u = Type::union_of(vec![
            Type::NUMBER,
            Type::Union(vec![Type::STRING, Type::NUMBER]),
            Type::STRING,
        ]);
        match &u {
            Type::Union(members) => assert_eq!(members.len(), 2),
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn union_of_one_collapses() {
        assert_eq!(Type::union_of(vec![Type::NUMBER]), Type::NUMBER);
        assert_eq!(
            Type::union_of(vec![Type::NUMBER, Type::NUMBER]),
            Type::NUMBER
        );
    }

    #[test]
    fn union_of_none_is_the_empty_union() {
        assert_eq!(Type::union_of(vec![]), Type::Union(vec![]));
    }

    #[test]
    fn union_order_is_canonical() {
        let a = Type::union_of(vec![Type::NUMBER, Type::STRING]);
        let b = Type::union_of(vec![Type::STRING, Type::NUMBER]);
        assert_eq!(a, b);
    }

    // -------------------------------------------------------------------
    // Conformance
    // -------------------------------------------------------------------

    #[test]
    fn value_pattern_matches_anything() {
        assert!(Type::NUMBER.conforms_to(&Type::VALUE));
        assert!(commit_pattern().conforms_to(&Type::VALUE));
    }

    #[test]
    fn primitive_conformance_is_equality() {
        assert!(Type::NUMBER.conforms_to(&Type::NUMBER));
        assert!(!Type::NUMBER.conforms_to(&Type::STRING));
    }

    #[test]
    fn commit_with_no_parents_conforms() {
        // A first commit's parents set is empty, typed Set<Union<>>; its
        // own struct type still conforms because the pattern's field
        // types are matched one by one.
        let t = Type::Struct(StructType {
            name: "Commit".into(),
            fields: vec![
                ("meta".into(), Type::Struct(StructType { name: "".into(), fields: vec![] })),
                (
                    "parents".into(),
                    Type::Set(Box::new(Type::union_of(vec![]))),
                ),
                ("value".into(), Type::NUMBER),
            ],
        });
        // Set<Union<>> vs Set<Ref<Cycle 0>>: an empty union conforms to
        // anything element-wise (no members to violate it).
        assert!(t.conforms_to(&commit_pattern()));
    }

    #[test]
    fn commit_with_cycle_typed_parents_conforms() {
        let t = Type::Struct(StructType {
            name: "Commit".into(),
            fields: vec![
                ("meta".into(), Type::Struct(StructType { name: "".into(), fields: vec![] })),
                (
                    "parents".into(),
                    Type::Set(Box::new(Type::Ref(Box::new(Type::Cycle(0))))),
                ),
                ("value".into(), Type::STRING),
            ],
        });
        assert!(t.conforms_to(&commit_pattern()));
    }

    #[test]
    fn wrong_name_does_not_conform() {
        let t = Type::Struct(StructType {
            name: "NotACommit".into(),
            fields: vec![
                ("meta".into(), Type::VALUE),
                (
                    "parents".into(),
                    Type::Set(Box::new(Type::Ref(Box::new(Type::Cycle(0))))),
                ),
                ("value".into(), Type::VALUE),
            ],
        });
        assert!(!t.conforms_to(&commit_pattern()));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(
            Type::Map(Box::new(Type::STRING), Box::new(Type::NUMBER)).to_string(),
            "Map<String, Number>"
        );
        assert_eq!(Type::Cycle(0).to_string(), "Cycle<0>");
    }
}
