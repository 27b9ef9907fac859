/// The one-byte tag opening every encoded value, and the first
/// discriminator in type descriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Kind {
    Bool = 0,
    Number = 1,
    String = 2,
    Blob = 3,
    List = 4,
    Map = 5,
    Set = 6,
    Ref = 7,
    Struct = 8,
    Type = 9,
    Cycle = 10,
    Union = 11,
    Value = 12,
}

impl Kind {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Bool,
            1 => Self::Number,
            2 => Self::String,
            3 => Self::Blob,
            4 => Self::List,
            5 => Self::Map,
            6 => Self::Set,
            7 => Self::Ref,
            8 => Self::Struct,
            9 => Self::Type,
            10 => Self::Cycle,
            11 => Self::Union,
            12 => Self::Value,
            _ => return None,
        })
    }

    /// Kinds whose values order by their content rather than by address
    /// when used as collection keys.
    pub fn is_ordered_by_value(self) -> bool {
        matches!(self, Self::Bool | Self::Number | Self::String)
    }

    /// Kinds represented as chunked prolly sequences.
    pub fn is_sequence(self) -> bool {
        matches!(self, Self::Blob | Self::List | Self::Map | Self::Set)
    }

    /// Kinds the structural diff descends into. Refs are compared by
    /// address like primitives.
    pub fn is_container(self) -> bool {
        matches!(self, Self::List | Self::Map | Self::Set | Self::Struct)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "Bool",
            Self::Number => "Number",
            Self::String => "String",
            Self::Blob => "Blob",
            Self::List => "List",
            Self::Map => "Map",
            Self::Set => "Set",
            Self::Ref => "Ref",
            Self::Struct => "Struct",
            Self::Type => "Type",
            Self::Cycle => "Cycle",
            Self::Union => "Union",
            Self::Value => "Value",
        };
        f.write_str(name)
    }
}
