use unicode_general_category::{GeneralCategory, get_general_category};

use crate::*;

/// The kinds of schema object DDL can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObjectType {
    Unknown = 0,
    Universe = 1,
    Space = 2,
    Function = 3,
    User = 4,
    Role = 5,
    Sequence = 6,
    Collation = 7,
}

const OBJECT_TYPES: [SchemaObjectType; 8] = [
    SchemaObjectType::Unknown,
    SchemaObjectType::Universe,
    SchemaObjectType::Space,
    SchemaObjectType::Function,
    SchemaObjectType::User,
    SchemaObjectType::Role,
    SchemaObjectType::Sequence,
    SchemaObjectType::Collation,
];

impl SchemaObjectType {
    /// Case-sensitive lookup. Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> SchemaObjectType {
        OBJECT_TYPES
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .unwrap_or(SchemaObjectType::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            SchemaObjectType::Unknown => "unknown",
            SchemaObjectType::Universe => "universe",
            SchemaObjectType::Space => "space",
            SchemaObjectType::Function => "function",
            SchemaObjectType::User => "user",
            SchemaObjectType::Role => "role",
            SchemaObjectType::Sequence => "sequence",
            SchemaObjectType::Collation => "collation",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> SchemaObjectType {
        OBJECT_TYPES
            .get(code as usize)
            .copied()
            .unwrap_or(SchemaObjectType::Unknown)
    }
}

/// Longest accepted object name, in bytes.
pub const NAME_MAX: usize = 65000;

/// Validates object names. Owned by the `Database` and handed to
/// whatever creates or renames objects.
#[derive(Debug, Clone)]
pub struct IdentifierChecker {
    max_len: usize,
}

impl Default for IdentifierChecker {
    fn default() -> IdentifierChecker {
        IdentifierChecker { max_len: NAME_MAX }
    }
}

impl IdentifierChecker {
    pub fn new(max_len: usize) -> IdentifierChecker {
        IdentifierChecker { max_len }
    }

    /// Whether `name` may name an object: non-empty, at most `max_len`
    /// bytes of UTF-8, and free of U+FFFD, unassigned code points,
    /// control characters and line or paragraph separators. The empty
    /// name is refused even though no character rule excludes it.
    pub fn is_valid(&self, name: &[u8]) -> bool {
        if name.is_empty() || name.len() > self.max_len {
            return false;
        }
        let Ok(name) = std::str::from_utf8(name) else {
            return false;
        };
        name.chars().all(|c| {
            c != char::REPLACEMENT_CHARACTER
                && !matches!(
                    get_general_category(c),
                    GeneralCategory::Unassigned
                        | GeneralCategory::LineSeparator
                        | GeneralCategory::Control
                        | GeneralCategory::ParagraphSeparator
                )
        })
    }

    pub fn check(&self, name: &str) -> Result<()> {
        if self.is_valid(name.as_bytes()) {
            Ok(())
        } else {
            Err(Error::InvalidIdentifier(name.to_owned()))
        }
    }
}
