use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod identity;

pub use identity::Identity;

/// Row id of an identity in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurrogateId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    Field,
    Method,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 3] = [SymbolKind::Class, SymbolKind::Field, SymbolKind::Method];

    /// Stable discriminator persisted with each symbol row.
    pub fn tag(&self) -> &'static str {
        match self {
            SymbolKind::Class => "java.class.name",
            SymbolKind::Field => "java.field.name",
            SymbolKind::Method => "java.method.name",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Field => "field",
            SymbolKind::Method => "method",
        }
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "class" => Ok(SymbolKind::Class),
            "field" => Ok(SymbolKind::Field),
            "method" => Ok(SymbolKind::Method),
            _ => Self::from_tag(s).ok_or_else(|| format!("unknown symbol kind: {}", s)),
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the rename engine treats a reference when its target is renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameEffect {
    /// Rewrite the referencing file's bytecode.
    RewriteSource,
    /// Rewrite the file and rename it after the new simple class name.
    RewriteAndRenameFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    ClassFile,
    Superclass,
    Interface,
    TypeInstruction,
    FieldInstruction,
    MethodInstruction,
    InvokeDynamicField,
    InvokeDynamicMethod,
    ReturnType,
    ParameterType,
    ClassConstant,
    AnnotationType,
    AnnotationValue,
    CatchType,
    ThrowsType,
    SignatureType,
    LocalVariableType,
    NestedClass,
    EnclosingClass,
    EnclosingMethod,
    RecordComponent,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 21] = [
        ReferenceKind::ClassFile,
        ReferenceKind::Superclass,
        ReferenceKind::Interface,
        ReferenceKind::TypeInstruction,
        ReferenceKind::FieldInstruction,
        ReferenceKind::MethodInstruction,
        ReferenceKind::InvokeDynamicField,
        ReferenceKind::InvokeDynamicMethod,
        ReferenceKind::ReturnType,
        ReferenceKind::ParameterType,
        ReferenceKind::ClassConstant,
        ReferenceKind::AnnotationType,
        ReferenceKind::AnnotationValue,
        ReferenceKind::CatchType,
        ReferenceKind::ThrowsType,
        ReferenceKind::SignatureType,
        ReferenceKind::LocalVariableType,
        ReferenceKind::NestedClass,
        ReferenceKind::EnclosingClass,
        ReferenceKind::EnclosingMethod,
        ReferenceKind::RecordComponent,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ReferenceKind::ClassFile => "java.class.file",
            ReferenceKind::Superclass => "java.class.super",
            ReferenceKind::Interface => "java.class.interface",
            ReferenceKind::TypeInstruction => "java.insn.type",
            ReferenceKind::FieldInstruction => "java.insn.field",
            ReferenceKind::MethodInstruction => "java.insn.method",
            ReferenceKind::InvokeDynamicField => "java.indy.field",
            ReferenceKind::InvokeDynamicMethod => "java.indy.method",
            ReferenceKind::ReturnType => "java.type.return",
            ReferenceKind::ParameterType => "java.type.parameter",
            ReferenceKind::ClassConstant => "java.ldc.class",
            ReferenceKind::AnnotationType => "java.annotation.type",
            ReferenceKind::AnnotationValue => "java.annotation.value",
            ReferenceKind::CatchType => "java.insn.catch",
            ReferenceKind::ThrowsType => "java.method.throws",
            ReferenceKind::SignatureType => "java.type.signature",
            ReferenceKind::LocalVariableType => "java.type.local",
            ReferenceKind::NestedClass => "java.class.nest",
            ReferenceKind::EnclosingClass => "java.class.enclosing",
            ReferenceKind::EnclosingMethod => "java.method.enclosing",
            ReferenceKind::RecordComponent => "java.record.component",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Kind of symbol this reference points at.
    pub fn target_kind(&self) -> SymbolKind {
        match self {
            ReferenceKind::FieldInstruction | ReferenceKind::InvokeDynamicField => {
                SymbolKind::Field
            }
            ReferenceKind::MethodInstruction
            | ReferenceKind::InvokeDynamicMethod
            | ReferenceKind::EnclosingMethod => SymbolKind::Method,
            _ => SymbolKind::Class,
        }
    }

    pub fn rename_effect(&self) -> RenameEffect {
        match self {
            ReferenceKind::ClassFile => RenameEffect::RewriteAndRenameFile,
            _ => RenameEffect::RewriteSource,
        }
    }

    /// References resolved at run time through a bootstrap method.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            ReferenceKind::InvokeDynamicField | ReferenceKind::InvokeDynamicMethod
        )
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A declared or referenced class, field, or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub identity: Identity,
    /// Internal name for classes, simple name for members.
    pub name: String,
    /// Declaring file; `None` for placeholders.
    pub file: Option<FileId>,
    /// Owning class of a field or method.
    pub owner: Option<Identity>,
    pub access: u16,
    pub signature: Option<String>,
}

impl Symbol {
    pub fn placeholder_class(internal_name: &str) -> Self {
        Symbol {
            kind: SymbolKind::Class,
            identity: identity::class_identity(internal_name),
            name: internal_name.replace('.', "/"),
            file: None,
            owner: None,
            access: 0,
            signature: None,
        }
    }

    pub fn placeholder_field(owner: &str, name: &str, descriptor: &str) -> Self {
        let owner = identity::class_identity(owner);
        Symbol {
            kind: SymbolKind::Field,
            identity: identity::field_identity(&owner, name, descriptor),
            name: name.to_string(),
            file: None,
            owner: Some(owner),
            access: 0,
            signature: None,
        }
    }

    pub fn placeholder_method(owner: &str, name: &str, descriptor: &str) -> Self {
        let owner = identity::class_identity(owner);
        Symbol {
            kind: SymbolKind::Method,
            identity: identity::method_identity(&owner, name, descriptor),
            name: name.to_string(),
            file: None,
            owner: Some(owner),
            access: 0,
            signature: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.file.is_none()
    }

    /// Only declarations inside the workspace can be renamed, and never
    /// constructors or static initializers.
    pub fn can_be_renamed(&self) -> bool {
        self.file.is_some()
            && !(self.kind == SymbolKind::Method && self.name.starts_with('<'))
    }
}

/// A use of a symbol from inside a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub file: FileId,
    pub target: Identity,
    /// Class or member the use occurs in.
    pub owner: Identity,
    /// Bytecode offset inside the owning method.
    pub location: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSymbol {
    pub id: SymbolId,
    pub identity_id: SurrogateId,
    #[serde(flatten)]
    pub symbol: Symbol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReference {
    pub id: ReferenceId,
    #[serde(flatten)]
    pub reference: Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Workspace-relative path; archive entries are `<archive path>/<entry>`.
    pub path: String,
    pub name: String,
    pub archive: Option<FileId>,
    pub is_directory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in ReferenceKind::ALL {
            assert_eq!(ReferenceKind::from_tag(kind.tag()), Some(kind));
        }
        for kind in SymbolKind::ALL {
            assert_eq!(SymbolKind::from_tag(kind.tag()), Some(kind));
            assert_eq!(kind.as_str().parse::<SymbolKind>(), Ok(kind));
        }
        assert_eq!(ReferenceKind::from_tag("java.insn.bogus"), None);
    }

    #[test]
    fn test_only_class_file_references_rename_files() {
        for kind in ReferenceKind::ALL {
            let expected = if kind == ReferenceKind::ClassFile {
                RenameEffect::RewriteAndRenameFile
            } else {
                RenameEffect::RewriteSource
            };
            assert_eq!(kind.rename_effect(), expected);
        }
    }

    #[test]
    fn test_placeholders_cannot_be_renamed() {
        let class = Symbol::placeholder_class("java/lang/Object");
        assert!(class.is_placeholder());
        assert!(!class.can_be_renamed());

        let mut init = Symbol::placeholder_method("com/x/Foo", "<init>", "()V");
        init.file = Some(FileId(1));
        assert!(!init.can_be_renamed());

        let mut baz = Symbol::placeholder_method("com/x/Foo", "baz", "()V");
        baz.file = Some(FileId(1));
        assert!(baz.can_be_renamed());
        assert_eq!(baz.identity.as_str(), "com/x/Foo::baz()V");
    }
}
