use super::bytes::{ByteReader, ByteWriter};
use super::ClassParseError;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Method handle kinds (JVMS 4.4.8).
pub mod handle_kind {
    pub const GET_FIELD: u8 = 1;
    pub const GET_STATIC: u8 = 2;
    pub const PUT_FIELD: u8 = 3;
    pub const PUT_STATIC: u8 = 4;
    pub const INVOKE_VIRTUAL: u8 = 5;
    pub const INVOKE_STATIC: u8 = 6;
    pub const INVOKE_SPECIAL: u8 = 7;
    pub const NEW_INVOKE_SPECIAL: u8 = 8;
    pub const INVOKE_INTERFACE: u8 = 9;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    /// Raw IEEE-754 bits, so constants compare bytewise.
    Float(u32),
    Long(i64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
    /// Slot 0 and the second slot of a `Long`/`Double`.
    Unusable,
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    /// Constant pool indices this entry points at.
    pub fn children(&self) -> Vec<u16> {
        match *self {
            Constant::Class { name_index }
            | Constant::Module { name_index }
            | Constant::Package { name_index } => vec![name_index],
            Constant::String { string_index } => vec![string_index],
            Constant::MethodType { descriptor_index } => vec![descriptor_index],
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => vec![class_index, name_and_type_index],
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => vec![name_index, descriptor_index],
            Constant::MethodHandle {
                reference_index, ..
            } => vec![reference_index],
            Constant::Dynamic {
                name_and_type_index,
                ..
            }
            | Constant::InvokeDynamic {
                name_and_type_index,
                ..
            } => vec![name_and_type_index],
            _ => Vec::new(),
        }
    }
}

/// Which constant kind a member reference was stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `Fieldref`/`Methodref`/`InterfaceMethodref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberRefKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// The class-file constant pool.
///
/// The `add_*` constructors are find-or-add: they return the index of an
/// equal entry when one exists and only append otherwise. Entries are never
/// rewritten in place by callers outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    pub(crate) fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        if count == 0 {
            return Err(ClassParseError::InvalidConstantIndex { index: 0 });
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(decode_modified_utf8(bytes)?)
                }
                TAG_INTEGER => Constant::Integer(reader.read_u4()? as i32),
                TAG_FLOAT => Constant::Float(reader.read_u4()?),
                TAG_LONG => Constant::Long(reader.read_u8()? as i64),
                TAG_DOUBLE => Constant::Double(reader.read_u8()?),
                TAG_CLASS => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                TAG_STRING => Constant::String {
                    string_index: reader.read_u2()?,
                },
                TAG_FIELDREF => Constant::Fieldref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_METHODREF => Constant::Methodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_MODULE => Constant::Module {
                    name_index: reader.read_u2()?,
                },
                TAG_PACKAGE => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };

            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                // a wide constant in the last slot overruns the declared count
                if entries.len() >= count {
                    return Err(ClassParseError::InvalidConstantIndex {
                        index: entries.len() as u16,
                    });
                }
                entries.push(Constant::Unusable);
            }
        }

        Ok(Self { entries })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) {
        writer.write_u2(self.entries.len() as u16);
        for entry in &self.entries {
            match entry {
                Constant::Unusable => {}
                Constant::Utf8(value) => {
                    let bytes = encode_modified_utf8(value);
                    writer.write_u1(TAG_UTF8);
                    writer.write_u2(bytes.len() as u16);
                    writer.write_bytes(&bytes);
                }
                Constant::Integer(value) => {
                    writer.write_u1(TAG_INTEGER);
                    writer.write_u4(*value as u32);
                }
                Constant::Float(bits) => {
                    writer.write_u1(TAG_FLOAT);
                    writer.write_u4(*bits);
                }
                Constant::Long(value) => {
                    writer.write_u1(TAG_LONG);
                    writer.write_u8(*value as u64);
                }
                Constant::Double(bits) => {
                    writer.write_u1(TAG_DOUBLE);
                    writer.write_u8(*bits);
                }
                Constant::Class { name_index } => {
                    writer.write_u1(TAG_CLASS);
                    writer.write_u2(*name_index);
                }
                Constant::String { string_index } => {
                    writer.write_u1(TAG_STRING);
                    writer.write_u2(*string_index);
                }
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                } => {
                    writer.write_u1(TAG_FIELDREF);
                    writer.write_u2(*class_index);
                    writer.write_u2(*name_and_type_index);
                }
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                } => {
                    writer.write_u1(TAG_METHODREF);
                    writer.write_u2(*class_index);
                    writer.write_u2(*name_and_type_index);
                }
                Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    writer.write_u1(TAG_INTERFACE_METHODREF);
                    writer.write_u2(*class_index);
                    writer.write_u2(*name_and_type_index);
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    writer.write_u1(TAG_NAME_AND_TYPE);
                    writer.write_u2(*name_index);
                    writer.write_u2(*descriptor_index);
                }
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    writer.write_u1(TAG_METHOD_HANDLE);
                    writer.write_u1(*reference_kind);
                    writer.write_u2(*reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    writer.write_u1(TAG_METHOD_TYPE);
                    writer.write_u2(*descriptor_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    writer.write_u1(TAG_DYNAMIC);
                    writer.write_u2(*bootstrap_method_attr_index);
                    writer.write_u2(*name_and_type_index);
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    writer.write_u1(TAG_INVOKE_DYNAMIC);
                    writer.write_u2(*bootstrap_method_attr_index);
                    writer.write_u2(*name_and_type_index);
                }
                Constant::Module { name_index } => {
                    writer.write_u1(TAG_MODULE);
                    writer.write_u2(*name_index);
                }
                Constant::Package { name_index } => {
                    writer.write_u1(TAG_PACKAGE);
                    writer.write_u2(*name_index);
                }
            }
        }
    }

    /// `constant_pool_count`: number of slots including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Iterate `(index, constant)` over usable slots.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassParseError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => {
                Err(ClassParseError::InvalidConstantIndex { index })
            }
            Some(constant) => Ok(constant),
        }
    }

    pub(crate) fn get_mut(&mut self, index: u16) -> Result<&mut Constant, ClassParseError> {
        match self.entries.get_mut(index as usize) {
            Some(Constant::Unusable) | None => {
                Err(ClassParseError::InvalidConstantIndex { index })
            }
            Some(constant) => Ok(constant),
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len.max(1));
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassParseError> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassParseError> {
        let (kind, class_index, nat_index) = match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            } => (MemberRefKind::Field, *class_index, *name_and_type_index),
            Constant::Methodref {
                class_index,
                name_and_type_index,
            } => (MemberRefKind::Method, *class_index, *name_and_type_index),
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (
                MemberRefKind::InterfaceMethod,
                *class_index,
                *name_and_type_index,
            ),
            _ => return Err(ClassParseError::InvalidConstantIndex { index }),
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef {
            kind,
            owner,
            name,
            descriptor,
        })
    }

    fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| c == constant)
            .map(|i| i as u16)
    }

    fn push(&mut self, constant: Constant) -> Result<u16, ClassParseError> {
        let width = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + width > u16::MAX as usize {
            return Err(ClassParseError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if width == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    fn find_or_push(&mut self, constant: Constant) -> Result<u16, ClassParseError> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ClassParseError> {
        if encode_modified_utf8(value).len() > u16::MAX as usize {
            return Err(ClassParseError::Utf8TooLong);
        }
        self.find_or_push(Constant::Utf8(value.to_string()))
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16, ClassParseError> {
        self.find_or_push(Constant::Integer(value))
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ClassParseError> {
        let name_index = self.add_utf8(internal_name)?;
        self.find_or_push(Constant::Class { name_index })
    }

    pub fn add_string(&mut self, value: &str) -> Result<u16, ClassParseError> {
        let string_index = self.add_utf8(value)?;
        self.find_or_push(Constant::String { string_index })
    }

    pub fn add_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.find_or_push(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn add_field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn add_interface_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::InterfaceMethodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn add_method_handle(
        &mut self,
        reference_kind: u8,
        reference_index: u16,
    ) -> Result<u16, ClassParseError> {
        self.find_or_push(Constant::MethodHandle {
            reference_kind,
            reference_index,
        })
    }

    pub fn add_method_type(&mut self, descriptor: &str) -> Result<u16, ClassParseError> {
        let descriptor_index = self.add_utf8(descriptor)?;
        self.find_or_push(Constant::MethodType { descriptor_index })
    }

    pub fn add_invoke_dynamic(
        &mut self,
        bootstrap_method_attr_index: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        })
    }
}

/// Decode the JVM's modified UTF-8 (`\0` as `C0 80`, supplementary
/// characters as surrogate pairs).
fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassParseError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let continuation = |b: Option<&u8>| -> Result<u16, ClassParseError> {
        match b {
            Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
            _ => Err(ClassParseError::InvalidUtf8),
        }
    };
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            if b == 0 {
                return Err(ClassParseError::InvalidUtf8);
            }
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let low = continuation(bytes.get(i + 1))?;
            units.push(((b & 0x1F) as u16) << 6 | low);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let mid = continuation(bytes.get(i + 1))?;
            let low = continuation(bytes.get(i + 2))?;
            units.push(((b & 0x0F) as u16) << 12 | mid << 6 | low);
            i += 3;
        } else {
            return Err(ClassParseError::InvalidUtf8);
        }
    }
    String::from_utf16(&units).map_err(|_| ClassParseError::InvalidUtf8)
}

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_find_or_add() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("com/x/Foo").unwrap();
        let b = pool.add_class("com/x/Foo").unwrap();
        assert_eq!(a, b);
        // utf8 + class
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.class_name(a).unwrap(), "com/x/Foo");
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let index = pool
            .add_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
            .unwrap();
        let member = pool.member_ref(index).unwrap();
        assert_eq!(member.kind, MemberRefKind::Method);
        assert_eq!(member.owner, "java/io/PrintStream");
        assert_eq!(member.name, "println");
        assert_eq!(member.descriptor, "(Ljava/lang/String;)V");
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.push(Constant::Long(42)).unwrap();
        let next = pool.add_utf8("after").unwrap();
        assert_eq!(next, long + 2);
        assert!(pool.get(long + 1).is_err());

        let mut writer = ByteWriter::default();
        pool.write(&mut writer);
        let bytes = writer.into_inner();
        let parsed = ConstantPool::parse(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(parsed, pool);
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let value = "a\0b\u{1F600}";
        let encoded = encode_modified_utf8(value);
        assert_eq!(&encoded[1..3], &[0xC0, 0x80]);
        // surrogate pair, three bytes each
        assert_eq!(encoded.len(), 1 + 2 + 1 + 6);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), value);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let bytes = [0x00, 0x02, 0x63];
        let err = ConstantPool::parse(&mut ByteReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ClassParseError::UnsupportedConstant { tag: 0x63 }));
    }
}
