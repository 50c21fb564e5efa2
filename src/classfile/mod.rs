//! JVM class-file model: parse, inspect, mutate, and write back.
//!
//! The reader keeps everything it does not understand as raw attribute
//! bytes, so `ClassFile::parse(b)?.to_bytes()` reproduces `b` exactly for any
//! well-formed input.

mod bytes;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
mod usage;

use thiserror::Error;

use bytes::{ByteReader, ByteWriter};
pub use code::{CodeBuilder, Instruction, Instructions};
pub use constant_pool::{handle_kind, Constant, ConstantPool, MemberRef, MemberRefKind};
pub use usage::trim_unused_constants;

/// Leading four bytes of every class file.
pub const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

pub fn has_class_magic(content: &[u8]) -> bool {
    content.len() >= 4 && content[..4] == MAGIC
}

pub mod access {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_ANNOTATION: u16 = 0x2000;
    pub const ACC_ENUM: u16 = 0x4000;
}

#[derive(Debug, Error)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid modified UTF-8 in constant pool")]
    InvalidUtf8,
    #[error("string constant exceeds 65535 encoded bytes")]
    Utf8TooLong,
    #[error("malformed descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidInstruction { offset: usize, opcode: u8 },
    #[error("constant pool is full")]
    ConstantPoolOverflow,
    #[error("{count} trailing bytes after structure")]
    TrailingBytes { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    /// Zero only for `java/lang/Object` and `module-info`.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: AttributeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    Signature { signature_index: u16 },
    /// `RuntimeVisibleAnnotations` or `RuntimeInvisibleAnnotations`.
    Annotations(Vec<Annotation>),
    ParameterAnnotations(Vec<Vec<Annotation>>),
    AnnotationDefault(ElementValue),
    BootstrapMethods(Vec<BootstrapMethod>),
    /// `LocalVariableTable`; `LocalVariableTypeTable` stores signatures in
    /// the descriptor slot.
    LocalVariables(Vec<LocalVariable>),
    EnclosingMethod { class_index: u16, method_index: u16 },
    /// `Exceptions` on a method; `NestMembers` or `PermittedSubclasses` on
    /// a class. Each entry is a `Class` index.
    Classes(Vec<u16>),
    NestHost { host_class_index: u16 },
    InnerClasses(Vec<InnerClass>),
    Record(Vec<RecordComponent>),
    /// `RuntimeVisibleTypeAnnotations` or `RuntimeInvisibleTypeAnnotations`.
    TypeAnnotations(Vec<TypeAnnotation>),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(&self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Utf8 index of the annotation's field descriptor (`Lcom/x/Ann;`).
    pub type_index: u16,
    pub elements: Vec<ElementPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPair {
    pub name_index: u16,
    pub value: ElementValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    Const { tag: u8, const_value_index: u16 },
    Enum { type_name_index: u16, const_name_index: u16 },
    /// Utf8 index of a return descriptor (`Ljava/lang/String;`, `V`, `[I`).
    Class { class_info_index: u16 },
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    pub method_ref: u16,
    pub arguments: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class_info_index: u16,
    /// Zero for local and anonymous classes.
    pub outer_class_info_index: u16,
    /// Zero for anonymous classes.
    pub inner_name_index: u16,
    pub inner_class_access_flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordComponent {
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    pub target_type: u8,
    /// `target_info` and `type_path`, kept as read.
    pub target: Vec<u8>,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

impl ClassFile {
    /// An empty class at major version 52 (Java 8).
    pub fn new(
        access_flags: u16,
        name: &str,
        super_name: Option<&str>,
    ) -> Result<Self, ClassParseError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.add_class(name)?;
        let super_class = match super_name {
            Some(super_name) => constant_pool.add_class(super_name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn parse(content: &[u8]) -> Result<Self, ClassParseError> {
        let mut reader = ByteReader::new(content);
        reader.expect_magic()?;
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;

        let interfaces_count = reader.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(reader.read_u2()?);
        }

        let fields = parse_members(&mut reader, &constant_pool)?;
        let methods = parse_members(&mut reader, &constant_pool)?;
        let attributes = parse_attributes(&mut reader, &constant_pool)?;
        reader.expect_end()?;

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // a dangling this_class is a parse error
        class.name()?;
        Ok(class)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(1024);
        writer.write_bytes(&MAGIC);
        writer.write_u2(self.minor_version);
        writer.write_u2(self.major_version);
        self.constant_pool.write(&mut writer);
        writer.write_u2(self.access_flags);
        writer.write_u2(self.this_class);
        writer.write_u2(self.super_class);
        writer.write_len_u2(self.interfaces.len());
        for interface in &self.interfaces {
            writer.write_u2(*interface);
        }
        write_members(&mut writer, &self.fields);
        write_members(&mut writer, &self.methods);
        write_attributes(&mut writer, &self.attributes);
        writer.into_inner()
    }

    pub fn name(&self) -> Result<&str, ClassParseError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, ClassParseError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, ClassParseError> {
        self.interfaces
            .iter()
            .map(|index| self.constant_pool.class_name(*index))
            .collect()
    }

    pub fn signature(&self) -> Result<Option<&str>, ClassParseError> {
        find_signature(&self.constant_pool, &self.attributes)
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        annotations_of(&self.attributes)
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        self.attributes
            .iter()
            .find_map(|attribute| match &attribute.info {
                AttributeInfo::BootstrapMethods(methods) => Some(methods.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn add_interface(&mut self, name: &str) -> Result<(), ClassParseError> {
        let index = self.constant_pool.add_class(name)?;
        self.interfaces.push(index);
        Ok(())
    }

    /// Append a field and return its position in `fields`.
    pub fn add_field(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<usize, ClassParseError> {
        let member = self.member(access_flags, name, descriptor)?;
        self.fields.push(member);
        Ok(self.fields.len() - 1)
    }

    /// Append a method and return its position in `methods`.
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<CodeAttribute>,
    ) -> Result<usize, ClassParseError> {
        let mut member = self.member(access_flags, name, descriptor)?;
        if let Some(code) = code {
            member
                .attributes
                .push(self.attribute("Code", AttributeInfo::Code(code))?);
        }
        self.methods.push(member);
        Ok(self.methods.len() - 1)
    }

    /// Build an attribute, interning its name.
    pub fn attribute(
        &mut self,
        name: &str,
        info: AttributeInfo,
    ) -> Result<Attribute, ClassParseError> {
        Ok(Attribute {
            name_index: self.constant_pool.add_utf8(name)?,
            info,
        })
    }

    /// Register a bootstrap method and return its index in the
    /// `BootstrapMethods` attribute, creating the attribute on first use.
    pub fn add_bootstrap_method(
        &mut self,
        method: BootstrapMethod,
    ) -> Result<u16, ClassParseError> {
        for attribute in &mut self.attributes {
            if let AttributeInfo::BootstrapMethods(methods) = &mut attribute.info {
                methods.push(method);
                return Ok((methods.len() - 1) as u16);
            }
        }
        let attribute = self.attribute(
            "BootstrapMethods",
            AttributeInfo::BootstrapMethods(vec![method]),
        )?;
        self.attributes.push(attribute);
        Ok(0)
    }

    fn member(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<MemberInfo, ClassParseError> {
        Ok(MemberInfo {
            access_flags,
            name_index: self.constant_pool.add_utf8(name)?,
            descriptor_index: self.constant_pool.add_utf8(descriptor)?,
            attributes: Vec::new(),
        })
    }
}

impl MemberInfo {
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ClassParseError> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ClassParseError> {
        pool.utf8(self.descriptor_index)
    }

    pub fn signature<'p>(
        &self,
        pool: &'p ConstantPool,
    ) -> Result<Option<&'p str>, ClassParseError> {
        find_signature(pool, &self.attributes)
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes
            .iter()
            .find_map(|attribute| match &attribute.info {
                AttributeInfo::Code(code) => Some(code),
                _ => None,
            })
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        annotations_of(&self.attributes)
    }
}

impl RecordComponent {
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ClassParseError> {
        pool.utf8(self.descriptor_index)
    }

    pub fn signature<'p>(
        &self,
        pool: &'p ConstantPool,
    ) -> Result<Option<&'p str>, ClassParseError> {
        find_signature(pool, &self.attributes)
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        annotations_of(&self.attributes)
    }
}

fn find_signature<'p>(
    pool: &'p ConstantPool,
    attributes: &[Attribute],
) -> Result<Option<&'p str>, ClassParseError> {
    for attribute in attributes {
        if let AttributeInfo::Signature { signature_index } = attribute.info {
            return pool.utf8(signature_index).map(Some);
        }
    }
    Ok(None)
}

fn annotations_of<'a>(attributes: &'a [Attribute]) -> impl Iterator<Item = &'a Annotation> + 'a {
    attributes
        .iter()
        .flat_map(|attribute| -> Box<dyn Iterator<Item = &'a Annotation> + 'a> {
            match &attribute.info {
                AttributeInfo::Annotations(annotations) => Box::new(annotations.iter()),
                AttributeInfo::ParameterAnnotations(parameters) => {
                    Box::new(parameters.iter().flatten())
                }
                AttributeInfo::TypeAnnotations(annotations) => {
                    Box::new(annotations.iter().map(|t| &t.annotation))
                }
                _ => Box::new(std::iter::empty()),
            }
        })
}

fn parse_members(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<MemberInfo>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name_index = reader.read_u2()?;
        let descriptor_index = reader.read_u2()?;
        pool.utf8(name_index)?;
        pool.utf8(descriptor_index)?;
        let attributes = parse_attributes(reader, pool)?;
        members.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(members)
}

fn parse_attributes(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let body = reader.read_slice(length)?;
        let info = parse_attribute_body(pool.utf8(name_index)?, body, pool)?;
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

fn parse_attribute_body(
    name: &str,
    body: &[u8],
    pool: &ConstantPool,
) -> Result<AttributeInfo, ClassParseError> {
    let mut reader = ByteReader::new(body);
    let info = match name {
        "Code" => {
            let max_stack = reader.read_u2()?;
            let max_locals = reader.read_u2()?;
            let code_length = reader.read_u4()? as usize;
            let code = reader.read_slice(code_length)?.to_vec();
            let handlers = reader.read_u2()?;
            let mut exception_table = Vec::with_capacity(handlers as usize);
            for _ in 0..handlers {
                exception_table.push(ExceptionHandler {
                    start_pc: reader.read_u2()?,
                    end_pc: reader.read_u2()?,
                    handler_pc: reader.read_u2()?,
                    catch_type: reader.read_u2()?,
                });
            }
            let attributes = parse_attributes(&mut reader, pool)?;
            AttributeInfo::Code(CodeAttribute {
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        "Signature" => AttributeInfo::Signature {
            signature_index: reader.read_u2()?,
        },
        "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
            AttributeInfo::Annotations(parse_annotations(&mut reader)?)
        }
        "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
            let parameters = reader.read_u1()?;
            let mut all = Vec::with_capacity(parameters as usize);
            for _ in 0..parameters {
                all.push(parse_annotations(&mut reader)?);
            }
            AttributeInfo::ParameterAnnotations(all)
        }
        "AnnotationDefault" => AttributeInfo::AnnotationDefault(parse_element_value(&mut reader)?),
        "BootstrapMethods" => {
            let count = reader.read_u2()?;
            let mut methods = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let method_ref = reader.read_u2()?;
                let argument_count = reader.read_u2()?;
                let mut arguments = Vec::with_capacity(argument_count as usize);
                for _ in 0..argument_count {
                    arguments.push(reader.read_u2()?);
                }
                methods.push(BootstrapMethod {
                    method_ref,
                    arguments,
                });
            }
            AttributeInfo::BootstrapMethods(methods)
        }
        "LocalVariableTable" | "LocalVariableTypeTable" => {
            let count = reader.read_u2()?;
            let mut variables = Vec::with_capacity(count as usize);
            for _ in 0..count {
                variables.push(LocalVariable {
                    start_pc: reader.read_u2()?,
                    length: reader.read_u2()?,
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                    index: reader.read_u2()?,
                });
            }
            AttributeInfo::LocalVariables(variables)
        }
        "EnclosingMethod" => AttributeInfo::EnclosingMethod {
            class_index: reader.read_u2()?,
            method_index: reader.read_u2()?,
        },
        "Exceptions" | "NestMembers" | "PermittedSubclasses" => {
            let count = reader.read_u2()?;
            let mut classes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                classes.push(reader.read_u2()?);
            }
            AttributeInfo::Classes(classes)
        }
        "NestHost" => AttributeInfo::NestHost {
            host_class_index: reader.read_u2()?,
        },
        "InnerClasses" => {
            let count = reader.read_u2()?;
            let mut classes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                classes.push(InnerClass {
                    inner_class_info_index: reader.read_u2()?,
                    outer_class_info_index: reader.read_u2()?,
                    inner_name_index: reader.read_u2()?,
                    inner_class_access_flags: reader.read_u2()?,
                });
            }
            AttributeInfo::InnerClasses(classes)
        }
        "Record" => {
            let count = reader.read_u2()?;
            let mut components = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name_index = reader.read_u2()?;
                let descriptor_index = reader.read_u2()?;
                pool.utf8(descriptor_index)?;
                components.push(RecordComponent {
                    name_index,
                    descriptor_index,
                    attributes: parse_attributes(&mut reader, pool)?,
                });
            }
            AttributeInfo::Record(components)
        }
        "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
            let count = reader.read_u2()?;
            let mut annotations = Vec::with_capacity(count as usize);
            for _ in 0..count {
                annotations.push(parse_type_annotation(&mut reader)?);
            }
            AttributeInfo::TypeAnnotations(annotations)
        }
        _ => return Ok(AttributeInfo::Raw(body.to_vec())),
    };
    reader.expect_end()?;
    Ok(info)
}

fn parse_annotations(reader: &mut ByteReader<'_>) -> Result<Vec<Annotation>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(reader)?);
    }
    Ok(annotations)
}

fn parse_type_annotation(reader: &mut ByteReader<'_>) -> Result<TypeAnnotation, ClassParseError> {
    let target_type = reader.read_u1()?;
    let start = reader.position();
    match target_type {
        // type parameter, formal parameter
        0x00 | 0x01 | 0x16 => {
            reader.read_u1()?;
        }
        // supertype, throws, catch, offset
        0x10 | 0x17 | 0x42..=0x46 => {
            reader.read_u2()?;
        }
        // type parameter bound
        0x11 | 0x12 => {
            reader.read_u2()?;
        }
        // empty
        0x13..=0x15 => {}
        // local variable ranges
        0x40 | 0x41 => {
            let ranges = reader.read_u2()?;
            reader.read_slice(ranges as usize * 6)?;
        }
        // type argument
        0x47..=0x4B => {
            reader.read_slice(3)?;
        }
        other => {
            return Err(ClassParseError::InvalidDescriptor(format!(
                "unknown type annotation target {:#04x}",
                other
            )))
        }
    }
    let path_length = reader.read_u1()?;
    reader.read_slice(path_length as usize * 2)?;
    let target = reader.consumed_since(start).to_vec();
    Ok(TypeAnnotation {
        target_type,
        target,
        annotation: parse_annotation(reader)?,
    })
}

fn parse_annotation(reader: &mut ByteReader<'_>) -> Result<Annotation, ClassParseError> {
    let type_index = reader.read_u2()?;
    let pairs = reader.read_u2()?;
    let mut elements = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        elements.push(ElementPair {
            name_index: reader.read_u2()?,
            value: parse_element_value(reader)?,
        });
    }
    Ok(Annotation {
        type_index,
        elements,
    })
}

fn parse_element_value(reader: &mut ByteReader<'_>) -> Result<ElementValue, ClassParseError> {
    let tag = reader.read_u1()?;
    Ok(match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
            tag,
            const_value_index: reader.read_u2()?,
        },
        b'e' => ElementValue::Enum {
            type_name_index: reader.read_u2()?,
            const_name_index: reader.read_u2()?,
        },
        b'c' => ElementValue::Class {
            class_info_index: reader.read_u2()?,
        },
        b'@' => ElementValue::Annotation(parse_annotation(reader)?),
        b'[' => {
            let count = reader.read_u2()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(parse_element_value(reader)?);
            }
            ElementValue::Array(values)
        }
        other => {
            return Err(ClassParseError::InvalidDescriptor(format!(
                "unknown element value tag {:?}",
                other as char
            )))
        }
    })
}

fn write_members(writer: &mut ByteWriter, members: &[MemberInfo]) {
    writer.write_len_u2(members.len());
    for member in members {
        writer.write_u2(member.access_flags);
        writer.write_u2(member.name_index);
        writer.write_u2(member.descriptor_index);
        write_attributes(writer, &member.attributes);
    }
}

fn write_attributes(writer: &mut ByteWriter, attributes: &[Attribute]) {
    writer.write_len_u2(attributes.len());
    for attribute in attributes {
        let mut body = ByteWriter::default();
        write_attribute_body(&mut body, &attribute.info);
        let body = body.into_inner();
        writer.write_u2(attribute.name_index);
        writer.write_u4(body.len() as u32);
        writer.write_bytes(&body);
    }
}

fn write_attribute_body(writer: &mut ByteWriter, info: &AttributeInfo) {
    match info {
        AttributeInfo::Code(code) => {
            writer.write_u2(code.max_stack);
            writer.write_u2(code.max_locals);
            writer.write_u4(code.code.len() as u32);
            writer.write_bytes(&code.code);
            writer.write_len_u2(code.exception_table.len());
            for handler in &code.exception_table {
                writer.write_u2(handler.start_pc);
                writer.write_u2(handler.end_pc);
                writer.write_u2(handler.handler_pc);
                writer.write_u2(handler.catch_type);
            }
            write_attributes(writer, &code.attributes);
        }
        AttributeInfo::Signature { signature_index } => writer.write_u2(*signature_index),
        AttributeInfo::Annotations(annotations) => write_annotations(writer, annotations),
        AttributeInfo::ParameterAnnotations(parameters) => {
            writer.write_u1(parameters.len() as u8);
            for annotations in parameters {
                write_annotations(writer, annotations);
            }
        }
        AttributeInfo::AnnotationDefault(value) => write_element_value(writer, value),
        AttributeInfo::BootstrapMethods(methods) => {
            writer.write_len_u2(methods.len());
            for method in methods {
                writer.write_u2(method.method_ref);
                writer.write_len_u2(method.arguments.len());
                for argument in &method.arguments {
                    writer.write_u2(*argument);
                }
            }
        }
        AttributeInfo::LocalVariables(variables) => {
            writer.write_len_u2(variables.len());
            for variable in variables {
                writer.write_u2(variable.start_pc);
                writer.write_u2(variable.length);
                writer.write_u2(variable.name_index);
                writer.write_u2(variable.descriptor_index);
                writer.write_u2(variable.index);
            }
        }
        AttributeInfo::EnclosingMethod {
            class_index,
            method_index,
        } => {
            writer.write_u2(*class_index);
            writer.write_u2(*method_index);
        }
        AttributeInfo::Classes(classes) => {
            writer.write_len_u2(classes.len());
            for class in classes {
                writer.write_u2(*class);
            }
        }
        AttributeInfo::NestHost { host_class_index } => writer.write_u2(*host_class_index),
        AttributeInfo::InnerClasses(classes) => {
            writer.write_len_u2(classes.len());
            for class in classes {
                writer.write_u2(class.inner_class_info_index);
                writer.write_u2(class.outer_class_info_index);
                writer.write_u2(class.inner_name_index);
                writer.write_u2(class.inner_class_access_flags);
            }
        }
        AttributeInfo::Record(components) => {
            writer.write_len_u2(components.len());
            for component in components {
                writer.write_u2(component.name_index);
                writer.write_u2(component.descriptor_index);
                write_attributes(writer, &component.attributes);
            }
        }
        AttributeInfo::TypeAnnotations(annotations) => {
            writer.write_len_u2(annotations.len());
            for annotation in annotations {
                writer.write_u1(annotation.target_type);
                writer.write_bytes(&annotation.target);
                write_annotation(writer, &annotation.annotation);
            }
        }
        AttributeInfo::Raw(bytes) => writer.write_bytes(bytes),
    }
}

fn write_annotations(writer: &mut ByteWriter, annotations: &[Annotation]) {
    writer.write_len_u2(annotations.len());
    for annotation in annotations {
        write_annotation(writer, annotation);
    }
}

fn write_annotation(writer: &mut ByteWriter, annotation: &Annotation) {
    writer.write_u2(annotation.type_index);
    writer.write_len_u2(annotation.elements.len());
    for pair in &annotation.elements {
        writer.write_u2(pair.name_index);
        write_element_value(writer, &pair.value);
    }
}

fn write_element_value(writer: &mut ByteWriter, value: &ElementValue) {
    match value {
        ElementValue::Const {
            tag,
            const_value_index,
        } => {
            writer.write_u1(*tag);
            writer.write_u2(*const_value_index);
        }
        ElementValue::Enum {
            type_name_index,
            const_name_index,
        } => {
            writer.write_u1(b'e');
            writer.write_u2(*type_name_index);
            writer.write_u2(*const_name_index);
        }
        ElementValue::Class { class_info_index } => {
            writer.write_u1(b'c');
            writer.write_u2(*class_info_index);
        }
        ElementValue::Annotation(annotation) => {
            writer.write_u1(b'@');
            write_annotation(writer, annotation);
        }
        ElementValue::Array(values) => {
            writer.write_u1(b'[');
            writer.write_len_u2(values.len());
            for value in values {
                write_element_value(writer, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::code::opcodes;
    use super::*;

    fn sample() -> ClassFile {
        let mut class =
            ClassFile::new(access::ACC_PUBLIC | access::ACC_SUPER, "com/x/Foo", Some("java/lang/Object"))
                .unwrap();
        class.add_interface("java/lang/Runnable").unwrap();
        class.add_field(access::ACC_PRIVATE, "bar", "I").unwrap();

        let out = class
            .constant_pool
            .add_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let text = class.constant_pool.add_string("hi").unwrap();
        let println = class
            .constant_pool
            .add_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
            .unwrap();
        let mut code = CodeBuilder::new();
        code.op_cp(opcodes::GETSTATIC, out)
            .op_cp(opcodes::LDC, text)
            .op_cp(opcodes::INVOKEVIRTUAL, println)
            .op(opcodes::RETURN);
        class
            .add_method(access::ACC_PUBLIC, "baz", "()V", Some(code.finish(2, 1)))
            .unwrap();

        let deprecated = class
            .attribute("Deprecated", AttributeInfo::Raw(Vec::new()))
            .unwrap();
        class.attributes.push(deprecated);
        class
    }

    #[test]
    fn test_write_then_parse_preserves_structure() {
        let class = sample();
        let bytes = class.to_bytes();
        assert!(has_class_magic(&bytes));

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed, class);
        assert_eq!(parsed.to_bytes(), bytes);
        assert_eq!(parsed.name().unwrap(), "com/x/Foo");
        assert_eq!(parsed.super_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.interface_names().unwrap(), vec!["java/lang/Runnable"]);
    }

    #[test]
    fn test_method_code_is_structured() {
        let class = sample();
        let method = &class.methods[0];
        assert_eq!(method.name(&class.constant_pool).unwrap(), "baz");
        let code = method.code().unwrap();
        let opcodes: Vec<u8> = code
            .instructions()
            .map(|insn| insn.unwrap().opcode)
            .collect();
        assert_eq!(
            opcodes,
            vec![
                opcodes::GETSTATIC,
                opcodes::LDC,
                opcodes::INVOKEVIRTUAL,
                opcodes::RETURN
            ]
        );
    }

    #[test]
    fn test_rejects_non_class_content() {
        assert!(matches!(
            ClassFile::parse(b"PK\x03\x04rest"),
            Err(ClassParseError::InvalidMagic)
        ));
        assert!(!has_class_magic(b"\xCA\xFE"));
    }

    #[test]
    fn test_truncated_file_is_eof() {
        let bytes = sample().to_bytes();
        let err = ClassFile::parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ClassParseError::UnexpectedEof));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassParseError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn test_annotations_round_trip() {
        let mut class = ClassFile::new(0, "com/x/Ann", Some("java/lang/Object")).unwrap();
        let type_index = class.constant_pool.add_utf8("Lcom/x/Marker;").unwrap();
        let name_index = class.constant_pool.add_utf8("value").unwrap();
        let class_value = class.constant_pool.add_utf8("Ljava/util/List;").unwrap();
        let annotation = Annotation {
            type_index,
            elements: vec![ElementPair {
                name_index,
                value: ElementValue::Array(vec![ElementValue::Class {
                    class_info_index: class_value,
                }]),
            }],
        };
        let attribute = class
            .attribute(
                "RuntimeVisibleAnnotations",
                AttributeInfo::Annotations(vec![annotation.clone()]),
            )
            .unwrap();
        class.attributes.push(attribute);

        let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
        let found: Vec<&Annotation> = parsed.annotations().collect();
        assert_eq!(found, vec![&annotation]);
    }
}
