//! One pass over a parsed class, emitting its symbols and references.

use tracing::{debug, warn};

use crate::classfile::code::opcodes;
use crate::classfile::descriptor::{
    class_constant_target, field_type_class, method_parts, signature_classes,
};
use crate::classfile::{
    handle_kind, Annotation, AttributeInfo, ClassFile, CodeAttribute, Constant, ConstantPool,
    ElementValue, MemberInfo,
};
use crate::error::Result;
use crate::mapping::context::SymbolSink;
use crate::model::identity::{class_identity, field_identity, method_identity};
use crate::model::{FileId, Identity, Reference, ReferenceKind, Symbol, SymbolKind};

/// Emit everything `class` declares and references into `sink`.
///
/// Parse errors surface as `Error::ClassParse`; what was emitted before the
/// error stays emitted. A method whose bytecode does not decode is skipped
/// with a warning and the rest of the class is still visited.
pub fn visit_class<S: SymbolSink + ?Sized>(class: &ClassFile, file: FileId, sink: &S) -> Result<()> {
    ClassVisitor {
        class,
        pool: &class.constant_pool,
        name: class.name()?,
        file,
        sink,
    }
    .visit()
}

struct ClassVisitor<'a, S: ?Sized> {
    class: &'a ClassFile,
    pool: &'a ConstantPool,
    /// Internal name of the visited class.
    name: &'a str,
    file: FileId,
    sink: &'a S,
}

impl<S: SymbolSink + ?Sized> ClassVisitor<'_, S> {
    fn visit(&self) -> Result<()> {
        let name = self.name;
        let this = class_identity(name);
        self.sink.add_symbol(Symbol {
            kind: SymbolKind::Class,
            identity: this.clone(),
            name: name.to_string(),
            file: Some(self.file),
            owner: None,
            access: self.class.access_flags,
            signature: self.class.signature()?.map(str::to_string),
        })?;
        self.reference(ReferenceKind::ClassFile, this.clone(), &this, None)?;

        if let Some(super_name) = self.class.super_name()? {
            self.class_reference(ReferenceKind::Superclass, super_name, &this, None)?;
        }
        for interface in self.class.interface_names()? {
            self.class_reference(ReferenceKind::Interface, interface, &this, None)?;
        }
        for annotation in self.class.annotations() {
            self.annotation(annotation, &this)?;
        }
        if let Some(signature) = self.class.signature()? {
            self.signature_references(ReferenceKind::SignatureType, signature, &this)?;
        }
        for attribute in &self.class.attributes {
            self.class_attribute(&attribute.info, &this)?;
        }

        for field in &self.class.fields {
            self.field(field, &this)?;
        }
        for method in &self.class.methods {
            self.method(method, &this)?;
        }
        Ok(())
    }

    fn field(&self, field: &MemberInfo, this: &Identity) -> Result<()> {
        let name = field.name(self.pool)?;
        let descriptor = field.descriptor(self.pool)?;
        let identity = field_identity(this, name, descriptor);
        let signature = field.signature(self.pool)?;
        self.sink.add_symbol(Symbol {
            kind: SymbolKind::Field,
            identity: identity.clone(),
            name: name.to_string(),
            file: Some(self.file),
            owner: Some(this.clone()),
            access: field.access_flags,
            signature: signature.map(str::to_string),
        })?;
        if let Some(signature) = signature {
            self.signature_references(ReferenceKind::SignatureType, signature, &identity)?;
        }
        for annotation in field.annotations() {
            self.annotation(annotation, &identity)?;
        }
        Ok(())
    }

    fn method(&self, method: &MemberInfo, this: &Identity) -> Result<()> {
        let name = method.name(self.pool)?;
        let descriptor = method.descriptor(self.pool)?;
        let identity = method_identity(this, name, descriptor);
        let signature = method.signature(self.pool)?;
        self.sink.add_symbol(Symbol {
            kind: SymbolKind::Method,
            identity: identity.clone(),
            name: name.to_string(),
            file: Some(self.file),
            owner: Some(this.clone()),
            access: method.access_flags,
            signature: signature.map(str::to_string),
        })?;
        if let Some(signature) = signature {
            self.signature_references(ReferenceKind::SignatureType, signature, &identity)?;
        }

        let (parameters, ret) = method_parts(descriptor)?;
        if let Some(class) = field_type_class(ret) {
            self.class_reference(ReferenceKind::ReturnType, class, &identity, None)?;
        }
        for parameter in parameters {
            if let Some(class) = field_type_class(parameter) {
                self.class_reference(ReferenceKind::ParameterType, class, &identity, None)?;
            }
        }

        for annotation in method.annotations() {
            self.annotation(annotation, &identity)?;
        }
        for attribute in &method.attributes {
            match &attribute.info {
                AttributeInfo::AnnotationDefault(value) => self.element_value(value, &identity)?,
                AttributeInfo::Classes(exceptions) => {
                    for index in exceptions {
                        let class = self.pool.class_name(*index)?;
                        self.class_reference(ReferenceKind::ThrowsType, class, &identity, None)?;
                    }
                }
                _ => {}
            }
        }

        if let Some(code) = method.code() {
            self.code_metadata(code, &identity)?;
            for instruction in code.instructions() {
                let instruction = match instruction {
                    Ok(instruction) => instruction,
                    Err(err) => {
                        warn!(method = %identity, error = %err, "skipping undecodable method body");
                        break;
                    }
                };
                if let Some(index) = instruction.constant {
                    let location = Some(instruction.offset as u32);
                    self.instruction(instruction.opcode, index, &identity, location)?;
                }
            }
        }
        Ok(())
    }

    /// Exception handlers, local variable tables and type annotations of a
    /// method body.
    fn code_metadata(&self, code: &CodeAttribute, method: &Identity) -> Result<()> {
        for handler in &code.exception_table {
            if handler.catch_type == 0 {
                continue;
            }
            let class = self.pool.class_name(handler.catch_type)?;
            let location = Some(handler.handler_pc as u32);
            self.class_reference(ReferenceKind::CatchType, class, method, location)?;
        }
        for attribute in &code.attributes {
            match &attribute.info {
                AttributeInfo::LocalVariables(variables) => {
                    let generic = self.pool.utf8(attribute.name_index)? == "LocalVariableTypeTable";
                    for variable in variables {
                        let descriptor = self.pool.utf8(variable.descriptor_index)?;
                        if generic {
                            self.signature_references(
                                ReferenceKind::LocalVariableType,
                                descriptor,
                                method,
                            )?;
                        } else if let Some(class) = field_type_class(descriptor) {
                            self.foreign_class_reference(
                                ReferenceKind::LocalVariableType,
                                class,
                                method,
                            )?;
                        }
                    }
                }
                AttributeInfo::TypeAnnotations(annotations) => {
                    for annotation in annotations {
                        self.annotation(&annotation.annotation, method)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Nest membership, sealing, enclosing method and record components.
    fn class_attribute(&self, info: &AttributeInfo, this: &Identity) -> Result<()> {
        match info {
            AttributeInfo::Classes(classes) => {
                for index in classes {
                    let class = self.pool.class_name(*index)?;
                    self.foreign_class_reference(ReferenceKind::NestedClass, class, this)?;
                }
            }
            AttributeInfo::NestHost { host_class_index } => {
                let host = self.pool.class_name(*host_class_index)?;
                self.foreign_class_reference(ReferenceKind::NestedClass, host, this)?;
            }
            AttributeInfo::InnerClasses(classes) => {
                for entry in classes {
                    let inner = self.pool.class_name(entry.inner_class_info_index)?;
                    self.foreign_class_reference(ReferenceKind::NestedClass, inner, this)?;
                    if entry.outer_class_info_index != 0 {
                        let outer = self.pool.class_name(entry.outer_class_info_index)?;
                        self.foreign_class_reference(ReferenceKind::NestedClass, outer, this)?;
                    }
                }
            }
            AttributeInfo::EnclosingMethod {
                class_index,
                method_index,
            } => {
                let outer = self.pool.class_name(*class_index)?;
                self.class_reference(ReferenceKind::EnclosingClass, outer, this, None)?;
                if *method_index != 0 {
                    let (name, descriptor) = self.pool.name_and_type(*method_index)?;
                    let placeholder = Symbol::placeholder_method(outer, name, descriptor);
                    let target = placeholder.identity.clone();
                    self.sink.add_symbol(placeholder)?;
                    self.reference(ReferenceKind::EnclosingMethod, target, this, None)?;
                }
            }
            AttributeInfo::Record(components) => {
                for component in components {
                    if let Some(class) = field_type_class(component.descriptor(self.pool)?) {
                        self.class_reference(ReferenceKind::RecordComponent, class, this, None)?;
                    }
                    if let Some(signature) = component.signature(self.pool)? {
                        self.signature_references(ReferenceKind::SignatureType, signature, this)?;
                    }
                    for annotation in component.annotations() {
                        self.annotation(annotation, this)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// One reference per distinct class a generic signature names, the
    /// visited class excepted.
    fn signature_references(
        &self,
        kind: ReferenceKind,
        signature: &str,
        owner: &Identity,
    ) -> Result<()> {
        let Some(classes) = signature_classes(signature) else {
            debug!(owner = %owner, signature, "ignoring malformed signature");
            return Ok(());
        };
        let mut seen: Vec<&str> = Vec::with_capacity(classes.len());
        for class in &classes {
            if seen.contains(&class.as_str()) {
                continue;
            }
            seen.push(class.as_str());
            self.foreign_class_reference(kind, class, owner)?;
        }
        Ok(())
    }

    fn instruction(
        &self,
        opcode: u8,
        index: u16,
        owner: &Identity,
        location: Option<u32>,
    ) -> Result<()> {
        match opcode {
            opcodes::NEW
            | opcodes::CHECKCAST
            | opcodes::INSTANCEOF
            | opcodes::ANEWARRAY
            | opcodes::MULTIANEWARRAY => {
                if let Some(class) = class_constant_target(self.pool.class_name(index)?) {
                    self.class_reference(ReferenceKind::TypeInstruction, class, owner, location)?;
                }
            }
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                self.member_reference(index, ReferenceKind::FieldInstruction, owner, location)?;
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                self.member_reference(index, ReferenceKind::MethodInstruction, owner, location)?;
            }
            opcodes::INVOKEDYNAMIC => self.invoke_dynamic(index, owner, location)?,
            opcodes::LDC | opcodes::LDC_W => {
                if let Constant::Class { name_index } = self.pool.get(index)? {
                    if let Some(class) = class_constant_target(self.pool.utf8(*name_index)?) {
                        self.class_reference(ReferenceKind::ClassConstant, class, owner, location)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Handles passed as bootstrap arguments. The bootstrap method itself is
    /// not mapped.
    fn invoke_dynamic(&self, index: u16, owner: &Identity, location: Option<u32>) -> Result<()> {
        let Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            ..
        } = self.pool.get(index)?
        else {
            return Ok(());
        };
        let Some(bootstrap) = self
            .class
            .bootstrap_methods()
            .get(*bootstrap_method_attr_index as usize)
        else {
            return Ok(());
        };
        for argument in &bootstrap.arguments {
            if let Constant::MethodHandle {
                reference_kind,
                reference_index,
            } = self.pool.get(*argument)?
            {
                let kind = match *reference_kind {
                    handle_kind::GET_FIELD..=handle_kind::PUT_STATIC => {
                        ReferenceKind::InvokeDynamicField
                    }
                    handle_kind::INVOKE_VIRTUAL..=handle_kind::INVOKE_INTERFACE => {
                        ReferenceKind::InvokeDynamicMethod
                    }
                    _ => continue,
                };
                self.member_reference(*reference_index, kind, owner, location)?;
            }
        }
        Ok(())
    }

    /// A field or method use: placeholders for the owner class and the
    /// member, then the reference. Members of array types are skipped.
    fn member_reference(
        &self,
        index: u16,
        kind: ReferenceKind,
        owner: &Identity,
        location: Option<u32>,
    ) -> Result<()> {
        let member = self.pool.member_ref(index)?;
        if member.owner.starts_with('[') {
            return Ok(());
        }
        self.sink.add_symbol(Symbol::placeholder_class(member.owner))?;
        let placeholder = match kind.target_kind() {
            SymbolKind::Field => {
                Symbol::placeholder_field(member.owner, member.name, member.descriptor)
            }
            _ => Symbol::placeholder_method(member.owner, member.name, member.descriptor),
        };
        let target = placeholder.identity.clone();
        self.sink.add_symbol(placeholder)?;
        self.reference(kind, target, owner, location)
    }

    fn annotation(&self, annotation: &Annotation, owner: &Identity) -> Result<()> {
        let descriptor = self.pool.utf8(annotation.type_index)?;
        if let Some(class) = field_type_class(descriptor) {
            self.class_reference(ReferenceKind::AnnotationType, class, owner, None)?;
        }
        for pair in &annotation.elements {
            self.element_value(&pair.value, owner)?;
        }
        Ok(())
    }

    fn element_value(&self, value: &ElementValue, owner: &Identity) -> Result<()> {
        match value {
            ElementValue::Const { .. } => Ok(()),
            ElementValue::Class { class_info_index } => {
                match field_type_class(self.pool.utf8(*class_info_index)?) {
                    Some(class) => {
                        self.class_reference(ReferenceKind::AnnotationValue, class, owner, None)
                    }
                    None => Ok(()),
                }
            }
            ElementValue::Enum {
                type_name_index, ..
            } => match field_type_class(self.pool.utf8(*type_name_index)?) {
                Some(class) => {
                    self.class_reference(ReferenceKind::AnnotationValue, class, owner, None)
                }
                None => Ok(()),
            },
            ElementValue::Annotation(nested) => {
                if let Some(class) = field_type_class(self.pool.utf8(nested.type_index)?) {
                    self.class_reference(ReferenceKind::AnnotationValue, class, owner, None)?;
                }
                for pair in &nested.elements {
                    self.element_value(&pair.value, owner)?;
                }
                Ok(())
            }
            ElementValue::Array(values) => values
                .iter()
                .try_for_each(|value| self.element_value(value, owner)),
        }
    }

    /// Placeholder for `class_name` and a reference to it.
    fn class_reference(
        &self,
        kind: ReferenceKind,
        class_name: &str,
        owner: &Identity,
        location: Option<u32>,
    ) -> Result<()> {
        let placeholder = Symbol::placeholder_class(class_name);
        let target = placeholder.identity.clone();
        self.sink.add_symbol(placeholder)?;
        self.reference(kind, target, owner, location)
    }

    /// Like [`Self::class_reference`], skipping the visited class itself:
    /// its declaring file is always rewritten when it is renamed.
    fn foreign_class_reference(
        &self,
        kind: ReferenceKind,
        class_name: &str,
        owner: &Identity,
    ) -> Result<()> {
        if class_name == self.name {
            return Ok(());
        }
        self.class_reference(kind, class_name, owner, None)
    }

    fn reference(
        &self,
        kind: ReferenceKind,
        target: Identity,
        owner: &Identity,
        location: Option<u32>,
    ) -> Result<()> {
        self.sink.add_reference(Reference {
            kind,
            file: self.file,
            target,
            owner: owner.clone(),
            location,
        })
    }
}
