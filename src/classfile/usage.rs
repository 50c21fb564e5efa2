use std::collections::HashSet;

use super::bytes::ByteReader;
use super::{
    Annotation, Attribute, AttributeInfo, ClassFile, ClassParseError, Constant, ElementValue,
};

/// Raw attributes whose constant pool usage is known: either they carry no
/// indices, or only `Class` indices (never trimmed).
const OPAQUE_SAFE: &[&str] = &[
    "StackMapTable",
    "LineNumberTable",
    "Deprecated",
    "Synthetic",
    "SourceDebugExtension",
];

/// Drop unreferenced `Utf8` and `NameAndType` entries from the end of the
/// constant pool. Returns the number of slots removed.
///
/// A rewrite appends new entries and leaves the ones it replaced in place;
/// trimming the tail lets a rename followed by its inverse restore the
/// original bytes. Nothing is trimmed when the class carries a raw
/// attribute whose references cannot be accounted for.
pub fn trim_unused_constants(class: &mut ClassFile) -> Result<usize, ClassParseError> {
    let Some(mut used) = structural_uses(class)? else {
        return Ok(0);
    };
    for (_, constant) in class.constant_pool.iter() {
        used.extend(constant.children());
    }

    let original = class.constant_pool.len();
    loop {
        let last = class.constant_pool.len() - 1;
        if last == 0 || used.contains(&(last as u16)) {
            break;
        }
        match class.constant_pool.get(last as u16) {
            Ok(Constant::Utf8(_)) => {}
            Ok(Constant::NameAndType { .. }) => {
                // its children stay marked; recount without it
                class.constant_pool.truncate(last);
                used = structural_uses(class)?.unwrap_or_default();
                for (_, constant) in class.constant_pool.iter() {
                    used.extend(constant.children());
                }
                continue;
            }
            _ => break,
        }
        class.constant_pool.truncate(last);
    }
    Ok(original - class.constant_pool.len())
}

/// Every constant pool index referenced from outside the pool itself, or
/// `None` if some attribute cannot be accounted for.
fn structural_uses(class: &ClassFile) -> Result<Option<HashSet<u16>>, ClassParseError> {
    let mut used = HashSet::new();
    used.insert(class.this_class);
    used.insert(class.super_class);
    used.extend(class.interfaces.iter().copied());

    for member in class.fields.iter().chain(&class.methods) {
        used.insert(member.name_index);
        used.insert(member.descriptor_index);
        if !attribute_uses(class, &member.attributes, &mut used)? {
            return Ok(None);
        }
    }
    if !attribute_uses(class, &class.attributes, &mut used)? {
        return Ok(None);
    }
    Ok(Some(used))
}

fn attribute_uses(
    class: &ClassFile,
    attributes: &[Attribute],
    used: &mut HashSet<u16>,
) -> Result<bool, ClassParseError> {
    for attribute in attributes {
        used.insert(attribute.name_index);
        match &attribute.info {
            AttributeInfo::Code(code) => {
                for insn in code.instructions() {
                    used.extend(insn?.constant);
                }
                used.extend(code.exception_table.iter().map(|h| h.catch_type));
                if !attribute_uses(class, &code.attributes, used)? {
                    return Ok(false);
                }
            }
            AttributeInfo::Signature { signature_index } => {
                used.insert(*signature_index);
            }
            AttributeInfo::Annotations(annotations) => annotation_uses(annotations, used),
            AttributeInfo::ParameterAnnotations(parameters) => {
                for annotations in parameters {
                    annotation_uses(annotations, used);
                }
            }
            AttributeInfo::AnnotationDefault(value) => element_uses(value, used),
            AttributeInfo::BootstrapMethods(methods) => {
                for method in methods {
                    used.insert(method.method_ref);
                    used.extend(method.arguments.iter().copied());
                }
            }
            AttributeInfo::LocalVariables(variables) => {
                for variable in variables {
                    used.insert(variable.name_index);
                    used.insert(variable.descriptor_index);
                }
            }
            AttributeInfo::EnclosingMethod {
                class_index,
                method_index,
            } => {
                used.insert(*class_index);
                used.insert(*method_index);
            }
            AttributeInfo::Classes(classes) => used.extend(classes.iter().copied()),
            AttributeInfo::NestHost { host_class_index } => {
                used.insert(*host_class_index);
            }
            AttributeInfo::InnerClasses(classes) => {
                for class in classes {
                    used.insert(class.inner_class_info_index);
                    used.insert(class.outer_class_info_index);
                    used.insert(class.inner_name_index);
                }
            }
            AttributeInfo::Record(components) => {
                for component in components {
                    used.insert(component.name_index);
                    used.insert(component.descriptor_index);
                    if !attribute_uses(class, &component.attributes, used)? {
                        return Ok(false);
                    }
                }
            }
            AttributeInfo::TypeAnnotations(annotations) => {
                for annotation in annotations {
                    annotation_uses(std::slice::from_ref(&annotation.annotation), used);
                }
            }
            AttributeInfo::Raw(body) => {
                let name = class.constant_pool.utf8(attribute.name_index)?;
                if !raw_uses(name, body, used)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn raw_uses(name: &str, body: &[u8], used: &mut HashSet<u16>) -> Result<bool, ClassParseError> {
    let mut reader = ByteReader::new(body);
    match name {
        "SourceFile" | "ConstantValue" => {
            used.insert(reader.read_u2()?);
        }
        "MethodParameters" => {
            let count = reader.read_u1()?;
            for _ in 0..count {
                used.insert(reader.read_u2()?);
                reader.read_u2()?;
            }
        }
        other if OPAQUE_SAFE.contains(&other) => return Ok(true),
        _ => return Ok(false),
    }
    reader.expect_end()?;
    Ok(true)
}

fn annotation_uses(annotations: &[Annotation], used: &mut HashSet<u16>) {
    for annotation in annotations {
        used.insert(annotation.type_index);
        for pair in &annotation.elements {
            used.insert(pair.name_index);
            element_uses(&pair.value, used);
        }
    }
}

fn element_uses(value: &ElementValue, used: &mut HashSet<u16>) {
    match value {
        ElementValue::Const {
            const_value_index, ..
        } => {
            used.insert(*const_value_index);
        }
        ElementValue::Enum {
            type_name_index,
            const_name_index,
        } => {
            used.insert(*type_name_index);
            used.insert(*const_name_index);
        }
        ElementValue::Class { class_info_index } => {
            used.insert(*class_info_index);
        }
        ElementValue::Annotation(annotation) => {
            annotation_uses(std::slice::from_ref(annotation), used)
        }
        ElementValue::Array(values) => {
            for value in values {
                element_uses(value, used);
            }
        }
    }
}
