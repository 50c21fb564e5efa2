//! Structural rewrites of one class file.
//!
//! Rewrites never edit a shared `Utf8` entry: they intern the new string
//! and repoint the slot that used the old one. Entries left unused at the
//! tail are trimmed afterwards, so applying a remapper and then its inverse
//! reproduces the original bytes.

use crate::classfile::descriptor::{remap_class_name, remap_descriptor, remap_signature};
use crate::classfile::{
    trim_unused_constants, Annotation, Attribute, AttributeInfo, ClassFile, ClassParseError,
    Constant, ConstantPool, ElementValue, InnerClass,
};

/// One substitution, scoped to an exact class or owner/name/descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remapper {
    Class {
        old: String,
        new: String,
    },
    Field {
        owner: String,
        name: String,
        descriptor: String,
        new_name: String,
    },
    Method {
        owner: String,
        name: String,
        descriptor: String,
        new_name: String,
    },
}

impl Remapper {
    /// The remapper undoing this one.
    pub fn inverse(&self) -> Remapper {
        match self {
            Remapper::Class { old, new } => Remapper::Class {
                old: new.clone(),
                new: old.clone(),
            },
            Remapper::Field {
                owner,
                name,
                descriptor,
                new_name,
            } => Remapper::Field {
                owner: owner.clone(),
                name: new_name.clone(),
                descriptor: descriptor.clone(),
                new_name: name.clone(),
            },
            Remapper::Method {
                owner,
                name,
                descriptor,
                new_name,
            } => Remapper::Method {
                owner: owner.clone(),
                name: new_name.clone(),
                descriptor: descriptor.clone(),
                new_name: name.clone(),
            },
        }
    }

    /// Rewrite `class` in place. Returns whether anything changed.
    pub fn apply(&self, class: &mut ClassFile) -> Result<bool, ClassParseError> {
        match self {
            Remapper::Class { old, new } => remap_class(class, old, new),
            Remapper::Field {
                owner,
                name,
                descriptor,
                new_name,
            } => remap_member(class, MemberSort::Field, owner, name, descriptor, new_name),
            Remapper::Method {
                owner,
                name,
                descriptor,
                new_name,
            } => remap_member(class, MemberSort::Method, owner, name, descriptor, new_name),
        }
    }
}

/// Parse `content`, apply every remapper, trim, serialize, and check that
/// the result parses. `None` when no remapper touched the class.
pub fn rewrite_class(
    content: &[u8],
    remappers: &[Remapper],
) -> Result<Option<Vec<u8>>, ClassParseError> {
    let mut class = ClassFile::parse(content)?;
    let mut changed = false;
    for remapper in remappers {
        changed |= remapper.apply(&mut class)?;
    }
    if !changed {
        return Ok(None);
    }
    trim_unused_constants(&mut class)?;
    let bytes = class.to_bytes();
    ClassFile::parse(&bytes)?;
    Ok(Some(bytes))
}

// ---- Class renames ----

fn remap_class(class: &mut ClassFile, old: &str, new: &str) -> Result<bool, ClassParseError> {
    let ClassFile {
        constant_pool: pool,
        fields,
        methods,
        attributes,
        ..
    } = class;

    let mut class_edits = Vec::new();
    let mut descriptor_edits = Vec::new();
    for (index, constant) in pool.iter() {
        match constant {
            Constant::Class { name_index } => {
                if let Some(name) = remap_class_name(pool.utf8(*name_index)?, old, new) {
                    class_edits.push((index, name));
                }
            }
            Constant::NameAndType {
                descriptor_index, ..
            }
            | Constant::MethodType { descriptor_index } => {
                if let Some(descriptor) = remap_descriptor(pool.utf8(*descriptor_index)?, old, new)
                {
                    descriptor_edits.push((index, descriptor));
                }
            }
            _ => {}
        }
    }

    let mut changed = !class_edits.is_empty() || !descriptor_edits.is_empty();
    for (index, name) in class_edits {
        let utf8 = pool.add_utf8(&name)?;
        if let Constant::Class { name_index } = pool.get_mut(index)? {
            *name_index = utf8;
        }
    }
    for (index, descriptor) in descriptor_edits {
        let utf8 = pool.add_utf8(&descriptor)?;
        match pool.get_mut(index)? {
            Constant::NameAndType {
                descriptor_index, ..
            }
            | Constant::MethodType { descriptor_index } => *descriptor_index = utf8,
            _ => {}
        }
    }

    for member in fields.iter_mut().chain(methods.iter_mut()) {
        changed |= repoint(pool, &mut member.descriptor_index, |d| {
            remap_descriptor(d, old, new)
        })?;
        changed |= remap_attributes(pool, &mut member.attributes, old, new)?;
    }
    changed |= remap_attributes(pool, attributes, old, new)?;
    Ok(changed)
}

/// Replace the string at `*index` by `f(string)` when `f` returns one.
fn repoint(
    pool: &mut ConstantPool,
    index: &mut u16,
    f: impl FnOnce(&str) -> Option<String>,
) -> Result<bool, ClassParseError> {
    let Some(value) = f(pool.utf8(*index)?) else {
        return Ok(false);
    };
    *index = pool.add_utf8(&value)?;
    Ok(true)
}

fn remap_attributes(
    pool: &mut ConstantPool,
    attributes: &mut [Attribute],
    old: &str,
    new: &str,
) -> Result<bool, ClassParseError> {
    let mut changed = false;
    for attribute in attributes {
        let type_table = pool.utf8(attribute.name_index)? == "LocalVariableTypeTable";
        match &mut attribute.info {
            AttributeInfo::Code(code) => {
                changed |= remap_attributes(pool, &mut code.attributes, old, new)?;
            }
            AttributeInfo::Signature { signature_index } => {
                changed |= repoint(pool, signature_index, |s| remap_signature(s, old, new))?;
            }
            AttributeInfo::Annotations(annotations) => {
                for annotation in annotations {
                    changed |= remap_annotation(pool, annotation, old, new)?;
                }
            }
            AttributeInfo::ParameterAnnotations(parameters) => {
                for annotation in parameters.iter_mut().flatten() {
                    changed |= remap_annotation(pool, annotation, old, new)?;
                }
            }
            AttributeInfo::AnnotationDefault(value) => {
                changed |= remap_element(pool, value, old, new)?;
            }
            AttributeInfo::LocalVariables(variables) => {
                for variable in variables {
                    changed |= repoint(pool, &mut variable.descriptor_index, |d| {
                        if type_table {
                            remap_signature(d, old, new)
                        } else {
                            remap_descriptor(d, old, new)
                        }
                    })?;
                }
            }
            AttributeInfo::InnerClasses(classes) => {
                for entry in classes {
                    changed |= remap_inner_name(pool, entry, old, new)?;
                }
            }
            AttributeInfo::Record(components) => {
                for component in components {
                    changed |= repoint(pool, &mut component.descriptor_index, |d| {
                        remap_descriptor(d, old, new)
                    })?;
                    changed |= remap_attributes(pool, &mut component.attributes, old, new)?;
                }
            }
            AttributeInfo::TypeAnnotations(annotations) => {
                for annotation in annotations {
                    changed |= remap_annotation(pool, &mut annotation.annotation, old, new)?;
                }
            }
            // class and name-and-type indices are rewritten through the pool
            AttributeInfo::EnclosingMethod { .. }
            | AttributeInfo::Classes(_)
            | AttributeInfo::NestHost { .. }
            | AttributeInfo::BootstrapMethods(_)
            | AttributeInfo::Raw(_) => {}
        }
    }
    Ok(changed)
}

/// Keep the simple name of a renamed member class in step with its binary
/// name. Runs after the pool's class entries were rewritten.
fn remap_inner_name(
    pool: &mut ConstantPool,
    entry: &mut InnerClass,
    old: &str,
    new: &str,
) -> Result<bool, ClassParseError> {
    if entry.inner_name_index == 0
        || entry.outer_class_info_index == 0
        || pool.class_name(entry.inner_class_info_index)? != new
    {
        return Ok(false);
    }
    let outer = pool.class_name(entry.outer_class_info_index)?;
    let (Some(old_simple), Some(new_simple)) = (member_suffix(old, outer), member_suffix(new, outer))
    else {
        return Ok(false);
    };
    if pool.utf8(entry.inner_name_index)? != old_simple {
        return Ok(false);
    }
    entry.inner_name_index = pool.add_utf8(new_simple)?;
    Ok(true)
}

fn member_suffix<'n>(name: &'n str, outer: &str) -> Option<&'n str> {
    name.strip_prefix(outer)?.strip_prefix('$')
}

fn remap_annotation(
    pool: &mut ConstantPool,
    annotation: &mut Annotation,
    old: &str,
    new: &str,
) -> Result<bool, ClassParseError> {
    let mut changed = repoint(pool, &mut annotation.type_index, |d| {
        remap_descriptor(d, old, new)
    })?;
    for pair in &mut annotation.elements {
        changed |= remap_element(pool, &mut pair.value, old, new)?;
    }
    Ok(changed)
}

fn remap_element(
    pool: &mut ConstantPool,
    value: &mut ElementValue,
    old: &str,
    new: &str,
) -> Result<bool, ClassParseError> {
    match value {
        ElementValue::Const { .. } => Ok(false),
        ElementValue::Class { class_info_index } => {
            repoint(pool, class_info_index, |d| remap_descriptor(d, old, new))
        }
        ElementValue::Enum {
            type_name_index, ..
        } => repoint(pool, type_name_index, |d| remap_descriptor(d, old, new)),
        ElementValue::Annotation(annotation) => remap_annotation(pool, annotation, old, new),
        ElementValue::Array(values) => {
            let mut changed = false;
            for value in values {
                changed |= remap_element(pool, value, old, new)?;
            }
            Ok(changed)
        }
    }
}

// ---- Member renames ----

#[derive(Clone, Copy, PartialEq, Eq)]
enum MemberSort {
    Field,
    Method,
}

/// Rename the declaration (when `class` is the owner) and every member
/// reference to exactly `owner.name:descriptor`. Each matching reference
/// gets its own new name-and-type; the old one may be shared.
fn remap_member(
    class: &mut ClassFile,
    sort: MemberSort,
    owner: &str,
    name: &str,
    descriptor: &str,
    new_name: &str,
) -> Result<bool, ClassParseError> {
    let mut changed = false;
    let declares = class.name()? == owner;
    let ClassFile {
        constant_pool: pool,
        fields,
        methods,
        attributes,
        ..
    } = class;

    if declares {
        let members = match sort {
            MemberSort::Field => fields,
            MemberSort::Method => methods,
        };
        for member in members.iter_mut() {
            if member.name(pool)? == name && member.descriptor(pool)? == descriptor {
                member.name_index = pool.add_utf8(new_name)?;
                changed = true;
            }
        }
    }

    let mut edits = Vec::new();
    for (index, constant) in pool.iter() {
        let (class_index, name_and_type_index) = match (sort, constant) {
            (
                MemberSort::Field,
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                },
            )
            | (
                MemberSort::Method,
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            ) => (*class_index, *name_and_type_index),
            _ => continue,
        };
        if pool.class_name(class_index)? == owner
            && pool.name_and_type(name_and_type_index)? == (name, descriptor)
        {
            edits.push(index);
        }
    }

    if !edits.is_empty() {
        let renamed = pool.add_name_and_type(new_name, descriptor)?;
        for index in edits {
            match pool.get_mut(index)? {
                Constant::Fieldref {
                    name_and_type_index,
                    ..
                }
                | Constant::Methodref {
                    name_and_type_index,
                    ..
                }
                | Constant::InterfaceMethodref {
                    name_and_type_index,
                    ..
                } => *name_and_type_index = renamed,
                _ => {}
            }
        }
        changed = true;
    }

    // a local or anonymous class declared inside the renamed method
    if sort == MemberSort::Method {
        for attribute in attributes.iter_mut() {
            let AttributeInfo::EnclosingMethod {
                class_index,
                method_index,
            } = &mut attribute.info
            else {
                continue;
            };
            if *method_index != 0
                && pool.class_name(*class_index)? == owner
                && pool.name_and_type(*method_index)? == (name, descriptor)
            {
                *method_index = pool.add_name_and_type(new_name, descriptor)?;
                changed = true;
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::access::{ACC_PUBLIC, ACC_STATIC};
    use crate::classfile::code::opcodes;
    use crate::classfile::{CodeBuilder, InnerClass, LocalVariable, RecordComponent, TypeAnnotation};

    fn foo() -> Vec<u8> {
        let mut class = ClassFile::new(ACC_PUBLIC, "com/x/Foo", Some("java/lang/Object")).unwrap();
        class.add_field(0, "bar", "I").unwrap();
        class.add_field(0, "self", "Lcom/x/Foo;").unwrap();
        let baz = class
            .constant_pool
            .add_method_ref("com/x/Foo", "baz", "()V")
            .unwrap();
        let other_baz = class
            .constant_pool
            .add_method_ref("com/x/Other", "baz", "()V")
            .unwrap();
        let label = class.constant_pool.add_string("com/x/Foo").unwrap();
        let mut code = CodeBuilder::new()
            .op_cp(opcodes::LDC, label)
            .op(opcodes::POP)
            .op_cp(opcodes::INVOKESTATIC, baz)
            .op_cp(opcodes::INVOKESTATIC, other_baz)
            .op(opcodes::RETURN)
            .finish(1, 1);
        let this_name = class.constant_pool.add_utf8("this").unwrap();
        let this_type = class.constant_pool.add_utf8("Lcom/x/Foo;").unwrap();
        let table = class
            .attribute(
                "LocalVariableTable",
                AttributeInfo::LocalVariables(vec![LocalVariable {
                    start_pc: 0,
                    length: 1,
                    name_index: this_name,
                    descriptor_index: this_type,
                    index: 0,
                }]),
            )
            .unwrap();
        code.attributes.push(table);
        class.add_method(ACC_STATIC, "baz", "()V", Some(code)).unwrap();
        class.add_method(ACC_STATIC, "baz", "(I)V", None).unwrap();
        class
            .add_method(ACC_STATIC, "make", "(Lcom/x/Foo;)[Lcom/x/Foo;", None)
            .unwrap();
        class.to_bytes()
    }

    fn class_remapper() -> Remapper {
        Remapper::Class {
            old: "com/x/Foo".to_string(),
            new: "com/x/Bar".to_string(),
        }
    }

    fn baz_remapper() -> Remapper {
        Remapper::Method {
            owner: "com/x/Foo".to_string(),
            name: "baz".to_string(),
            descriptor: "()V".to_string(),
            new_name: "qux".to_string(),
        }
    }

    #[test]
    fn test_class_rename_rewrites_names_and_descriptors() {
        let bytes = rewrite_class(&foo(), &[class_remapper()]).unwrap().unwrap();
        let class = ClassFile::parse(&bytes).unwrap();
        let pool = &class.constant_pool;

        assert_eq!(class.name().unwrap(), "com/x/Bar");
        let descriptors: Vec<&str> = class
            .fields
            .iter()
            .chain(&class.methods)
            .map(|m| m.descriptor(pool).unwrap())
            .collect();
        assert_eq!(
            descriptors,
            vec!["I", "Lcom/x/Bar;", "()V", "(I)V", "(Lcom/x/Bar;)[Lcom/x/Bar;"]
        );

        let owners: Vec<&str> = pool
            .iter()
            .filter(|(_, c)| matches!(c, Constant::Methodref { .. }))
            .map(|(i, _)| pool.member_ref(i).unwrap().owner)
            .collect();
        assert_eq!(owners, vec!["com/x/Bar", "com/x/Other"]);

        // string literals keep the old text
        let literal = pool
            .iter()
            .find_map(|(_, c)| match c {
                Constant::String { string_index } => Some(*string_index),
                _ => None,
            })
            .unwrap();
        assert_eq!(pool.utf8(literal).unwrap(), "com/x/Foo");

        let code = class.methods[0].code().unwrap();
        let Some(AttributeInfo::LocalVariables(vars)) = code.attributes.first().map(|a| &a.info)
        else {
            panic!("missing local variable table");
        };
        assert_eq!(pool.utf8(vars[0].descriptor_index).unwrap(), "Lcom/x/Bar;");
    }

    #[test]
    fn test_method_rename_is_scoped_to_owner_and_descriptor() {
        let bytes = rewrite_class(&foo(), &[baz_remapper()]).unwrap().unwrap();
        let class = ClassFile::parse(&bytes).unwrap();
        let pool = &class.constant_pool;

        let names: Vec<(&str, &str)> = class
            .methods
            .iter()
            .map(|m| (m.name(pool).unwrap(), m.descriptor(pool).unwrap()))
            .collect();
        assert_eq!(names[0], ("qux", "()V"));
        assert_eq!(names[1], ("baz", "(I)V"));

        let refs: Vec<(String, String)> = pool
            .iter()
            .filter(|(_, c)| matches!(c, Constant::Methodref { .. }))
            .map(|(i, _)| {
                let r = pool.member_ref(i).unwrap();
                (r.owner.to_string(), r.name.to_string())
            })
            .collect();
        assert!(refs.contains(&("com/x/Foo".to_string(), "qux".to_string())));
        assert!(refs.contains(&("com/x/Other".to_string(), "baz".to_string())));
    }

    #[test]
    fn test_rename_then_inverse_is_byte_identical() {
        let original = foo();
        for remapper in [class_remapper(), baz_remapper()] {
            let renamed = rewrite_class(&original, &[remapper.clone()]).unwrap().unwrap();
            assert_ne!(renamed, original);
            let restored = rewrite_class(&renamed, &[remapper.inverse()])
                .unwrap()
                .unwrap();
            assert_eq!(restored, original, "{remapper:?}");
        }
    }

    #[test]
    fn test_untouched_class_reports_no_change() {
        let other = Remapper::Field {
            owner: "com/x/Nope".to_string(),
            name: "bar".to_string(),
            descriptor: "I".to_string(),
            new_name: "baz".to_string(),
        };
        assert_eq!(rewrite_class(&foo(), &[other]).unwrap(), None);
    }

    fn assert_round_trip(original: &[u8], remapper: &Remapper) -> ClassFile {
        let renamed = rewrite_class(original, &[remapper.clone()]).unwrap().unwrap();
        let restored = rewrite_class(&renamed, &[remapper.inverse()])
            .unwrap()
            .unwrap();
        assert_eq!(restored, original, "{remapper:?}");
        ClassFile::parse(&renamed).unwrap()
    }

    #[test]
    fn test_enclosing_method_follows_method_rename() {
        let mut class =
            ClassFile::new(0, "com/x/Foo$1", Some("java/lang/Object")).unwrap();
        let foo = class.constant_pool.add_class("com/x/Foo").unwrap();
        let baz = class.constant_pool.add_name_and_type("baz", "()V").unwrap();
        let enclosing = class
            .attribute(
                "EnclosingMethod",
                AttributeInfo::EnclosingMethod {
                    class_index: foo,
                    method_index: baz,
                },
            )
            .unwrap();
        class.attributes.push(enclosing);

        let renamed = assert_round_trip(&class.to_bytes(), &baz_remapper());
        let Some(AttributeInfo::EnclosingMethod { method_index, .. }) =
            renamed.attributes.first().map(|a| &a.info)
        else {
            panic!("missing enclosing method");
        };
        assert_eq!(
            renamed.constant_pool.name_and_type(*method_index).unwrap(),
            ("qux", "()V")
        );
    }

    #[test]
    fn test_member_class_keeps_simple_name_in_step() {
        let mut class =
            ClassFile::new(0, "com/x/Outer$Inner", Some("java/lang/Object")).unwrap();
        let outer = class.constant_pool.add_class("com/x/Outer").unwrap();
        let simple = class.constant_pool.add_utf8("Inner").unwrap();
        let entry = InnerClass {
            inner_class_info_index: class.this_class,
            outer_class_info_index: outer,
            inner_name_index: simple,
            inner_class_access_flags: ACC_STATIC,
        };
        let inner_classes = class
            .attribute("InnerClasses", AttributeInfo::InnerClasses(vec![entry]))
            .unwrap();
        class.attributes.push(inner_classes);

        let remapper = Remapper::Class {
            old: "com/x/Outer$Inner".to_string(),
            new: "com/x/Outer$Renamed".to_string(),
        };
        let renamed = assert_round_trip(&class.to_bytes(), &remapper);
        assert_eq!(renamed.name().unwrap(), "com/x/Outer$Renamed");
        let Some(AttributeInfo::InnerClasses(entries)) =
            renamed.attributes.first().map(|a| &a.info)
        else {
            panic!("missing inner classes");
        };
        assert_eq!(
            renamed.constant_pool.utf8(entries[0].inner_name_index).unwrap(),
            "Renamed"
        );
    }

    #[test]
    fn test_record_components_and_type_annotations_rewritten() {
        let mut class = ClassFile::new(0, "com/x/Point", Some("java/lang/Record")).unwrap();
        let name_index = class.constant_pool.add_utf8("origin").unwrap();
        let descriptor_index = class.constant_pool.add_utf8("Lcom/x/Foo;").unwrap();
        let record = class
            .attribute(
                "Record",
                AttributeInfo::Record(vec![RecordComponent {
                    name_index,
                    descriptor_index,
                    attributes: Vec::new(),
                }]),
            )
            .unwrap();
        class.attributes.push(record);

        let field = class.add_field(0, "origin", "Lcom/x/Foo;").unwrap();
        let annotation = Annotation {
            type_index: class.constant_pool.add_utf8("Lcom/x/Foo;").unwrap(),
            elements: Vec::new(),
        };
        let type_annotations = class
            .attribute(
                "RuntimeVisibleTypeAnnotations",
                AttributeInfo::TypeAnnotations(vec![TypeAnnotation {
                    // field type, empty type path
                    target_type: 0x13,
                    target: vec![0],
                    annotation,
                }]),
            )
            .unwrap();
        class.fields[field].attributes.push(type_annotations);

        let renamed = assert_round_trip(&class.to_bytes(), &class_remapper());
        let pool = &renamed.constant_pool;
        let Some(AttributeInfo::Record(components)) = renamed.attributes.first().map(|a| &a.info)
        else {
            panic!("missing record");
        };
        assert_eq!(components[0].descriptor(pool).unwrap(), "Lcom/x/Bar;");
        let annotated: Vec<&str> = renamed.fields[0]
            .annotations()
            .map(|a| pool.utf8(a.type_index).unwrap())
            .collect();
        assert_eq!(annotated, vec!["Lcom/x/Bar;"]);
    }
}
