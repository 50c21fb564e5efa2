//! Field/method descriptor and generic signature helpers.

use super::ClassParseError;

const BASE_TYPES: &[u8] = b"BCDFIJSZ";

/// The class a field descriptor names, looking through array dimensions.
/// `None` for base types.
pub fn field_type_class(descriptor: &str) -> Option<&str> {
    let element = descriptor.trim_start_matches('[');
    element
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .filter(|name| !name.is_empty())
}

/// The class a `CONSTANT_Class` name denotes: the name itself, or the
/// element class of an array type. `None` for primitive arrays.
pub fn class_constant_target(name: &str) -> Option<&str> {
    if name.starts_with('[') {
        field_type_class(name)
    } else {
        Some(name)
    }
}

fn field_type_end(descriptor: &str, start: usize) -> Result<usize, ClassParseError> {
    let bytes = descriptor.as_bytes();
    let mut i = start;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i) {
        Some(b'L') => descriptor[i..]
            .find(';')
            .map(|end| i + end + 1)
            .ok_or_else(|| ClassParseError::InvalidDescriptor(descriptor.to_string())),
        Some(c) if BASE_TYPES.contains(c) => Ok(i + 1),
        _ => Err(ClassParseError::InvalidDescriptor(descriptor.to_string())),
    }
}

/// Split a method descriptor into its parameter descriptors and return
/// descriptor.
pub fn method_parts(descriptor: &str) -> Result<(Vec<&str>, &str), ClassParseError> {
    let invalid = || ClassParseError::InvalidDescriptor(descriptor.to_string());
    if !descriptor.starts_with('(') {
        return Err(invalid());
    }
    let mut parameters = Vec::new();
    let mut i = 1;
    while descriptor.as_bytes().get(i) != Some(&b')') {
        if i >= descriptor.len() {
            return Err(invalid());
        }
        let end = field_type_end(descriptor, i)?;
        parameters.push(&descriptor[i..end]);
        i = end;
    }
    let ret = &descriptor[i + 1..];
    let valid_return = ret == "V" || field_type_end(ret, 0).map_or(false, |end| end == ret.len());
    if !valid_return {
        return Err(invalid());
    }
    Ok((parameters, ret))
}

/// Replace class `old` with `new` in a field or method descriptor.
/// `None` when `old` does not occur.
pub fn remap_descriptor(descriptor: &str, old: &str, new: &str) -> Option<String> {
    let mut out = String::with_capacity(descriptor.len() + new.len());
    let mut changed = false;
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..=start]);
        let tail = &rest[start + 1..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let name = &tail[..end];
        if name == old {
            out.push_str(new);
            changed = true;
        } else {
            out.push_str(name);
        }
        rest = &tail[end..];
    }
    out.push_str(rest);
    changed.then_some(out)
}

/// Replace class `old` with `new` in a `CONSTANT_Class` name.
pub fn remap_class_name(name: &str, old: &str, new: &str) -> Option<String> {
    if name == old {
        Some(new.to_string())
    } else if name.starts_with('[') {
        remap_descriptor(name, old, new)
    } else {
        None
    }
}

/// Replace class `old` with `new` in a generic class, method, or field
/// signature. `None` when nothing changed or the signature is malformed.
pub fn remap_signature(signature: &str, old: &str, new: &str) -> Option<String> {
    let mut remapper = SignatureRemapper {
        input: signature,
        pos: 0,
        out: String::with_capacity(signature.len() + new.len()),
        old,
        new,
        changed: false,
    };
    remapper.signature()?;
    remapper.changed.then_some(remapper.out)
}

/// Class names mentioned by a generic signature, in order of appearance.
pub fn signature_classes(signature: &str) -> Option<Vec<String>> {
    let mut collector = SignatureRemapper {
        input: signature,
        pos: 0,
        out: String::new(),
        old: "",
        new: "",
        changed: false,
    };
    let mut names = Vec::new();
    collector.signature_with(&mut |name: &str| names.push(name.to_string()))?;
    Some(names)
}

struct SignatureRemapper<'a> {
    input: &'a str,
    pos: usize,
    out: String,
    old: &'a str,
    new: &'a str,
    changed: bool,
}

impl<'a> SignatureRemapper<'a> {
    fn signature(&mut self) -> Option<()> {
        self.signature_with(&mut |_| {})
    }

    fn signature_with(&mut self, seen: &mut dyn FnMut(&str)) -> Option<()> {
        if self.peek() == Some(b'<') {
            self.type_parameters(seen)?;
        }
        if self.peek() == Some(b'(') {
            self.copy(1);
            while self.peek()? != b')' {
                self.type_signature(seen)?;
            }
            self.copy(1);
            if self.peek()? == b'V' {
                self.copy(1);
            } else {
                self.type_signature(seen)?;
            }
            while self.peek() == Some(b'^') {
                self.copy(1);
                self.reference_type(seen)?;
            }
        } else {
            // class signature (superclass then interfaces) or field signature
            while self.peek().is_some() {
                self.reference_type(seen)?;
            }
        }
        (self.pos == self.input.len()).then_some(())
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn copy(&mut self, len: usize) {
        self.out.push_str(&self.input[self.pos..self.pos + len]);
        self.pos += len;
    }

    /// Copy up to (not including) the first of `stops`.
    fn copy_until(&mut self, stops: &[u8]) -> Option<&'a str> {
        let input = self.input;
        let rest = &input[self.pos..];
        let len = rest.bytes().position(|b| stops.contains(&b))?;
        let ident = &rest[..len];
        self.pos += len;
        Some(ident)
    }

    fn type_parameters(&mut self, seen: &mut dyn FnMut(&str)) -> Option<()> {
        self.copy(1);
        while self.peek()? != b'>' {
            let ident = self.copy_until(b":")?;
            self.out.push_str(ident);
            while self.peek() == Some(b':') {
                self.copy(1);
                if matches!(self.peek()?, b'L' | b'T' | b'[') {
                    self.reference_type(seen)?;
                }
            }
        }
        self.copy(1);
        Some(())
    }

    fn type_signature(&mut self, seen: &mut dyn FnMut(&str)) -> Option<()> {
        if BASE_TYPES.contains(&self.peek()?) {
            self.copy(1);
            Some(())
        } else {
            self.reference_type(seen)
        }
    }

    fn reference_type(&mut self, seen: &mut dyn FnMut(&str)) -> Option<()> {
        match self.peek()? {
            b'L' => {
                self.copy(1);
                let name = self.copy_until(b"<.;")?;
                seen(name);
                if name == self.old {
                    self.out.push_str(self.new);
                    self.changed = true;
                } else {
                    self.out.push_str(name);
                }
                loop {
                    match self.peek()? {
                        b'<' => self.type_arguments(seen)?,
                        b'.' => {
                            self.copy(1);
                            let inner = self.copy_until(b"<.;")?;
                            self.out.push_str(inner);
                        }
                        b';' => {
                            self.copy(1);
                            return Some(());
                        }
                        _ => return None,
                    }
                }
            }
            b'T' => {
                let end = self.input[self.pos..].find(';')?;
                self.copy(end + 1);
                Some(())
            }
            b'[' => {
                self.copy(1);
                self.type_signature(seen)
            }
            _ => None,
        }
    }

    fn type_arguments(&mut self, seen: &mut dyn FnMut(&str)) -> Option<()> {
        self.copy(1);
        while self.peek()? != b'>' {
            match self.peek()? {
                b'*' => self.copy(1),
                b'+' | b'-' => {
                    self.copy(1);
                    self.reference_type(seen)?;
                }
                _ => self.reference_type(seen)?,
            }
        }
        self.copy(1);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parts() {
        let (params, ret) = method_parts("(I[Ljava/lang/String;J[[D)Lcom/x/Foo;").unwrap();
        assert_eq!(params, vec!["I", "[Ljava/lang/String;", "J", "[[D"]);
        assert_eq!(ret, "Lcom/x/Foo;");

        let (params, ret) = method_parts("()V").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret, "V");

        assert!(method_parts("(I").is_err());
        assert!(method_parts("I)V").is_err());
        assert!(method_parts("(Lcom/x/Foo)V").is_err());
        assert!(method_parts("()VV").is_err());
    }

    #[test]
    fn test_field_type_class() {
        assert_eq!(field_type_class("[[Lcom/x/Foo;"), Some("com/x/Foo"));
        assert_eq!(field_type_class("I"), None);
        assert_eq!(field_type_class("[[J"), None);
        assert_eq!(class_constant_target("[I"), None);
        assert_eq!(class_constant_target("com/x/Foo"), Some("com/x/Foo"));
    }

    #[test]
    fn test_remap_descriptor_is_exact() {
        assert_eq!(
            remap_descriptor("(Lcom/x/Foo;Lcom/x/FooBar;)[Lcom/x/Foo;", "com/x/Foo", "com/x/Baz"),
            Some("(Lcom/x/Baz;Lcom/x/FooBar;)[Lcom/x/Baz;".to_string())
        );
        assert_eq!(remap_descriptor("(IJ)V", "com/x/Foo", "com/x/Baz"), None);
        assert_eq!(
            remap_class_name("[Lcom/x/Foo;", "com/x/Foo", "com/x/Baz"),
            Some("[Lcom/x/Baz;".to_string())
        );
    }

    #[test]
    fn test_remap_signature() {
        let sig = "<T:Lcom/x/Foo;>Ljava/lang/Object;Ljava/util/List<+Lcom/x/Foo;>;";
        assert_eq!(
            remap_signature(sig, "com/x/Foo", "com/x/Bar").as_deref(),
            Some("<T:Lcom/x/Bar;>Ljava/lang/Object;Ljava/util/List<+Lcom/x/Bar;>;")
        );

        let method = "<E::Ljava/lang/Comparable<TE;>;>(Ljava/util/Map<TE;[Lcom/x/Foo;>;)TE;^Lcom/x/Foo;";
        assert_eq!(
            remap_signature(method, "com/x/Foo", "com/x/Bar").as_deref(),
            Some("<E::Ljava/lang/Comparable<TE;>;>(Ljava/util/Map<TE;[Lcom/x/Bar;>;)TE;^Lcom/x/Bar;")
        );

        // type variable named like the class is untouched
        assert_eq!(remap_signature("TFoo;", "Foo", "Bar"), None);
        assert_eq!(
            remap_signature("Lcom/x/Outer<*>.Inner;", "com/x/Outer", "com/x/Shell").as_deref(),
            Some("Lcom/x/Shell<*>.Inner;")
        );
        assert_eq!(remap_signature("Lcom/x/Foo", "com/x/Foo", "com/x/Bar"), None);
    }

    #[test]
    fn test_signature_classes() {
        let names = signature_classes("Ljava/util/Map<Ljava/lang/String;[Lcom/x/Foo;>;").unwrap();
        assert_eq!(names, vec!["java/util/Map", "java/lang/String", "com/x/Foo"]);
    }
}
