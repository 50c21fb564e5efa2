//! Class files compiled by javac 17 from `tests/fixtures/javac_project/src`.
//! Rebuild with `javac --release 17 -d classes src/com/x/*.java` from the
//! fixture directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use jvmap::classfile::{AttributeInfo, ClassFile, Constant};
use jvmap::config::JvmapConfig;
use jvmap::workspace::Workspace;

fn fixture_classes() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/javac_project/classes")
}

/// Stored path (`com/x/Foo.class`) to javac's bytes.
fn compiled() -> BTreeMap<String, Vec<u8>> {
    let dir = fixture_classes().join("com/x");
    let mut classes = BTreeMap::new();
    for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "class") {
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            classes.insert(format!("com/x/{}", name), std::fs::read(&path).unwrap());
        }
    }
    assert_eq!(classes.len(), 7, "fixture classes missing from {}", dir.display());
    classes
}

fn mapped_workspace() -> Workspace {
    let ws = Workspace::in_memory(JvmapConfig::default()).unwrap();
    for (path, bytes) in compiled() {
        ws.import_file(&path, &bytes).unwrap();
    }
    ws.map_all().unwrap();
    ws
}

fn content(ws: &Workspace, path: &str) -> Vec<u8> {
    ws.database()
        .read(|store| {
            let file = store.get_file_by_path(path)?.expect("file exists");
            store.file_content(file.id)
        })
        .unwrap()
}

fn parsed(ws: &Workspace, path: &str) -> ClassFile {
    ClassFile::parse(&content(ws, path)).unwrap()
}

fn class_names(class: &ClassFile) -> Vec<String> {
    class
        .constant_pool
        .iter()
        .filter(|(_, c)| matches!(c, Constant::Class { .. }))
        .map(|(i, _)| class.constant_pool.class_name(i).unwrap().to_string())
        .collect()
}

fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths
}

#[test]
fn test_javac_output_round_trips() {
    for (path, bytes) in compiled() {
        let class = ClassFile::parse(&bytes).unwrap_or_else(|e| panic!("{}: {}", path, e));
        assert_eq!(class.to_bytes(), bytes, "{} changed on re-serialization", path);
    }
}

#[test]
fn test_exception_rename_reaches_catch_only_user() {
    let ws = mapped_workspace();
    let outcome = ws.rename_engine().rename("com/x/FooEx", "BarEx").unwrap();

    assert_eq!(
        sorted(outcome.rewritten_files.clone()),
        vec!["com/x/Foo.class", "com/x/FooEx.class", "com/x/User.class"]
    );
    assert_eq!(outcome.renamed_files.len(), 1);
    assert_eq!(outcome.renamed_files[0].to, "com/x/BarEx.class");

    let user = parsed(&ws, "com/x/User.class");
    let main = user
        .methods
        .iter()
        .find(|m| m.name(&user.constant_pool).unwrap() == "main")
        .unwrap();
    let handler = &main.code().unwrap().exception_table[0];
    assert_eq!(
        user.constant_pool.class_name(handler.catch_type).unwrap(),
        "com/x/BarEx"
    );

    for path in ["com/x/Foo.class", "com/x/User.class", "com/x/BarEx.class"] {
        let names = class_names(&parsed(&ws, path));
        assert!(!names.iter().any(|n| n == "com/x/FooEx"), "{} still names FooEx", path);
    }
}

#[test]
fn test_inner_class_rename_updates_nest_and_inner_name() {
    let ws = mapped_workspace();
    let outcome = ws
        .rename_engine()
        .rename("com/x/Outer$Inner", "Outer$Wrapped")
        .unwrap();

    assert_eq!(
        sorted(outcome.rewritten_files.clone()),
        vec!["com/x/Outer$Inner.class", "com/x/Outer.class"]
    );
    assert_eq!(outcome.renamed_files[0].to, "com/x/Outer$Wrapped.class");

    let inner = parsed(&ws, "com/x/Outer$Wrapped.class");
    assert_eq!(inner.name().unwrap(), "com/x/Outer$Wrapped");
    let entries = inner
        .attributes
        .iter()
        .find_map(|a| match &a.info {
            AttributeInfo::InnerClasses(entries) => Some(entries),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        inner.constant_pool.utf8(entries[0].inner_name_index).unwrap(),
        "Wrapped"
    );

    let outer = parsed(&ws, "com/x/Outer.class");
    let names = class_names(&outer);
    assert!(names.iter().any(|n| n == "com/x/Outer$Wrapped"));
    assert!(!names.iter().any(|n| n == "com/x/Outer$Inner"));
}

#[test]
fn test_method_reference_target_rename_is_flagged() {
    let ws = mapped_workspace();
    let outcome = ws
        .rename_engine()
        .rename("com/x/Foo::describe()Ljava/lang/String;", "summary")
        .unwrap();

    let rewritten = outcome.rewritten_files.clone();
    for path in ["com/x/Foo.class", "com/x/Outer.class", "com/x/User.class", "com/x/Pair.class"] {
        assert!(rewritten.iter().any(|p| p == path), "{} not rewritten", path);
    }
    assert!(!outcome.dynamic_references.is_empty());

    let outer = parsed(&ws, "com/x/Outer.class");
    let foo_calls: Vec<String> = outer
        .constant_pool
        .iter()
        .filter(|(_, c)| matches!(c, Constant::Methodref { .. }))
        .map(|(i, _)| outer.constant_pool.member_ref(i).unwrap())
        .filter(|r| r.owner == "com/x/Foo")
        .map(|r| r.name.to_string())
        .collect();
    assert!(foo_calls.contains(&"summary".to_string()));
    assert!(!foo_calls.contains(&"describe".to_string()));
}

#[test]
fn test_class_rename_through_signatures_records_and_back() {
    let ws = mapped_workspace();
    let before = compiled();
    let engine = ws.rename_engine();

    let outcome = engine.rename("com/x/Foo", "Bar").unwrap();
    assert_eq!(
        sorted(outcome.rewritten_files.clone()),
        vec![
            "com/x/Foo.class",
            "com/x/Outer.class",
            "com/x/Pair.class",
            "com/x/User.class"
        ]
    );

    let outer = parsed(&ws, "com/x/Outer.class");
    let items = outer
        .fields
        .iter()
        .find(|f| f.name(&outer.constant_pool).unwrap() == "items")
        .unwrap();
    assert_eq!(
        items.signature(&outer.constant_pool).unwrap(),
        Some("Ljava/util/List<Lcom/x/Bar;>;")
    );

    let pair = parsed(&ws, "com/x/Pair.class");
    let components = pair
        .attributes
        .iter()
        .find_map(|a| match &a.info {
            AttributeInfo::Record(components) => Some(components),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        components[0].descriptor(&pair.constant_pool).unwrap(),
        "Lcom/x/Bar;"
    );

    // string concatenation call sites survive untouched
    let bar = parsed(&ws, "com/x/Bar.class");
    assert!(bar
        .constant_pool
        .iter()
        .any(|(_, c)| matches!(c, Constant::InvokeDynamic { .. })));

    engine.rename("com/x/Bar", "Foo").unwrap();
    for (path, bytes) in &before {
        assert_eq!(&content(&ws, path), bytes, "{} differs after renaming back", path);
    }
}
