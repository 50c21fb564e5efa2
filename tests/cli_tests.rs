use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jvmap::classfile::access::{ACC_PUBLIC, ACC_SUPER};
use jvmap::classfile::code::opcodes;
use jvmap::classfile::{ClassFile, CodeBuilder};

/// Path to the jvmap binary built for this test run.
fn jvmap_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_jvmap"))
}

/// A temporary workspace directory with a `classes/` tree.
struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        let ws = Self {
            dir: tempfile::TempDir::new().unwrap(),
        };
        ws.write_class("classes/com/x/Foo.class", &foo_class());
        ws.write_class("classes/com/x/User.class", &user_class());
        ws
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_class(&self, rel_path: &str, content: &[u8]) {
        let full = self.dir.path().join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }

    /// Run jvmap with the given args against this workspace.
    fn run(&self, args: &[&str]) -> std::process::Output {
        Command::new(jvmap_bin())
            .arg("--workspace")
            .arg(self.dir.path())
            .args(args)
            .current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run jvmap")
    }

    fn stdout(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "jvmap {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut with_format = args.to_vec();
        with_format.extend(["--format", "json"]);
        serde_json::from_str(&self.stdout(&with_format)).unwrap()
    }

    fn import(&self) {
        let classes = self.path().join("classes");
        self.stdout(&["import", classes.to_str().unwrap()]);
    }
}

fn foo_class() -> Vec<u8> {
    let mut class =
        ClassFile::new(ACC_PUBLIC | ACC_SUPER, "com/x/Foo", Some("java/lang/Object")).unwrap();
    class.add_field(0, "bar", "I").unwrap();
    class
        .add_method(ACC_PUBLIC, "baz", "()V", Some(CodeBuilder::new().op(opcodes::RETURN).finish(0, 1)))
        .unwrap();
    class.to_bytes()
}

fn user_class() -> Vec<u8> {
    let mut class =
        ClassFile::new(ACC_PUBLIC | ACC_SUPER, "com/x/User", Some("java/lang/Object")).unwrap();
    let baz = class
        .constant_pool
        .add_method_ref("com/x/Foo", "baz", "()V")
        .unwrap();
    let code = CodeBuilder::new()
        .op(opcodes::ACONST_NULL)
        .op_cp(opcodes::INVOKEVIRTUAL, baz)
        .op(opcodes::RETURN)
        .finish(1, 1);
    class.add_method(ACC_PUBLIC, "use", "()V", Some(code)).unwrap();
    class.to_bytes()
}

#[test]
fn test_import_maps_and_reports() {
    let ws = TestWorkspace::new();
    let classes = ws.path().join("classes");
    let result = ws.json(&["import", classes.to_str().unwrap()]);
    assert_eq!(result["files_imported"], 2);
    assert_eq!(result["files_mapped"], 2);
    assert!(ws.path().join(".jvmap/index.db").exists());

    let summary = ws.json(&["summary"]);
    assert_eq!(summary["declared"], 5);
}

#[test]
fn test_symbols_filters() {
    let ws = TestWorkspace::new();
    ws.import();

    let classes = ws.json(&["symbols", "--kind", "class", "--declared"]);
    let names: Vec<&str> = classes
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["identity"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["com/x/Foo", "com/x/User"]);

    let text = ws.stdout(&["symbols", "--file", "classes/com/x/Foo.class"]);
    assert!(text.contains("com/x/Foo::bar:I"));
    assert!(!text.contains("com/x/User"));

    let bad = ws.run(&["symbols", "--kind", "module"]);
    assert!(!bad.status.success());
}

#[test]
fn test_references_and_rename() {
    let ws = TestWorkspace::new();
    ws.import();

    let refs = ws.json(&["references", "com/x/Foo::baz()V"]);
    let list = refs["references"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["file"], "classes/com/x/User.class");
    assert_eq!(list[0]["owner"], "com/x/User::use()V");

    let outcome = ws.json(&["rename", "com/x/Foo", "Bar"]);
    assert_eq!(outcome["new_identity"], "com/x/Bar");
    assert_eq!(outcome["renamed_files"][0]["to"], "classes/com/x/Bar.class");

    let after = ws.json(&["references", "com/x/Bar::baz()V"]);
    assert_eq!(after["references"].as_array().unwrap().len(), 1);

    let missing = ws.run(&["references", "com/x/Foo::baz()V"]);
    assert!(!missing.status.success());
}

#[test]
fn test_rename_rejects_cross_package_move() {
    let ws = TestWorkspace::new();
    ws.import();
    let output = ws.run(&["rename", "com/x/Foo", "org/y/Foo"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("within their package"), "{stderr}");
}

#[test]
fn test_export_writes_renamed_tree() {
    let ws = TestWorkspace::new();
    ws.import();
    ws.stdout(&["rename", "com/x/Foo::baz()V", "run"]);

    let out = ws.path().join("out");
    let result = ws.json(&["export", out.to_str().unwrap()]);
    assert_eq!(result["files_written"], 2);

    let foo = fs::read(out.join("classes/com/x/Foo.class")).unwrap();
    let foo = ClassFile::parse(&foo).unwrap();
    let names: Vec<&str> = foo
        .methods
        .iter()
        .map(|m| m.name(&foo.constant_pool).unwrap())
        .collect();
    assert_eq!(names, vec!["run"]);
}

#[test]
fn test_bad_config_is_reported() {
    let ws = TestWorkspace::new();
    fs::write(ws.path().join("jvmap.toml"), "[broker]\nqueue_capacity = 0\n").unwrap();
    let output = ws.run(&["summary"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("queue_capacity"));
}
