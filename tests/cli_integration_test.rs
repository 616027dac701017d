use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

mod common;
use common::PERSON_XSD;

/// A scratch directory doubling as a `file://` schema catalog
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for version in ["0.23", "0.24"] {
            let xsd = dir.path().join(version).join("xsd");
            fs::create_dir_all(&xsd).unwrap();
            fs::write(xsd.join("person.xsd"), PERSON_XSD).unwrap();
        }
        Self { dir }
    }

    fn catalog(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_schemadoc"));
        command
            .current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .arg("--catalog-url")
            .arg(self.catalog())
            .arg("--no-cache")
            .args(args);
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("Failed to execute schemadoc")
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn schemadoc");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        child.wait_with_output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("terminated by signal")
}

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_schemadoc"))
        .arg("--help")
        .output()
        .unwrap();

    assert!(output.status.success());
    let help = stdout(&output);
    for command in ["bootstrap", "cat", "query", "modify", "cache-clear"] {
        assert!(help.contains(command), "missing {} in\n{}", command, help);
    }
}

#[test]
fn test_bootstrap_then_cat() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");

    let output = ws.run(&["bootstrap", &doc, "person"]);
    assert_eq!(code(&output), 0, "{:?}", output);

    let output = ws.run(&["cat", &doc]);
    assert_eq!(code(&output), 0);
    assert_eq!(
        stdout(&output),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<person xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:noNamespaceSchemaLocation=\"{}/0.23/xsd/person.xsd\"/>\n",
            ws.catalog()
        )
    );
}

#[test]
fn test_schema_version_flag_repairs_binding() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");
    ws.run(&["bootstrap", &doc, "person"]);

    let output = ws.run(&["--schema-version", "0.24", "bootstrap", &doc, "person"]);
    assert_eq!(code(&output), 0, "{:?}", output);

    let output = ws.run(&["query", &doc, "/person/@xsi:noNamespaceSchemaLocation"]);
    assert_eq!(
        stdout(&output),
        format!("{}/0.24/xsd/person.xsd\n", ws.catalog())
    );
}

#[test]
fn test_modify_from_stdin_and_query() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");
    ws.run(&["bootstrap", &doc, "person"]);

    let directives = r#"[
        {"kind": "add-node", "selector": "/person", "name": "name", "text": "Ann"},
        {"kind": "add-node", "selector": "/person", "name": "name", "text": "Bea"},
        {"kind": "set-attribute", "selector": "/person/name[2]", "name": "id", "value": "b"}
    ]"#;
    let output = ws.run_with_stdin(&["modify", &doc, "-"], directives);
    assert_eq!(code(&output), 0, "{:?}", output);
    assert_eq!(stdout(&output), "document updated\n");

    let output = ws.run_with_stdin(
        &["modify", &doc, "-"],
        &directives.replace("Bea", "Cy").replace("name[2]", "name[last()]"),
    );
    assert_eq!(code(&output), 0);

    let output = ws.run(&["query", &doc, "/person/name/text()"]);
    assert_eq!(stdout(&output), "Ann\nBea\nAnn\nCy\n");

    let output = ws.run(&["--format", "json", "query", &doc, "/person/name[@id]", "--nodes"]);
    let fragments: Vec<String> = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(
        fragments,
        vec![r#"<name id="b">Bea</name>"#, r#"<name id="b">Cy</name>"#]
    );
}

#[test]
fn test_modify_from_file_reports_unchanged() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");
    let directives = ws.path("age.json");
    fs::write(
        &directives,
        r#"[{"kind": "remove-node", "selector": "/person/age"},
            {"kind": "add-node", "selector": "/person", "name": "age", "text": "41"}]"#,
    )
    .unwrap();
    ws.run(&["bootstrap", &doc, "person"]);

    let first = ws.run(&["--format", "json", "modify", &doc, &directives]);
    assert_eq!(stdout(&first), r#"{"outcome":"written"}"#);
    let second = ws.run(&["--format", "json", "modify", &doc, &directives]);
    assert_eq!(stdout(&second), r#"{"outcome":"unchanged"}"#);
}

#[test]
fn test_invalid_modification_exit_code_and_untouched_file() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");
    ws.run(&["bootstrap", &doc, "person"]);
    let before = fs::read_to_string(&doc).unwrap();

    let output = ws.run_with_stdin(
        &["--format", "json", "modify", &doc, "-"],
        r#"[{"kind": "add-node", "selector": "/person", "name": "age", "text": "old"}]"#,
    );

    assert_eq!(code(&output), 1);
    let error: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(error["error"], "validation");
    assert!(!error["violations"].as_array().unwrap().is_empty());
    assert_eq!(fs::read_to_string(&doc).unwrap(), before);
}

#[test]
fn test_error_exit_codes() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");

    // missing document
    assert_eq!(code(&ws.run(&["cat", &doc])), 2);

    ws.run(&["bootstrap", &doc, "person"]);

    // malformed expression
    assert_eq!(code(&ws.run(&["query", &doc, "/person["])), 1);

    // unresolvable directive target
    let output = ws.run_with_stdin(
        &["modify", &doc, "-"],
        r#"[{"kind": "set-text", "selector": "/person/name", "text": "x"}]"#,
    );
    assert_eq!(code(&output), 1);
    assert!(stdout(&output).contains("Directive #0"), "{}", stdout(&output));

    // unparseable directive list
    assert_eq!(code(&ws.run_with_stdin(&["modify", &doc, "-"], "not json")), 1);

    // invalid configuration
    assert_eq!(code(&ws.run(&["--schema-version", " ", "cat", &doc])), 3);
}

#[test]
fn test_disk_cache_populated_and_cleared() {
    let ws = Workspace::new();
    let doc = ws.path("person.xml");
    let cache = ws.path("cache");
    let run = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_schemadoc"))
            .current_dir(ws.dir.path())
            .args(["--catalog-url", ws.catalog().as_str(), "--cache-dir", cache.as_str()])
            .args(args)
            .output()
            .unwrap()
    };

    assert_eq!(code(&run(&["bootstrap", &doc, "person"])), 0);
    assert_eq!(code(&run(&["query", &doc, "/person"])), 0);
    assert!(Path::new(&cache).join("metadata").is_dir());

    let output = run(&["cache-clear", "--expired"]);
    assert_eq!(code(&output), 0);
    assert!(stdout(&output).starts_with("removed 0 of 0"), "{}", stdout(&output));

    let output = run(&["--format", "json", "cache-clear"]);
    assert_eq!(code(&output), 0);
    let cleared: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(cleared["removed_entries"], 1);
    assert!(!Path::new(&cache).join("metadata").exists());
}
