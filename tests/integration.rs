use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn d2d_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("d2d");
    path
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

/// Development sources as a directory, the deployed webapp as a zip holding
/// a jar compiled from them.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let from_dir = root.join("uploads/from-sources");
    fs::create_dir_all(from_dir.join("src/main/java/com/acme")).unwrap();
    fs::write(
        from_dir.join("src/main/java/com/acme/Greeter.java"),
        "/* Copyright Acme */\npackage com.acme;\n\npublic class Greeter {\n    class Inner {}\n}\n",
    )
    .unwrap();
    fs::write(from_dir.join("README.txt"), "Acme greeter\n").unwrap();

    let jar = zip_bytes(&[
        ("com/acme/Greeter.class", b"\xca\xfe\xba\xbe greeter"),
        ("com/acme/Greeter$Inner.class", b"\xca\xfe\xba\xbe inner"),
    ]);
    let war = zip_bytes(&[
        ("README.txt", b"Acme greeter\n"),
        ("empty.txt", b""),
        ("WEB-INF/lib/acme.jar", &jar),
    ]);
    fs::write(root.join("uploads/to-webapp.war"), war).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/d2d.sqlite"

[workspace]
root = "{root}/projects"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("d2d.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_d2d(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = d2d_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run d2d binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn create_and_ingest(tmp: &TempDir, config_path: &Path) {
    let uploads = tmp.path().join("uploads");
    let from = uploads.join("from-sources");
    let to = uploads.join("to-webapp.war");

    let (stdout, stderr, success) = run_d2d(config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, stderr, success) = run_d2d(
        config_path,
        &[
            "project",
            "create",
            "acme",
            "--input",
            from.to_str().unwrap(),
            "--input",
            to.to_str().unwrap(),
        ],
    );
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, stderr, success) = run_d2d(config_path, &["ingest", "acme"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    // from: README.txt, Greeter.java; to: README.txt, empty.txt, acme.jar, 2 classes
    assert!(stdout.contains("files: 7"), "{}", stdout);
    assert!(stdout.contains("archives extracted: 1"), "{}", stdout);
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_d2d(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_d2d(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_pipelines_lists_groups() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_d2d(&config_path, &["pipelines"]);
    assert!(success);
    assert!(stdout.contains("deploy_to_develop"));
    assert!(stdout.contains("map_checksum_and_path"));
    assert!(stdout.contains("map_java_to_class [java]"));
}

#[test]
fn test_java_pipeline_end_to_end() {
    let (tmp, config_path) = setup_test_env();
    create_and_ingest(&tmp, &config_path);

    let (stdout, stderr, success) = run_d2d(&config_path, &["run", "acme", "--group", "java"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    // sha1 README, two classes to Greeter.java, jar to source root
    assert!(stdout.contains("relations created: 4"), "{}", stdout);
    assert!(stdout.contains("unmatched: 0"), "{}", stdout);

    let (stdout, _, success) = run_d2d(
        &config_path,
        &["relations", "acme", "--map-type", "java_to_class"],
    );
    assert!(success);
    assert!(stdout.contains("Greeter$Inner.class"));
    assert!(stdout.contains("source_root=from/src/main/java/"));
    assert!(stdout.contains("2 relation(s)"), "{}", stdout);

    let (stdout, _, success) = run_d2d(&config_path, &["relations", "acme", "--path", "**/*.jar"]);
    assert!(success);
    assert!(stdout.contains("jar_to_source"));
    assert!(stdout.contains("from/src/main/java -> to/WEB-INF/lib/acme.jar"), "{}", stdout);

    let (stdout, _, success) = run_d2d(
        &config_path,
        &["resources", "acme", "--status", "ignored-empty-file"],
    );
    assert!(success);
    assert!(stdout.contains("to/empty.txt"));
    assert!(stdout.contains("1 resource(s)"));
}

#[test]
fn test_export_json() {
    let (tmp, config_path) = setup_test_env();
    create_and_ingest(&tmp, &config_path);
    let (_, stderr, success) = run_d2d(&config_path, &["run", "acme", "--group", "java"]);
    assert!(success, "{}", stderr);

    let output = tmp.path().join("out/acme.json");
    let (_, stderr, success) = run_d2d(
        &config_path,
        &["export", "acme", "--output", output.to_str().unwrap()],
    );
    assert!(success, "{}", stderr);

    let data: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(data["project"], "acme");
    assert_eq!(data["relations"].as_array().unwrap().len(), 4);
    assert!(data["packages"].as_array().unwrap().is_empty());

    let resources = data["resources"].as_array().unwrap();
    let jar = resources
        .iter()
        .find(|r| r["path"] == "to/WEB-INF/lib/acme.jar")
        .unwrap();
    assert_eq!(jar["status"], "mapped");
    let extract_dir = resources
        .iter()
        .find(|r| r["path"] == "to/WEB-INF/lib/acme.jar-extract")
        .unwrap();
    assert_eq!(extract_dir["status"], "ignored-directory");
}

#[test]
fn test_run_without_optional_groups() {
    let (tmp, config_path) = setup_test_env();
    create_and_ingest(&tmp, &config_path);

    let (stdout, stderr, success) = run_d2d(&config_path, &["run", "acme", "--json"]);
    assert!(success, "{}", stderr);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let steps: Vec<&str> = summary["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert!(!steps.contains(&"map_java_to_class"));
    assert!(steps.contains(&"map_sha1"));
    assert!(steps.contains(&"flag_not_analyzed"));
}

#[test]
fn test_errors() {
    let (tmp, config_path) = setup_test_env();
    create_and_ingest(&tmp, &config_path);

    let (_, stderr, success) = run_d2d(&config_path, &["ingest", "acme"]);
    assert!(!success);
    assert!(stderr.contains("already ingested"), "{}", stderr);

    let (_, stderr, success) = run_d2d(&config_path, &["run", "acme", "--pipeline", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown pipeline"), "{}", stderr);

    let (_, _, success) = run_d2d(&config_path, &["run", "acme", "--group", "cobol"]);
    assert!(!success);

    let (_, stderr, success) = run_d2d(&config_path, &["run", "missing"]);
    assert!(!success);
    assert!(stderr.contains("Project not found"), "{}", stderr);
}

#[test]
fn test_ingest_requires_both_sides() {
    let (tmp, config_path) = setup_test_env();
    run_d2d(&config_path, &["init"]);
    let to = tmp.path().join("uploads/to-webapp.war");

    let (_, _, success) = run_d2d(
        &config_path,
        &["project", "create", "halfway", "--input", to.to_str().unwrap()],
    );
    assert!(success);

    let (_, stderr, success) = run_d2d(&config_path, &["ingest", "halfway"]);
    assert!(!success);
    assert!(stderr.contains("from*"), "{}", stderr);
}
