//! End-to-end scan scenarios built from synthetic packages.

use flate2::write::GzEncoder;
use flate2::Compression;
use pysift::config::{ResourceLimits, ScanConfig, SensitiveFilePolicy};
use pysift::locator::ArtifactResolver;
use pysift::pipeline::Engine;
use pysift::types::{PackageRef, ScanStatus, Severity};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

fn engine_with(config: ScanConfig) -> Engine {
    Engine::new(config, ArtifactResolver::new(None, None)).unwrap()
}

fn engine() -> Engine {
    engine_with(ScanConfig { parallel: false, ..ScanConfig::default() })
}

fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    for (name, body) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();
    cursor.into_inner()
}

fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(files)).unwrap();
}

fn write_sdist(path: &Path, files: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, *name, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn malicious_sdist_scores_critical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("badpkg-1.0.tar.gz");
    write_sdist(
        &path,
        &[
            ("badpkg-1.0/PKG-INFO", b"Metadata-Version: 2.1\nName: badpkg\n".as_slice()),
            (
                "badpkg-1.0/setup.py",
                b"import base64\nimport requests\nrequests.get('http://collect.example/beacon')\nexec(base64.b64decode('aW1wb3J0IG9z'))\n",
            ),
        ],
    );

    let result = engine().scan_package(&PackageRef::local("badpkg", &path));
    assert_eq!(result.status, ScanStatus::Completed);

    let exec = result
        .findings
        .iter()
        .find(|f| f.kind == "dynamic-execution-of-decoded-value")
        .expect("decoded-exec finding");
    assert_eq!(exec.severity, Severity::Critical);
    assert!(exec.confidence >= 0.85);
    assert_eq!(exec.line, Some(4));

    assert!(result.findings.iter().any(|f| f.kind == "setup-script-network"));
    assert!(result.findings.iter().any(|f| f.kind == "setup-script-exec"));
    assert_eq!(result.max_severity(), Some(Severity::Critical));
}

#[test]
fn traversal_entries_are_rejected_not_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sneaky.zip");
    write_zip(
        &path,
        &[
            ("../../outside.sh", b"echo pwned\n".as_slice()),
            ("/etc/cron.d/job", b"* * * * * root true\n"),
            ("pkg/ok.py", b"x = 1\n"),
        ],
    );

    let result = engine().scan_package(&PackageRef::local("sneaky", &path));
    assert!(result
        .findings
        .iter()
        .any(|f| f.kind == "suspicious-archive-entry-parent-reference"));
    assert!(result.findings.iter().any(|f| f.kind == "suspicious-archive-entry-absolute-path"));
    // The flagged entries never become items; the honest one does.
    assert!(result.findings.iter().all(|f| !f.location.ends_with("ok.py")));
    assert!(!dir.path().join("outside.sh").exists());
}

#[test]
fn decompression_budget_aborts_the_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bomb.zip");
    let filler = vec![b'a'; 4096];
    write_zip(&path, &[("one.bin", filler.as_slice()), ("two.bin", filler.as_slice())]);

    let config = ScanConfig {
        parallel: false,
        limits: ResourceLimits {
            max_file_size: 64 * 1024,
            max_decompressed_size: 6 * 1024,
            ..ResourceLimits::default()
        },
        ..ScanConfig::default()
    };
    let result = engine_with(config).scan_package(&PackageRef::local("bomb", &path));
    assert_eq!(result.status, ScanStatus::PartiallyFailed);
    assert!(result.findings.iter().any(|f| f.kind == "resource-limit-exceeded"));
    assert!(result.usage.decompressed_bytes <= 6 * 1024);
}

#[test]
fn oversized_entry_is_skipped_with_a_finding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fat.zip");
    let big = vec![b'x'; 128 * 1024];
    write_zip(&path, &[("huge.bin", big.as_slice()), ("small.py", b"x = 1\n")]);

    let config = ScanConfig {
        parallel: false,
        limits: ResourceLimits { max_file_size: 64 * 1024, ..ResourceLimits::default() },
        ..ScanConfig::default()
    };
    let result = engine_with(config).scan_package(&PackageRef::local("fat", &path));
    assert!(result.findings.iter().any(|f| f.kind == "archive-file-size-exceeded"));
    // The small sibling was still examined.
    assert!(result.usage.items_examined >= 1);
}

#[test]
fn nesting_beyond_the_depth_ceiling_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let level3 = zip_bytes(&[("leaf.py", b"x = 1\n")]);
    let level2 = zip_bytes(&[("level3.zip", level3.as_slice())]);
    let level1 = zip_bytes(&[("level2.zip", level2.as_slice())]);
    let path = dir.path().join("nested.zip");
    std::fs::write(&path, level1).unwrap();

    let config = ScanConfig {
        parallel: false,
        limits: ResourceLimits { max_unpack_depth: 2, ..ResourceLimits::default() },
        ..ScanConfig::default()
    };
    let result = engine_with(config).scan_package(&PackageRef::local("nested", &path));
    assert_eq!(result.status, ScanStatus::PartiallyFailed);
    let depth = result
        .findings
        .iter()
        .find(|f| f.kind == "unpacked-depth-exceeded")
        .expect("depth finding");
    assert!(depth.message.contains("level3.zip"));
}

#[test]
fn leaked_pypirc_with_flat_policy_floors_the_total() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("oops");
    std::fs::create_dir(&pkg).unwrap();
    std::fs::write(pkg.join(".pypirc"), "[pypi]\nusername=me\npassword=hunter2\n").unwrap();
    std::fs::write(pkg.join("mod.py"), "x = 1\n").unwrap();

    let config = ScanConfig {
        parallel: false,
        sensitive_file_policy: SensitiveFilePolicy::Flat(250),
        ..ScanConfig::default()
    };
    let result = engine_with(config).scan_package(&PackageRef::local("oops", &pkg));

    let sensitive = result
        .findings
        .iter()
        .find(|f| f.kind == "contain-sensitive-file")
        .expect("sensitive-file finding");
    assert_eq!(sensitive.score, 100);
    assert!(result.findings.iter().any(|f| f.kind == "sensitive-file-override"));
    assert_eq!(result.score, 250);
    // The total is still exactly the sum of the findings.
    let sum: u32 = result.findings.iter().map(|f| f.score).sum();
    assert_eq!(sum, result.score);
}

#[test]
fn typosquat_of_a_popular_name_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("top.json");
    std::fs::write(&dataset, r#"{"requests": 100000, "requets": 0}"#).unwrap();

    let pkg = dir.path().join("requets");
    std::fs::create_dir(&pkg).unwrap();
    std::fs::write(pkg.join("PKG-INFO"), "Name: requets\n").unwrap();

    let config = ScanConfig {
        parallel: false,
        popularity_dataset_path: Some(dataset),
        ..ScanConfig::default()
    };
    // "requets" is one deletion away from "requests".
    let result = engine_with(config).scan_package(&PackageRef::local("requets", &pkg));
    let squat = result.findings.iter().find(|f| f.kind == "typosquatting").expect("typosquat");
    assert!(squat.message.contains("requests"));
    assert!((squat.confidence - 0.8).abs() < 1e-6);
}

#[test]
fn short_rsa_key_generation_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keygen-1.0.tar.gz");
    write_sdist(
        &path,
        &[
            ("keygen-1.0/PKG-INFO", b"Name: keygen\n".as_slice()),
            (
                "keygen-1.0/keygen/core.py",
                b"from cryptography.hazmat.primitives.asymmetric import rsa\nkey = rsa.generate_private_key(public_exponent=65537, key_size=1024)\n",
            ),
        ],
    );

    let result = engine().scan_package(&PackageRef::local("keygen", &path));
    assert_eq!(result.status, ScanStatus::Completed);
    let weak = result.findings.iter().find(|f| f.kind == "weak-crypto-key").expect("weak key");
    assert_eq!(weak.score, 100);
    assert_eq!(weak.line, Some(2));
    assert!(weak.message.contains("1024-bit rsa"));
}

#[test]
fn semantic_rules_from_config_fire_on_call_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("rules.json");
    std::fs::write(
        &rules,
        r#"[{"id": "eval-over-b64", "score": 90, "call": "eval", "argument_contains": "b64decode"}]"#,
    )
    .unwrap();

    let pkg = dir.path().join("pkg");
    std::fs::create_dir(&pkg).unwrap();
    std::fs::write(pkg.join("PKG-INFO"), "Name: pkg\n").unwrap();
    std::fs::write(pkg.join("loader.py"), "import base64\neval(base64.b64decode(blob))\n").unwrap();

    let config = ScanConfig {
        parallel: false,
        semantic_rules_path: Some(rules),
        ..ScanConfig::default()
    };
    let result = engine_with(config).scan_package(&PackageRef::local("pkg", &pkg));
    let hit = result.findings.iter().find(|f| f.kind == "eval-over-b64").expect("semantic hit");
    assert_eq!(hit.score, 90);
    assert_eq!(hit.line, Some(2));
}

#[test]
fn batch_output_order_matches_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut references = Vec::new();
    for name in ["alpha", "bravo", "charlie", "delta"] {
        let path = dir.path().join(format!("{name}.zip"));
        write_zip(
            &path,
            &[("PKG-INFO", format!("Name: {name}\n").as_bytes()), ("m.py", b"x = 1\n")],
        );
        references.push(PackageRef::local(name, &path));
    }

    let parallel = engine_with(ScanConfig::default()).scan_all(&references);
    let names: Vec<&str> = parallel.iter().map(|r| r.reference.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta"]);
    assert!(parallel.iter().all(|r| r.status == ScanStatus::Completed));
}

#[test]
fn every_reference_gets_exactly_one_result() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.zip");
    write_zip(&good, &[("PKG-INFO", b"Name: good\n".as_slice()), ("m.py", b"x = 1\n")]);

    let references = vec![
        PackageRef::local("good", &good),
        PackageRef::local("ghost", "/nonexistent/ghost.whl"),
    ];
    let results = engine().scan_all(&references);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, ScanStatus::Completed);
    assert_eq!(results[1].status, ScanStatus::Failed);
    assert!(results[1].error.is_some());
}
