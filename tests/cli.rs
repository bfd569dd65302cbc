use std::process::Command;

#[test]
fn indexer_writes_index_and_mapping() {
    let out = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_papersearch-hnsw"))
        .arg("--data-dir")
        .arg(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures"))
        .arg("--out-dir")
        .arg(out.path())
        .arg("--batch-size")
        .arg("4")
        .output()
        .expect("run indexer");

    assert!(
        output.status.success(),
        "indexer exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    for artifact in ["cord19-hnsw.bin", "cord19-hnsw.hnsw.graph", "cord19-hnsw.hnsw.data"] {
        assert!(out.path().join(artifact).exists(), "{artifact} missing");
    }
    let mapping = std::fs::read_to_string(out.path().join("cord19-hnsw.txt")).expect("mapping");
    assert_eq!(
        mapping.lines().collect::<Vec<_>>(),
        vec!["ug7v899j", "02tnwd4m", "ejv2xln0", "2b73a28n", "9785vg6d", "zjufx4fo"]
    );
}

#[test]
fn indexer_refuses_mismatched_inputs() {
    let data = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        data.path().join("metadata.csv"),
        "cord_uid,title\na,\"One, two\"\nb,Three\n",
    )
    .expect("write metadata");
    std::fs::write(data.path().join("specter.csv"), "a,0.1,0.2\n").expect("write embeddings");

    let output = Command::new(env!("CARGO_BIN_EXE_papersearch-hnsw"))
        .arg("--data-dir")
        .arg(data.path())
        .output()
        .expect("run indexer");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("integrity error"));
    assert!(!data.path().join("cord19-hnsw.bin").exists());
    assert!(!data.path().join("cord19-hnsw.hnsw.graph").exists());
    assert!(!data.path().join("cord19-hnsw.txt").exists());
}
