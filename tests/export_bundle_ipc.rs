mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use test_support::{add_entry, request_err, request_ok, select_and_login, spawn_sidecar, temp_dir};

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> String {
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("{} entry", name))
        .read_to_string(&mut out)
        .expect("read entry");
    out
}

#[test]
fn export_bundle_contains_manifest_snapshot_and_summary() {
    let workspace = temp_dir("rollcall-export");
    let out_path = workspace.join("out").join("group.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_and_login(&mut stdin, &mut reader, &workspace, "srp_8am", "srpLeader8AM");

    let ana = add_entry(&mut stdin, &mut reader, "Cruz, Ana");
    let _ = add_entry(&mut stdin, &mut reader, "Ben");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "attendance.set",
        json!({ "date": "2024-05-05", "entryId": ana, "status": "late" }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "export.bundle",
        json!({ "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(result["bundleFormat"], json!("rollcall-export-v1"));
    assert_eq!(result["entryCount"], json!(3));

    let f = File::open(&out_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let manifest: serde_json::Value =
        serde_json::from_str(&read_entry(&mut archive, "manifest.json")).expect("manifest json");
    assert_eq!(manifest["format"], json!("rollcall-export-v1"));
    assert_eq!(manifest["groupKey"], json!("8am"));
    assert_eq!(manifest["rosterCount"], json!(2));

    let snapshot = read_entry(&mut archive, "data/snapshot.json");
    let digest: String = Sha256::digest(snapshot.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    assert_eq!(manifest["snapshotSha256"], json!(digest));
    let snapshot: serde_json::Value = serde_json::from_str(&snapshot).expect("snapshot json");
    assert_eq!(snapshot["attendance"]["2024-05-05"][ana.as_str()], json!("late"));

    let csv = read_entry(&mut archive, "data/summary.csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "id,name,present,absent,late,total");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",Ben,0,0,0,0"), "{}", lines[1]);
    assert_eq!(lines[2], format!("{},\"Cruz, Ana\",0,0,1,1", ana));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_requires_a_session() {
    let workspace = temp_dir("rollcall-export-nosession");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "e1",
        "export.bundle",
        json!({ "outPath": workspace.join("x.zip").to_string_lossy() }),
    );
    assert_eq!(code, "no_session");

    let _ = std::fs::remove_dir_all(workspace);
}
