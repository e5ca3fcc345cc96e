mod test_support;

use serde_json::json;
use test_support::{add_entry, request_ok, select_and_login, spawn_sidecar, temp_dir};

#[test]
fn local_cache_survives_restart_and_is_scoped_by_group() {
    let workspace = temp_dir("rollcall-cache-restart");
    let ana;
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = select_and_login(&mut stdin, &mut reader, &workspace, "srp_8am", "srpLeader8AM");
        ana = add_entry(&mut stdin, &mut reader, "Ana");
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "s1",
            "attendance.set",
            json!({ "date": "2024-07-07", "entryId": ana, "status": "absent" }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_and_login(&mut stdin, &mut reader, &workspace, "srp_8am", "srpLeader8AM");
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "roster.list",
        json!({ "date": "2024-07-07" }),
    );
    let entries = list["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], json!(ana));
    assert_eq!(entries[0]["status"], json!("absent"));
    assert_eq!(
        entries[0]["summary"],
        json!({ "present": 0, "absent": 1, "late": 0, "total": 1 })
    );

    // Another leader in the same workspace starts from an empty roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login2",
        "session.login",
        json!({ "username": "srp_4pm", "password": "srpLeader4PM" }),
    );
    let _ = test_support::wait_ready(&mut stdin, &mut reader);
    let list = request_ok(&mut stdin, &mut reader, "l2", "roster.list", json!({}));
    assert_eq!(list["entries"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}
