
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

use serde_json::json;
use test_support::{request_ok, spawn_sidecar};

fn roster(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> serde_json::Value {
    request_ok(stdin, reader, id, "marks.roster", json!({}))
}

fn row<'a>(roster: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    roster
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        })
        .unwrap_or_else(|| panic!("student {student_id} missing from roster"))
}

/// Poll the roster until the self-originated change notification has
/// forced a refetch past `min_loads`.
fn roster_after_loads(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    min_loads: u64,
) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let snap = roster(stdin, reader, &format!("{id_prefix}-{attempt}"));
        let loads = snap.get("loads").and_then(|v| v.as_u64()).unwrap_or(0);
        let ready = snap.get("phase").and_then(|v| v.as_str()) == Some("ready");
        if ready && loads >= min_loads {
            return snap;
        }
        assert!(
            Instant::now() < deadline,
            "roster never reloaded to {min_loads} loads: {snap}"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn first_save_inserts_then_updates_and_reloads_converge() {
    let (mut child, mut stdin, mut reader, data_dir) = spawn_sidecar("naggalamad-marks-flow");

    let listed = request_ok(&mut stdin, &mut reader, "1", "allocations.list", json!({}));
    assert_eq!(
        listed.get("selectedId").and_then(|v| v.as_str()),
        Some("alloc-math-north")
    );

    let snap = roster(&mut stdin, &mut reader, "2");
    let names: Vec<&str> = snap
        .get("rows")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|r| r.get("fullName").and_then(|v| v.as_str()).unwrap())
        .collect();
    // Active students of the stream only, ordered by name; the
    // deactivated student and the other stream never show.
    assert_eq!(
        names,
        vec!["Akers Patricia", "Kato John", "Nassozi Jane", "Opio David"]
    );

    // Kato's existing mark arrives with its identifier cached.
    let kato = row(&snap, "stu-kato");
    assert_eq!(kato.get("score").and_then(|v| v.as_f64()), Some(91.0));
    assert_eq!(
        kato.get("markId").and_then(|v| v.as_str()),
        Some("mark-kato-math")
    );
    let grades: Vec<&str> = snap
        .get("grades")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|g| g.as_str().unwrap())
        .collect();
    assert_eq!(grades, vec!["-", "D1", "-", "-"]);

    // Enter 72 for a first-time student: grade C3, save inserts once.
    let entered = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.enter",
        json!({ "studentId": "stu-nassozi", "score": 72 }),
    );
    assert_eq!(entered.get("grade").and_then(|v| v.as_str()), Some("C3"));

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.save",
        json!({ "studentId": "stu-nassozi" }),
    );
    let outcome = saved.get("outcome").unwrap();
    assert_eq!(outcome.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(outcome.get("inserted").and_then(|v| v.as_bool()), Some(true));
    let mark_id = outcome
        .get("markId")
        .and_then(|v| v.as_str())
        .expect("inserted mark id")
        .to_string();

    // The engine's own write comes back as a change notification and
    // forces a full refetch; the refetched roster carries the stored
    // score and identifier.
    let snap = roster_after_loads(&mut stdin, &mut reader, "5", 2);
    let nassozi = row(&snap, "stu-nassozi");
    assert_eq!(nassozi.get("score").and_then(|v| v.as_f64()), Some(72.0));
    assert_eq!(
        nassozi.get("markId").and_then(|v| v.as_str()),
        Some(mark_id.as_str())
    );

    // Second save for the same student updates the cached identifier
    // instead of inserting a duplicate.
    let entered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "marks.enter",
        json!({ "studentId": "stu-nassozi", "score": 90 }),
    );
    assert_eq!(entered.get("grade").and_then(|v| v.as_str()), Some("D1"));
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "marks.save",
        json!({ "studentId": "stu-nassozi" }),
    );
    let outcome = saved.get("outcome").unwrap();
    assert_eq!(outcome.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        outcome.get("inserted").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        outcome.get("markId").and_then(|v| v.as_str()),
        Some(mark_id.as_str())
    );

    // Let the update's own reload settle before editing more cells.
    let _ = roster_after_loads(&mut stdin, &mut reader, "8", 3);

    // Save All persists every edited row concurrently.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "marks.enter",
        json!({ "studentId": "stu-akers", "score": 45 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "marks.enter",
        json!({ "studentId": "stu-opio", "score": 64 }),
    );
    let bulk = request_ok(&mut stdin, &mut reader, "11", "marks.saveAll", json!({}));
    assert_eq!(bulk.get("saved").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(bulk.get("failed").and_then(|v| v.as_u64()), Some(0));

    // Two concurrent inserts can reach the grid as one applied reload
    // (the superseded one is dropped), so converge on content.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let snap = roster(&mut stdin, &mut reader, &format!("12-{attempt}"));
        let grades: Vec<&str> = snap
            .get("grades")
            .and_then(|v| v.as_array())
            .unwrap()
            .iter()
            .map(|g| g.as_str().unwrap())
            .collect();
        let clean = snap
            .get("rows")
            .and_then(|v| v.as_array())
            .unwrap()
            .iter()
            .all(|r| r.get("cell").and_then(|v| v.as_str()) == Some("clean"));
        if grades == vec!["P8", "D1", "D1", "C5"] && clean {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "bulk-saved roster never converged: {snap}"
        );
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}
