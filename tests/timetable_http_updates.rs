use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

const SECRET: &str = "updates-secret";

struct Service {
    child: Child,
    base: String,
    db_path: PathBuf,
    dir: tempfile::TempDir,
}

impl Drop for Service {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn command(dir: &Path, db_path: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_timetabled"));
    cmd.current_dir(dir)
        .env("TIMETABLED_CONFIG", dir.join("absent.toml"))
        .env("TIMETABLED_AUTH__JWT_SECRET", SECRET)
        .env("TIMETABLED_DATABASE__PATH", db_path)
        .env("TIMETABLED_SERVER__BIND", "127.0.0.1:0")
        .env("TIMETABLED_LOG", "warn");
    cmd
}

fn spawn_service() -> Service {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("timetable.sqlite3");
    let mut child = command(dir.path(), &db_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdout = child.stdout.take().expect("child stdout");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("read readiness line");
    let ready: Value = serde_json::from_str(line.trim()).expect("parse readiness json");
    let addr = ready["listening"].as_str().expect("listening addr").to_string();
    Service {
        child,
        base: format!("http://{addr}"),
        db_path,
        dir,
    }
}

fn seed(service: &Service) {
    let conn = rusqlite::Connection::open(&service.db_path).expect("open db");
    conn.execute_batch(
        "INSERT INTO departments(id, name, code) VALUES(1, 'Computer Science', 'CSE');
         INSERT INTO batches(id, department_id, start_year, end_year, current_semester)
           VALUES(1, 1, 2023, 2027, 3);
         INSERT INTO sections(id, batch_id, name) VALUES(1, 1, 'A');
         INSERT INTO sections(id, batch_id, name) VALUES(2, 1, 'B');
         INSERT INTO sections(id, batch_id, name) VALUES(3, 1, 'C');
         INSERT INTO subjects(department_id, code, name, semester, type)
           VALUES(1, 'SUB101', 'Data Structures', 3, 'theory');
         INSERT INTO subjects(department_id, code, name, semester, type)
           VALUES(1, 'SUB102', 'Discrete Mathematics', 3, 'theory');
         INSERT INTO users(id, email, name, role) VALUES(1, 'f1@college.edu', 'Faculty One', 'faculty');
         INSERT INTO users(id, email, name, role) VALUES(2, 'f2@college.edu', 'Faculty Two', 'faculty');
         INSERT INTO users(id, email, name, role) VALUES(3, 's@college.edu', 'Student', 'student');
         INSERT INTO users(id, email, name, role) VALUES(10, 'admin@college.edu', 'Admin', 'admin');",
    )
    .expect("seed");
}

fn token_for(service: &Service, user_id: i64) -> String {
    let out = command(service.dir.path(), &service.db_path)
        .args(["issue-token", "--user-id", &user_id.to_string()])
        .stderr(Stdio::null())
        .output()
        .expect("run issue-token");
    assert!(out.status.success(), "issue-token failed for user {user_id}");
    String::from_utf8(out.stdout)
        .expect("utf8 token")
        .trim()
        .to_string()
}

fn send(req: reqwest::blocking::RequestBuilder) -> (u16, Value) {
    let resp = req.send().expect("send request");
    let status = resp.status().as_u16();
    let body: Value = resp.json().expect("json body");
    (status, body)
}

fn slot(section_id: i64, period: i64, subject: &str, faculty_id: i64, room: &str) -> Value {
    json!({
        "batch_id": 1,
        "section_id": section_id,
        "day": "Wednesday",
        "period": period,
        "subject_code": subject,
        "faculty_id": faculty_id,
        "room": room,
        "type": "theory"
    })
}

#[test]
fn put_replaces_in_place_and_is_idempotent() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/timetable", service.base);

    let (status, created) = send(
        client
            .post(&url)
            .bearer_auth(&admin)
            .json(&slot(1, 2, "SUB101", 1, "101")),
    );
    assert_eq!(status, 201, "{created}");
    let id = created["result"]["slot"]["id"].clone();

    let update = slot(1, 2, "SUB102", 2, "Lab-2");
    let (status, first) = send(client.put(&url).bearer_auth(&admin).json(&update));
    assert_eq!(status, 200, "{first}");
    assert_eq!(first["result"]["replaced"], json!(true));
    assert_eq!(first["result"]["slot"]["id"], id);
    assert_eq!(first["result"]["slot"]["faculty_id"], json!(2));

    let (status, second) = send(client.put(&url).bearer_auth(&admin).json(&update));
    assert_eq!(status, 200, "{second}");
    assert_eq!(second["result"]["slot"], first["result"]["slot"]);

    let (_, listed) = send(
        client
            .get(format!("{}/timetable?batchId=1&sectionId=1", service.base))
            .bearer_auth(&admin),
    );
    assert_eq!(listed["result"]["slots"], json!([first["result"]["slot"]]));
}

#[test]
fn put_without_existing_slot_is_rejected() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let client = reqwest::blocking::Client::new();

    let (status, body) = send(
        client
            .put(format!("{}/timetable", service.base))
            .bearer_auth(&admin)
            .json(&slot(1, 3, "SUB101", 1, "101")),
    );
    assert_eq!(status, 409, "{body}");
    assert_eq!(body["reasons"][0]["code"], json!("InvalidReference"));
}

#[test]
fn move_frees_the_old_key() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/timetable", service.base);

    let (status, _) = send(
        client
            .post(&url)
            .bearer_auth(&admin)
            .json(&slot(1, 1, "SUB101", 1, "101")),
    );
    assert_eq!(status, 201);

    let mut moved = slot(1, 2, "SUB101", 1, "101");
    moved["update_key"] = json!({
        "batch_id": 1, "section_id": 1, "day": "Wednesday", "period": 1
    });
    let (status, body) = send(client.put(&url).bearer_auth(&admin).json(&moved));
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["result"]["slot"]["period"], json!(2));

    let (_, listed) = send(
        client
            .get(format!("{}/timetable?batchId=1&sectionId=1", service.base))
            .bearer_auth(&admin),
    );
    let periods: Vec<i64> = listed["result"]["slots"]
        .as_array()
        .expect("slots")
        .iter()
        .map(|s| s["period"].as_i64().expect("period"))
        .collect();
    assert_eq!(periods, vec![2]);
}

#[test]
fn delete_removes_then_reports_missing() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let student = token_for(&service, 3);
    let client = reqwest::blocking::Client::new();

    let (status, _) = send(
        client
            .post(format!("{}/timetable", service.base))
            .bearer_auth(&admin)
            .json(&slot(2, 4, "SUB101", 1, "101")),
    );
    assert_eq!(status, 201);

    let target = format!(
        "{}/timetable?batchId=1&sectionId=2&day=Wednesday&period=4",
        service.base
    );
    let (status, body) = send(client.delete(&target).bearer_auth(&student));
    assert_eq!(status, 403, "{body}");

    let (status, body) = send(client.delete(&target).bearer_auth(&admin));
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["result"]["removed"]["subject_code"], json!("SUB101"));

    let (status, body) = send(client.delete(&target).bearer_auth(&admin));
    assert_eq!(status, 404, "{body}");
}

#[test]
fn faculty_schedule_is_scoped_to_own_records() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let faculty = token_for(&service, 1);
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/timetable", service.base);

    for (section, period) in [(1, 1), (2, 3)] {
        let (status, body) = send(
            client
                .post(&url)
                .bearer_auth(&admin)
                .json(&slot(section, period, "SUB101", 1, "")),
        );
        assert_eq!(status, 201, "{body}");
        assert_eq!(body["result"]["slot"]["room"], Value::Null);
    }

    let (status, body) = send(
        client
            .get(format!("{}/timetable/faculty?facultyId=1", service.base))
            .bearer_auth(&faculty),
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["result"]["slots"].as_array().map(Vec::len), Some(2));

    let (status, _) = send(
        client
            .get(format!("{}/timetable/faculty?facultyId=2", service.base))
            .bearer_auth(&faculty),
    );
    assert_eq!(status, 403);
}

#[test]
fn concurrent_proposals_for_one_faculty_admit_exactly_one() {
    let service = spawn_service();
    seed(&service);
    let admin = token_for(&service, 10);
    let url = format!("{}/timetable", service.base);

    let handles: Vec<_> = [1, 2, 3]
        .into_iter()
        .map(|section| {
            let url = url.clone();
            let admin = admin.clone();
            std::thread::spawn(move || {
                let client = reqwest::blocking::Client::new();
                send(
                    client
                        .post(&url)
                        .bearer_auth(&admin)
                        .json(&slot(section, 5, "SUB101", 2, &format!("R{section}"))),
                )
            })
        })
        .collect();
    let mut statuses: Vec<u16> = handles
        .into_iter()
        .map(|h| h.join().expect("request thread").0)
        .collect();
    statuses.sort_unstable();
    assert_eq!(statuses, vec![201, 409, 409]);

    let conn = rusqlite::Connection::open(&service.db_path).expect("open db");
    let booked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM timetable WHERE faculty_id = 2 AND period = 5",
            [],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(booked, 1);
}
