//! End-to-end scenarios: raw log file in, report file out

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rgt_core::format::errno;
use rgt_core::{run, Config, FormatExpander, Level, OutputMode, RawLogWriter, RecordSpec, RgtError};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn raw_log(&self, records: &[RecordSpec]) -> PathBuf {
        let mut writer = RawLogWriter::new(Vec::new()).expect("writer");
        for spec in records {
            writer.write_record(spec).expect("record");
        }
        let path = self.path("run.raw");
        fs::write(&path, writer.into_inner()).expect("write raw log");
        path
    }

    fn filter(&self, xml: &str) -> PathBuf {
        let path = self.path("filter.xml");
        fs::write(&path, xml).expect("write filter");
        path
    }

    fn render(&self, config: Config) -> String {
        let out = self.path("report.out");
        run(&config.with_output(&out)).expect("pipeline run");
        fs::read_to_string(&out).expect("read report")
    }
}

fn msg(sec: u32, entity: &str, level: Level, text: &str) -> RecordSpec {
    RecordSpec::new(entity, "U").at(sec, 0).level(level).format(text)
}

fn postponed(raw: &Path) -> Config {
    Config::new(raw).with_mode(OutputMode::Postponed)
}

#[test]
fn scenario_single_test_passed() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("smoke"),
        msg(2, "A", Level::INFO, "hello"),
        RecordSpec::control(3, 0, "0 1 PASSED"),
    ]);
    let xml = ws.render(postponed(&raw));

    assert!(xml.starts_with("<?xml version=\"1.0\"?>\n<proteos:log_report"));
    assert_eq!(xml.matches("<test name=\"smoke\" result=\"PASSED\">").count(), 1);
    assert_eq!(xml.matches("<msg ").count(), 1);
    assert!(xml.contains("<msg level=\"INFO\" entity=\"A\" user=\"U\" "));
    assert!(xml.contains(">hello</msg>"));
    assert!(xml.trim_end().ends_with("</proteos:log_report>"));
}

#[test]
fn message_logged_past_test_end_renders_after_it() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("t1"),
        msg(2, "A", Level::INFO, "inside"),
        msg(5, "A", Level::INFO, "late"),
        RecordSpec::control(3, 0, "0 1 PASSED"),
    ]);
    let xml = ws.render(postponed(&raw));

    assert!(xml.contains("<end-ts>00:00:03.000</end-ts>"));
    let test_end = xml.find("</test>").expect("test rendered");
    let inside = xml.find(">inside</msg>").expect("inside rendered");
    let late = xml.find(">late</msg>").expect("late rendered");
    assert!(inside < test_end);
    assert!(late > test_end, "{}", xml);
}

#[test]
fn scenario_parallel_branches() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 5 SESSION"),
        RecordSpec::control(2, 0, "5 10 TEST %s").arg_str("t1"),
        RecordSpec::control(2, 0, "5 11 TEST %s").arg_str("t2"),
        msg(3, "A", Level::RING, "work"),
        RecordSpec::control(4, 0, "5 10 PASSED"),
        RecordSpec::control(5, 0, "5 11 PASSED"),
        RecordSpec::control(6, 0, "0 5 PASSED"),
    ]);
    let xml = ws.render(postponed(&raw));

    assert!(xml.contains("<session result=\"PASSED\">\n<meta n-branches=\"2\">"));
    assert_eq!(xml.matches("<branch>").count(), 2);
    let t1 = xml.find("name=\"t1\"").expect("t1 rendered");
    let t2 = xml.find("name=\"t2\"").expect("t2 rendered");
    assert!(t1 < t2);
    let between = &xml[xml.find("<branch>").unwrap()..t2];
    assert!(between.contains("</branch>"));
}

#[test]
fn scenario_filter_excludes_info_from_entity() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("t"),
        msg(2, "A", Level::RING, "ring line"),
        msg(2, "A", Level::INFO, "info line"),
        RecordSpec::control(3, 0, "0 1 PASSED"),
    ]);
    let filter = ws.filter(
        r#"<filters>
             <entity-filter level="RING" mode="pass"/>
             <entity-filter name="A" level="INFO" mode="fail"/>
           </filters>"#,
    );
    let xml = ws.render(postponed(&raw).with_filter(filter));

    assert!(xml.contains(">ring line</msg>"));
    assert!(!xml.contains("info line"));
}

#[test]
fn scenario_format_expansion() {
    let code = errno::compose(12, 12);
    let expander = FormatExpander::plain();
    let args = [
        Bytes::from_static(&[0, 0, 0, 42]),
        Bytes::from_static(b"abc"),
        Bytes::copy_from_slice(&code.to_be_bytes()),
    ];
    let (text, missing) = expander.expand_parts(b"x=%d y=%s err=%r", &args);
    assert_eq!(text, "x=42 y=abc err=TAD-ENOMEM");
    assert!(!missing);

    let ws = Workspace::new();
    let raw = ws.raw_log(&[RecordSpec::new("A", "U")
        .at(1, 0)
        .format("x=%d y=%s err=%r")
        .arg_u32(42)
        .arg_str("abc")
        .arg_u32(code)]);
    let xml = ws.render(postponed(&raw));
    assert!(xml.contains(">x=42 y=abc err=TAD-ENOMEM</msg>"));
}

#[test]
fn scenario_memory_dump() {
    let bytes: Vec<u8> = (0u8..16).collect();
    let args = [Bytes::from(bytes)];

    let (plain, _) = FormatExpander::plain().expand_parts(b"%Tm", &args);
    let row = plain.trim();
    assert_eq!(row.split(' ').count(), 16);
    assert_eq!(row, "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F");

    let (xml, _) = FormatExpander::xml().expand_parts(b"%Tm", &args);
    assert_eq!(xml.matches("<row>").count(), 1);
    assert_eq!(xml.matches("<elem>").count(), 16);
    assert!(xml.starts_with("<mem-dump><row><elem>00</elem>"));
}

#[test]
fn scenario_truncated_log() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("cut"),
        msg(4, "A", Level::INFO, "still running"),
    ]);
    let mut bytes = fs::read(&raw).unwrap();
    // half of one more record
    let extra = RecordSpec::new("A", "U").at(5, 0).format("lost").encode().unwrap();
    bytes.extend_from_slice(&extra[..extra.len() / 2]);
    fs::write(&raw, &bytes).unwrap();

    let out = ws.path("strict.xml");
    let err = run(&postponed(&raw).with_output(&out)).unwrap_err();
    assert!(matches!(err, RgtError::TruncatedRecord { .. }));
    assert!(!out.exists(), "partial report must be removed");

    let xml = ws.render(postponed(&raw).with_incomplete_log(true));
    assert!(xml.contains("<test name=\"cut\" result=\"INCOMPLETE\">"));
    assert!(xml.contains("<end-ts>00:00:04.000</end-ts>"));
}

#[test]
fn scenario_live_mode() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s \"%s\"").arg_str("ping").arg_str("Check echo"),
        msg(2, "Agt", Level::INFO, "reply"),
        RecordSpec::control(3, 0, "0 1 FAILED %s").arg_str("timeout"),
    ]);
    let text = ws.render(Config::new(&raw).with_mode(OutputMode::Live));

    assert!(text.starts_with("--->>> Starting TEST \"ping\"\n"));
    assert!(text.contains("Objective: Check echo\n"));
    assert!(text.contains("INFO  Agt  U  00:00:02 000 ms\nreply\n"));
    assert!(text.contains("<<<--- TEST \"ping\" FAILED: timeout"));
}

#[test]
fn scenario_junit_report() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 PACKAGE %s").arg_str("suite"),
        RecordSpec::control(1, 0, "1 2 SESSION"),
        RecordSpec::control(2, 0, "2 3 TEST %s").arg_str("ok"),
        RecordSpec::control(3, 0, "2 3 PASSED"),
        RecordSpec::control(4, 0, "2 4 TEST %s").arg_str("bad"),
        msg(5, "Agt", Level::ERROR, "exploded"),
        RecordSpec::control(6, 0, "2 4 FAILED"),
        RecordSpec::control(7, 0, "1 2 PASSED"),
        RecordSpec::control(7, 0, "0 1 FAILED"),
    ]);
    let xml = ws.render(Config::new(&raw).with_mode(OutputMode::Junit));

    assert!(xml.contains("<testsuite name=\"suite\" tests=\"2\" failures=\"1\" skipped=\"0\""));
    assert!(xml.contains("<testcase classname=\"suite\" name=\"ok\" time=\"1.000\"/>"));
    assert!(xml.contains("<failure message=\"FAILED\">Logs:\n  ERROR Agt U: exploded\n</failure>"));
}

#[test]
fn scenario_index_and_mi() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("t"),
        RecordSpec::new("Agt", "Stats")
            .at(2, 0)
            .level(Level::MI)
            .format("%s")
            .arg_str(r#"{"type":"measurement"}"#),
        RecordSpec::control(3, 0, "0 1 PASSED"),
    ]);

    let index = ws.render(Config::new(&raw).with_mode(OutputMode::Index));
    let lines: Vec<&str> = index.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("1.000000 1 0 1 TEST - 0"));
    assert!(lines[1].starts_with("3.000000 "));
    assert!(lines[1].contains(" 0 1 PASSED - "));

    let mi = ws.render(Config::new(&raw).with_mode(OutputMode::Mi).with_mi_timestamps(true));
    assert_eq!(
        mi,
        "1.000000\n{\"type\":\"log_start\"}\n2.000000\n{\"type\":\"measurement\"}\n3.000000\n{\"type\":\"log_end\"}\n"
    );
}

#[test]
fn scenario_bad_version_and_missing_input() {
    let ws = Workspace::new();
    let raw = ws.path("bad.raw");
    fs::write(&raw, [2u8, 0, 0]).unwrap();
    let err = run(&postponed(&raw).with_output(ws.path("x.xml"))).unwrap_err();
    assert!(matches!(err, RgtError::BadVersion { version: 2, .. }));
    assert_eq!(err.report(), format!("rgt: bad-version: {} at offset 0", err));

    let err = run(&postponed(&ws.path("absent.raw"))).unwrap_err();
    assert!(matches!(err, RgtError::Io { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn scenario_bad_control_aborts() {
    let ws = Workspace::new();
    let raw = ws.raw_log(&[
        RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("t"),
        RecordSpec::control(2, 0, "0 1 TEST ARGs %s").arg_str("a=unquoted"),
    ]);
    let out = ws.path("report.xml");
    let err = run(&postponed(&raw).with_output(&out)).unwrap_err();
    assert!(matches!(err, RgtError::BadControl { node_id: Some(1), .. }));
    assert!(err.offset().is_some());
    assert!(!out.exists());
}
