// tests/io_jsonl.rs
use anyhow::Result;
use parkflow::clock::ManualClock;
use parkflow::emitter::OutputRecord;
use parkflow::metrics::names;
use parkflow::event::{StatusCode, decode};
use parkflow::io::jsonl::{JsonlTopicSink, JsonlTopicSource, read_topic, topic_path, write_topic};
use parkflow::io::{Envelope, Polled, Sink, Source};
use parkflow::testing::*;
use parkflow::{Runner, SlotStatus};
use std::fs;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn poll_all(source: &mut JsonlTopicSource) -> Result<Vec<Envelope>> {
    let mut out = Vec::new();
    loop {
        match source.poll(Duration::from_millis(1))? {
            Polled::Message(m) => out.push(m),
            Polled::Idle | Polled::Closed => return Ok(out),
        }
    }
}

#[test]
fn write_then_read_keeps_keys_and_payloads() -> Result<()> {
    let dir = tempdir()?;
    let events = sample_lot_events();
    let messages: Vec<_> = events.iter().map(payload).collect();
    assert_eq!(write_topic(dir.path(), "events", &messages)?, 3);

    let back = read_topic(dir.path(), "events")?;
    assert_eq!(back.len(), 3);
    for (msg, original) in back.iter().zip(&events) {
        assert_eq!(msg.key.as_deref(), Some(original.slot_id.as_str()));
        let decoded = decode(&msg.payload, 0).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(decoded.logical_timestamp, original.logical_timestamp);
        assert_eq!(decoded.status_code, original.status_code);
    }
    Ok(())
}

#[test]
fn bare_events_and_garbage_are_delivered_unkeyed() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        topic_path(dir.path(), "events"),
        concat!(
            r#"{"location":"A1","license_plate":"29A-12345","status_code":"PARKED","timestamp_unix":1000}"#,
            "\n\n   \nnot json at all\n",
        ),
    )?;
    let mut source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let got = poll_all(&mut source)?;

    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|m| m.key.is_none()));
    assert!(decode(&got[0].payload, 0).is_ok());
    assert!(decode(&got[1].payload, 0).is_err());
    assert_eq!(source.poll(Duration::ZERO)?, Polled::Closed);
    Ok(())
}

const INVALID_UTF8_LINE: &[u8] =
    b"{\"location\":\"A1\",\"license_plate\":\"\xff\xfe\",\"status_code\":\"PARKED\",\"timestamp_unix\":1000}\n";
const VALID_LINE: &[u8] =
    b"{\"location\":\"B2\",\"license_plate\":\"30B-67890\",\"status_code\":\"PARKED\",\"timestamp_unix\":1000}\n";

#[test]
fn invalid_utf8_line_is_delivered_as_garbage() -> Result<()> {
    let dir = tempdir()?;
    fs::write(topic_path(dir.path(), "events"), [INVALID_UTF8_LINE, VALID_LINE].concat())?;

    let mut source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let got = poll_all(&mut source)?;
    assert_eq!(got.len(), 2);
    assert!(decode(&got[0].payload, 0).is_err());
    assert!(decode(&got[1].payload, 0).is_ok());
    assert_eq!(source.position(), (INVALID_UTF8_LINE.len() + VALID_LINE.len()) as u64);
    Ok(())
}

#[test]
fn invalid_utf8_does_not_stall_the_pipeline() -> Result<()> {
    let dir = tempdir()?;
    fs::write(topic_path(dir.path(), "events"), [INVALID_UTF8_LINE, VALID_LINE].concat())?;

    let source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let sink = JsonlTopicSink::create(dir.path(), "slots")?;
    let runner = Runner::new(test_pipeline_config(1))?.with_clock(ManualClock::at_secs(2_000));
    let report = runner.run(source, sink)?;

    assert_eq!(report.ingress.received, 2);
    assert_eq!(report.ingress.malformed, 1);
    assert_eq!(report.ingress.reconnects, 0);
    let slots: Vec<_> = read_topic(dir.path(), "slots")?
        .iter()
        .map(|m| OutputRecord::from_payload(&m.payload))
        .collect::<Result<_, _>>()?;
    assert!(!slots.is_empty());
    assert!(slots.iter().all(|r| r.slot_id == "B2"));
    Ok(())
}

#[test]
fn missing_topic_requires_follow() -> Result<()> {
    let dir = tempdir()?;
    assert!(JsonlTopicSource::open(dir.path(), "events", false).is_err());

    let mut source = JsonlTopicSource::open(dir.path(), "events", true)?;
    assert!(topic_path(dir.path(), "events").exists());
    assert_eq!(source.poll(Duration::from_millis(1))?, Polled::Idle);
    Ok(())
}

#[test]
fn unreachable_bootstrap_is_an_error() {
    assert!(JsonlTopicSink::create("/definitely/not/a/dir", "out").is_err());
    assert!(JsonlTopicSource::open("/definitely/not/a/dir", "in", true).is_err());
}

#[test]
fn follow_picks_up_appended_lines() -> Result<()> {
    let dir = tempdir()?;
    let mut source = JsonlTopicSource::open(dir.path(), "events", true)?;
    assert!(poll_all(&mut source)?.is_empty());

    let e = event("A1", "29A-12345", StatusCode::Entering, 1_000);
    write_topic(dir.path(), "events", &[payload(&e)])?;
    let got = poll_all(&mut source)?;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].key.as_deref(), Some("A1"));
    Ok(())
}

#[test]
fn reconnect_resumes_after_last_delivered_line() -> Result<()> {
    let dir = tempdir()?;
    let messages: Vec<_> = sample_visit("A1", "29A-12345", 1_000).iter().map(payload).collect();
    write_topic(dir.path(), "events", &messages)?;

    let mut source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let Polled::Message(first) = source.poll(Duration::ZERO)? else {
        panic!("expected a message");
    };
    let offset = source.position();
    assert!(offset > 0);

    source.reconnect()?;
    assert_eq!(source.position(), offset);
    let rest = poll_all(&mut source)?;
    assert_eq!(rest.len(), messages.len() - 1);
    assert!(!rest.contains(&first));
    Ok(())
}

#[test]
fn partial_trailing_line_is_delivered_at_eof() -> Result<()> {
    let dir = tempdir()?;
    let path = topic_path(dir.path(), "events");
    let mut f = fs::File::create(&path)?;
    write!(f, r#"{{"key":"B2","value":{{"location":"B2"}}}}"#)?;
    drop(f);

    let mut source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let got = poll_all(&mut source)?;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].key.as_deref(), Some("B2"));
    Ok(())
}

#[test]
fn sink_clones_share_one_file() -> Result<()> {
    let dir = tempdir()?;
    let mut a = JsonlTopicSink::create(dir.path(), "out")?;
    let mut b = a.clone();
    a.publish(&Envelope::new("A1", br#"{"n":1}"#.to_vec()))?;
    b.publish(&Envelope::new("B2", br#"{"n":2}"#.to_vec()))?;
    a.flush()?;

    let back = read_topic(dir.path(), "out")?;
    let keys: Vec<_> = back.iter().filter_map(|m| m.key.clone()).collect();
    assert_eq!(keys, vec!["A1", "B2"]);
    assert_eq!(b.path(), topic_path(dir.path(), "out"));
    Ok(())
}

#[test]
fn pipeline_over_topic_files() -> Result<()> {
    let dir = tempdir()?;
    let mut input = sample_lot_events();
    input.extend(sample_visit("D4", "59D-98765", 3_000));
    write_topic(dir.path(), "events", &input.iter().map(payload).collect::<Vec<_>>())?;

    let source = JsonlTopicSource::open(dir.path(), "events", false)?;
    let sink = JsonlTopicSink::create(dir.path(), "slots")?;
    let runner = Runner::new(test_pipeline_config(2))?.with_clock(ManualClock::at_secs(4_000));
    let report = runner.run(source, sink)?;
    assert_eq!(report.ingress.received, input.len() as u64);

    let records: Vec<OutputRecord> = read_topic(dir.path(), "slots")?
        .iter()
        .map(|m| OutputRecord::from_payload(&m.payload))
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len() as u64, report.records_emitted());

    let d4 = records.iter().filter(|r| r.slot_id == "D4").last().unwrap();
    assert_eq!(d4.status, SlotStatus::Empty);
    let a1 = records.iter().find(|r| r.slot_id == "A1").unwrap();
    assert_eq!(a1.status, SlotStatus::Occupied);
    assert_eq!(a1.parked_blocks, Some(5));
    Ok(())
}

fn wait_until(deadline: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    ready()
}

#[test]
fn following_run_makes_closed_windows_visible_before_shutdown() -> Result<()> {
    let dir = tempdir()?;
    let input = sample_lot_events();
    write_topic(dir.path(), "events", &input.iter().map(payload).collect::<Vec<_>>())?;

    let source = JsonlTopicSource::open(dir.path(), "events", true)?;
    let sink = JsonlTopicSink::create(dir.path(), "slots")?;
    let clock = ManualClock::at_secs(4_000);
    let runner = Runner::new(test_pipeline_config(2))?.with_clock(clock.clone());

    let report = thread::scope(|s| {
        let run = s.spawn(|| runner.run(source, sink));

        let received = wait_until(Duration::from_secs(5), || {
            runner.metrics().counter(names::EVENTS_RECEIVED) == input.len() as u64
        });
        clock.advance(Duration::from_secs(60));
        let visible = wait_until(Duration::from_secs(5), || {
            read_topic(dir.path(), "slots").is_ok_and(|m| !m.is_empty())
        });
        let live = read_topic(dir.path(), "slots").map(|m| m.len()).unwrap_or_default();

        runner.shutdown_handle().trigger();
        let report = run.join().map_err(|_| anyhow::anyhow!("runner thread panicked"))?;
        assert!(received, "ingress never saw the topic contents");
        assert!(visible, "closed windows were not written while the run was live");
        report.map(|r| (r, live))
    });
    let (report, live) = report?;

    assert_eq!(report.ingress.received, input.len() as u64);
    assert!(live as u64 <= report.records_emitted());
    assert_eq!(read_topic(dir.path(), "slots")?.len() as u64, report.records_emitted());
    Ok(())
}
