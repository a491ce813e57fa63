//! Randomized invariant checks
//!
//! Streams are generated from fixed seeds so failures reproduce. A mirror
//! `FlowTree` is driven alongside generation to emit only control
//! messages the tree accepts.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use glob::Pattern;
use regex::Regex;
use rgt_core::filter::{EntityRule, FilterMode};
use rgt_core::flow::Membership;
use rgt_core::{
    Config, FilterPolicy, FlowTree, FormatExpander, Level, NodeInfo, NodeType, NodeView, Pipeline,
    PostponedRenderer, RawLogReader, RawLogWriter, RawRecord, ReadMode, RecordSpec, RenderOptions,
    Renderer, ResultStatus, Result, Timestamp,
};

const SEEDS: [u64; 6] = [1, 7, 42, 1234, 0xdead_beef, 0x5eed_cafe];

/// xorshift64*
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.next() % 100 < percent
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.below(items.len())]
    }
}

/// A generated log plus what the generator knows about it
struct Generated {
    records: Vec<RecordSpec>,
    /// Node ids started and not yet ended
    open: Vec<u32>,
}

fn generate(rng: &mut Rng, steps: usize) -> Generated {
    let mut mirror = FlowTree::default();
    let mut records = Vec::new();
    let mut started = Vec::new();
    let mut next_id = 1;
    let mut sec = 1;

    for _ in 0..steps {
        sec += 1;
        match rng.below(10) {
            0..=3 => {
                let parents = mirror.open_ids();
                if parents.is_empty() {
                    continue;
                }
                let parent = *rng.pick(&parents);
                let parent_type = mirror.find(parent).map(|idx| mirror.info(idx).node_type);
                let kind = match (parent_type, rng.below(6)) {
                    (Some(NodeType::Package), _) => NodeType::Session,
                    (_, 0) => NodeType::Package,
                    (_, 1) => NodeType::Session,
                    _ => NodeType::Test,
                };
                let name = format!("n{}", next_id);
                let mut info = NodeInfo::new(kind, parent, next_id, Timestamp::new(sec, 0));
                if kind != NodeType::Session {
                    info = info.with_name(&name);
                }
                if mirror.add_node(info).is_err() {
                    continue;
                }
                let spec = match kind {
                    NodeType::Session => RecordSpec::control(sec, 0, &format!("{} {} SESSION", parent, next_id)),
                    _ => RecordSpec::control(sec, 0, &format!("{} {} {} %s", parent, next_id, kind.keyword()))
                        .arg_str(&name),
                };
                records.push(spec);
                started.push(next_id);
                next_id += 1;
            }
            4..=5 => {
                if started.is_empty() {
                    continue;
                }
                let id = *rng.pick(&started);
                let Some(idx) = mirror.find(id) else { continue };
                let parent = mirror.info(idx).parent_id;
                // some ends are stamped earlier than messages already logged
                let end_sec = if rng.chance(25) { sec.saturating_sub(rng.below(4) as u32) } else { sec };
                let (result, word) = if rng.chance(80) {
                    (ResultStatus::Passed, "PASSED")
                } else {
                    (ResultStatus::Failed, "FAILED")
                };
                if mirror
                    .close_node(parent, id, Timestamp::new(end_sec, 0), result, None)
                    .is_err()
                {
                    continue;
                }
                records.push(RecordSpec::control(end_sec, 0, &format!("{} {} {}", parent, id, word)));
                started.retain(|&s| s != id);
            }
            _ => {
                let n = rng.below(1000) as u32;
                let spec = match rng.below(3) {
                    0 => RecordSpec::new("Agt", "Step").format("value %u").arg_u32(n),
                    1 => RecordSpec::new("Tst", "Conf").format("%s=%x").arg_str("key").arg_u32(n),
                    _ => RecordSpec::new("Agt", "Data").format("%Tm").arg_bytes(&n.to_be_bytes()),
                };
                records.push(spec.at(sec, rng.below(1000) as u32));
            }
        }
    }

    Generated {
        records,
        open: started,
    }
}

fn encode(records: &[RecordSpec]) -> Vec<u8> {
    let mut writer = RawLogWriter::new(Vec::new()).unwrap();
    for spec in records {
        writer.write_record(spec).unwrap();
    }
    writer.into_inner()
}

fn drive(raw: &[u8], renderer: Box<dyn Renderer + '_>, tolerate: bool) {
    let mut pipeline = Pipeline::new(
        &Config::new("<memory>"),
        Arc::new(FilterPolicy::pass_all()),
        renderer,
    );
    pipeline.open().unwrap();
    let reader = RawLogReader::new(raw, ReadMode::NonBlocking)
        .unwrap()
        .with_truncation_tolerance(tolerate);
    for record in reader {
        pipeline.process_record(record.unwrap()).unwrap();
    }
    pipeline.finish().unwrap();
}

/// Messages rendered inside one node, with the node's lifetime
struct Frame {
    start: Timestamp,
    end: Timestamp,
    messages: Vec<Timestamp>,
}

impl Frame {
    fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            messages: Vec::new(),
        }
    }
}

/// Keeps message timestamps per rendered node and every finished node
#[derive(Default)]
struct Capture {
    frames: Vec<Frame>,
    finished: Vec<NodeInfo>,
    unordered: Vec<String>,
    outside: Vec<String>,
}

impl Renderer for &mut Capture {
    fn on_open(&mut self) -> Result<()> {
        self.frames.push(Frame::new(Timestamp::new(0, 0), Timestamp::MAX));
        Ok(())
    }

    fn on_start(&mut self, _kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        self.frames.push(Frame::new(node.info.start_ts, node.info.end_ts));
        Ok(())
    }

    fn on_end(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        if frame.messages.windows(2).any(|w| w[0] > w[1]) {
            self.unordered.push(format!("{} {}", kind, node.info.id));
        }
        if let Some(ts) = frame.messages.iter().find(|&&ts| ts < frame.start || ts > frame.end) {
            self.outside.push(format!("{} {} at {:?}", kind, node.info.id, ts));
        }
        if kind != NodeType::Branch {
            self.finished.push(node.info.clone());
        }
        Ok(())
    }

    fn on_regular(&mut self, msg: &RawRecord, _nest: u32) -> Result<()> {
        if let Some(frame) = self.frames.last_mut() {
            frame.messages.push(msg.timestamp);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "capture"
    }
}

#[test]
fn postponed_report_keeps_every_message_text() {
    let msg_text = Regex::new(r"(?s)<msg [^>]*>(.*?)</msg>").unwrap();
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        let generated = generate(&mut rng, 120);
        let raw = encode(&generated.records);

        let mut report = Vec::new();
        drive(
            &raw,
            Box::new(PostponedRenderer::new(&mut report, &RenderOptions::default())),
            false,
        );
        let report = String::from_utf8(report).unwrap();

        let mut rendered: HashMap<String, usize> = HashMap::new();
        for cap in msg_text.captures_iter(&report) {
            *rendered.entry(cap[1].to_string()).or_default() += 1;
        }

        let expander = FormatExpander::xml();
        let mut expected: HashMap<String, usize> = HashMap::new();
        for spec in generated.records.iter().filter(|s| s.entity != b"Tester") {
            let args: Vec<Bytes> = spec.args.iter().cloned().map(Bytes::from).collect();
            let (text, _) = expander.expand_parts(&spec.format, &args);
            *expected.entry(text).or_default() += 1;
        }
        assert_eq!(rendered, expected, "seed {}", seed);
    }
}

#[test]
fn messages_stay_ordered_and_inside_their_nodes() {
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        let generated = generate(&mut rng, 150);
        let raw = encode(&generated.records);

        let mut capture = Capture::default();
        drive(&raw, Box::new(&mut capture), false);
        assert!(capture.unordered.is_empty(), "seed {}: {:?}", seed, capture.unordered);
        assert!(capture.outside.is_empty(), "seed {}: {:?}", seed, capture.outside);
    }
}

#[test]
fn open_and_awaiting_close_sets_stay_disjoint() {
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        let generated = generate(&mut rng, 150);
        let raw = encode(&generated.records);

        let mut pipeline = Pipeline::new(
            &Config::new("<memory>"),
            Arc::new(FilterPolicy::pass_all()),
            Box::new(PostponedRenderer::new(Vec::new(), &RenderOptions::default())),
        );
        pipeline.open().unwrap();
        for record in RawLogReader::new(raw.as_slice(), ReadMode::NonBlocking).unwrap() {
            pipeline.process_record(record.unwrap()).unwrap();

            let tree = pipeline.tree();
            let open = tree.open_ids();
            let awaiting = tree.awaiting_close_ids();
            assert!(
                open.iter().all(|id| !awaiting.contains(id)),
                "seed {}: {:?} / {:?}",
                seed,
                open,
                awaiting
            );
            // the root leaves both sets only while a child of it runs
            if tree.membership(0) == Membership::None {
                assert!(!open.is_empty() || !awaiting.is_empty(), "seed {}", seed);
            }
        }
    }
}

#[test]
fn closed_branches_freeze_their_session() {
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        for round in 0..20 {
            let mut tree = FlowTree::default();
            let session = 100;
            tree.add_node(NodeInfo::new(NodeType::Session, 0, session, Timestamp::new(1, 0)))
                .unwrap();

            let branches = 1 + rng.below(4) as u32;
            let mut running: Vec<u32> = (1..=branches).collect();
            for &id in &running {
                tree.add_node(NodeInfo::new(NodeType::Test, session, id, Timestamp::new(2, 0)))
                    .unwrap();
            }
            let closes = 1 + rng.below(branches as usize);
            for _ in 0..closes {
                let id = running.remove(rng.below(running.len()));
                tree.close_node(session, id, Timestamp::new(3, 0), ResultStatus::Passed, None)
                    .unwrap();
            }

            let expect_ok = branches == 1 && running.is_empty();
            let late = NodeInfo::new(NodeType::Test, session, 50, Timestamp::new(4, 0));
            assert_eq!(
                tree.add_node(late).is_ok(),
                expect_ok,
                "seed {} round {}: {} branches, {} still running",
                seed,
                round,
                branches,
                running.len()
            );
            if expect_ok {
                let busy = NodeInfo::new(NodeType::Test, session, 51, Timestamp::new(5, 0));
                assert!(tree.add_node(busy).is_err());
            }
        }
    }
}

fn random_rule(rng: &mut Rng) -> EntityRule {
    let mode = if rng.chance(50) {
        FilterMode::Include
    } else {
        FilterMode::Exclude
    };
    let mut rule = EntityRule::new(mode);
    if rng.chance(50) {
        rule = rule.with_entity(Pattern::new(*rng.pick(&["Agt*", "Agt_A", "Tst", "*"])).unwrap());
    }
    if rng.chance(40) {
        rule = rule.with_user(Pattern::new(*rng.pick(&["Conf", "Data", "D*"])).unwrap());
    }
    if rng.chance(50) {
        rule = rule.with_level(*rng.pick(&[Level::INFO, Level::RING, Level::INFO | Level::WARN, Level::ERROR]));
    }
    if rng.chance(20) {
        rule = rule.with_range(Some(Timestamp::new(10, 0)), Some(Timestamp::new(20, 0)));
    }
    rule
}

#[test]
fn message_filter_is_order_independent_and_monotone() {
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        let mut policy = FilterPolicy::pass_all();
        for _ in 0..(1 + rng.below(8)) {
            policy.push_entity_rule(random_rule(&mut rng));
        }

        let probes: Vec<(&str, &str, Level, Timestamp)> = (0..60)
            .map(|_| {
                (
                    *rng.pick(&["Agt_A", "Agt_B", "Tst", "Other"]),
                    *rng.pick(&["Conf", "Data", "Verdict"]),
                    *rng.pick(&[Level::INFO, Level::RING, Level::WARN, Level::ERROR, Level::VERB]),
                    Timestamp::new(rng.below(30) as u32, 0),
                )
            })
            .collect();

        let first: Vec<_> = probes
            .iter()
            .map(|&(e, u, l, t)| policy.check_message(e, u, l, t))
            .collect();
        for (i, &(e, u, l, t)) in probes.iter().enumerate().rev() {
            assert_eq!(policy.check_message(e, u, l, t), first[i], "seed {}", seed);
        }

        for (index, rule) in policy.entity_rules().iter().enumerate() {
            if rule.mode != FilterMode::Exclude {
                continue;
            }
            let reduced = policy.without_entity_rule(index);
            for (i, &(e, u, l, t)) in probes.iter().enumerate() {
                if first[i].mode == FilterMode::Include {
                    assert_eq!(
                        reduced.check_message(e, u, l, t).mode,
                        FilterMode::Include,
                        "seed {}: dropping rule {} excluded {} {}",
                        seed,
                        index,
                        e,
                        u
                    );
                }
            }
        }
    }
}

#[test]
fn truncated_logs_close_each_open_node_once() {
    for seed in SEEDS {
        let mut rng = Rng::new(seed);
        let generated = generate(&mut rng, 80);
        let mut raw = encode(&generated.records);
        let tail = RecordSpec::new("Agt", "Data").at(9999, 0).format("cut").encode().unwrap();
        raw.extend_from_slice(&tail[..tail.len() - 2]);

        let mut capture = Capture::default();
        drive(&raw, Box::new(&mut capture), true);

        let incomplete: Vec<u32> = capture
            .finished
            .iter()
            .filter(|info| info.result == ResultStatus::Incomplete)
            .map(|info| info.id)
            .collect();
        let mut expected = generated.open.clone();
        expected.sort_unstable();
        let mut got = incomplete.clone();
        got.sort_unstable();
        assert_eq!(got, expected, "seed {}", seed);

        for info in &capture.finished {
            assert!(info.end_ts >= info.start_ts, "seed {}: node {}", seed, info.id);
        }
    }
}
