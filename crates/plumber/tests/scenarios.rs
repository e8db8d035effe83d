mod fixtures;

use std::time::Duration;

use plumber::{
    channel, Action, ActionExecutor, DispatchSettings, Dispatcher, Established, Inventory,
    InventoryChange, Notification, Outcome, PortSnapshot, RuleEngine, Session, SkipReason,
};
use tokio_util::sync::CancellationToken;

const RENAME_APP1: &str = r#"
[[rename]]
pattern = '^app1:out_(\d+)$'
replacement = 'app1:output_\1'
"#;

const SYNTH_TO_RECORDER: &str = r#"
[[connect]]
name = "synth to recorder"
source = '^synth:.*_out$'
destination = '^recorder:.*_in$'
"#;

fn plan(engine: &RuleEngine, graph: &plumber::MemorySession) -> Vec<Action> {
    let inventory = Inventory::from_ports(graph.list_ports().unwrap());
    let change = InventoryChange::everything(&inventory);
    engine
        .reconcile(&inventory, &change, &Established::new(), graph)
        .unwrap()
}

#[test]
fn test_registered_port_is_renamed() {
    let graph = fixtures::studio();
    let mut plumber = fixtures::new_plumber(&graph, RENAME_APP1);
    plumber.start().unwrap();

    graph.add_port(PortSnapshot::audio_out("app1:out_1").unwrap());
    let report = plumber
        .process(&[Notification::PortRegistered("app1:out_1".into())])
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].0.to_string(), "rename(app1:out_1 -> app1:output_1)");
    assert_eq!(report.results[0].1, Outcome::Applied);
    assert!(graph.port_names().contains(&"app1:output_1".to_string()));
}

#[test]
fn test_matching_ports_are_connected() {
    let graph = plumber::MemorySession::with_ports([
        PortSnapshot::audio_out("synth:voice_out").unwrap(),
        PortSnapshot::audio_in("recorder:ch1_in").unwrap(),
    ]);
    let engine = RuleEngine::new(fixtures::rules(SYNTH_TO_RECORDER));

    let actions = plan(&engine, &graph);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].to_string(), "connect(synth:voice_out, recorder:ch1_in)");
}

#[test]
fn test_existing_connection_needs_nothing() {
    let graph = plumber::MemorySession::with_ports([
        PortSnapshot::audio_out("synth:voice_out").unwrap(),
        PortSnapshot::audio_in("recorder:ch1_in").unwrap(),
    ]);
    graph.connect_external("synth:voice_out", "recorder:ch1_in");
    let engine = RuleEngine::new(fixtures::rules(SYNTH_TO_RECORDER));

    assert!(plan(&engine, &graph).is_empty());
}

#[test]
fn test_port_gone_before_execution_is_skipped() {
    let mut graph = fixtures::studio();
    graph.add_port(PortSnapshot::audio_out("app1:out_1").unwrap());
    let engine = RuleEngine::new(fixtures::rules(&format!("{}{}", RENAME_APP1, SYNTH_TO_RECORDER)));

    let actions = plan(&engine, &graph);
    assert_eq!(actions[0].to_string(), "rename(app1:out_1 -> app1:output_1)");
    assert!(actions.len() > 1);

    graph.remove_port("app1:out_1");

    let executor = ActionExecutor::new(false, Duration::from_millis(50));
    let outcomes: Vec<Outcome> = actions
        .iter()
        .map(|action| executor.execute(&mut graph, action).unwrap())
        .collect();

    assert_eq!(
        outcomes[0],
        Outcome::Skipped(SkipReason::PortGone("app1:out_1".into()))
    );
    assert!(outcomes[1..].iter().all(|o| *o == Outcome::Applied));
    assert!(graph.has_connection("synth:voice_out", "recorder:ch1_in"));
}

#[test]
fn test_full_studio_reconciles_once() {
    let graph = fixtures::studio();
    let mut plumber = fixtures::new_plumber(
        &graph,
        r#"
[[rename]]
pattern = '^synth:(.*)_out$'
replacement = '\1'

[[connect]]
source = '^synth:'
destination = '^recorder:'

[[connect]]
source = '^keys:'
destination = '^sampler:'
"#,
    );

    plumber.start().unwrap();
    let mut connections = graph.connections();
    connections.sort();
    assert_eq!(
        connections,
        vec![
            ("keys:midi_out".to_string(), "sampler:midi_in".to_string()),
            ("synth:pad".to_string(), "recorder:ch1_in".to_string()),
            ("synth:pad".to_string(), "recorder:ch2_in".to_string()),
            ("synth:voice".to_string(), "recorder:ch1_in".to_string()),
            ("synth:voice".to_string(), "recorder:ch2_in".to_string()),
        ]
    );

    // a second full pass finds nothing left to do
    let calls = graph.calls().len();
    assert!(plumber.resync().unwrap().is_empty());
    assert_eq!(graph.calls().len(), calls);
}

#[test]
fn test_user_connections_survive() {
    let graph = fixtures::studio();
    graph.connect_external("synth:pad_out", "sampler:audio_in");
    let mut plumber = fixtures::new_plumber(&graph, SYNTH_TO_RECORDER);

    plumber.start().unwrap();
    plumber.resync().unwrap();

    assert!(graph.has_connection("synth:pad_out", "sampler:audio_in"));
    assert!(!graph.calls().iter().any(|c| c.starts_with("disconnect")));
}

#[tokio::test]
async fn test_worker_follows_the_graph() {
    let graph = fixtures::studio();
    let (sender, queue) = channel(64);
    graph.attach(sender);

    let plumber = fixtures::new_plumber(&graph, &format!("{}{}", RENAME_APP1, r#"
[[connect]]
source = '^app1:output_'
destination = '^recorder:ch1_in$'
"#));
    let settings = DispatchSettings {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(Dispatcher::new(plumber, queue, settings).run(shutdown.clone()));

    graph.add_port(PortSnapshot::audio_out("app1:out_1").unwrap());
    assert!(fixtures::eventually(|| graph.has_connection("app1:output_1", "recorder:ch1_in")).await);

    // the recorder goes away and comes back; the connection is restored
    graph.remove_port("recorder:ch1_in");
    graph.add_port(PortSnapshot::audio_in("recorder:ch1_in").unwrap());
    assert!(fixtures::eventually(|| graph.has_connection("app1:output_1", "recorder:ch1_in")).await);

    shutdown.cancel();
    let stats = worker.await.unwrap().unwrap();
    assert_eq!(stats.renames, 1);
    assert_eq!(stats.connects, 2);
}

#[tokio::test]
async fn test_overflow_triggers_resync() {
    let graph = plumber::MemorySession::with_ports([PortSnapshot::audio_in("recorder:ch1_in").unwrap()]);
    let (sender, queue) = channel(1);
    graph.attach(sender);

    let plumber = fixtures::new_plumber(&graph, SYNTH_TO_RECORDER);
    let settings = DispatchSettings {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(Dispatcher::new(plumber, queue, settings).run(shutdown.clone()));
    // let the worker seed and go idle
    tokio::time::sleep(Duration::from_millis(50)).await;

    // more registrations than the queue holds; only a resync can find them all
    for i in 0..4 {
        graph.add_port(PortSnapshot::audio_out(&format!("synth:v{}_out", i)).unwrap());
    }

    assert!(
        fixtures::eventually(|| (0..4).all(|i| graph.has_connection(&format!("synth:v{}_out", i), "recorder:ch1_in")))
            .await
    );

    shutdown.cancel();
    let stats = worker.await.unwrap().unwrap();
    assert!(stats.resyncs >= 1);
}
