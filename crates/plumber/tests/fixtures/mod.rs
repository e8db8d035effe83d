use std::io::Write;
use std::time::Duration;

use plumbconf::load_rules_file;
use plumber::{MemorySession, Plumber, PlumberOptions, PortSnapshot, RuleSet};

/// A small studio: a synth, a recorder, a MIDI keyboard and a sampler.
pub fn studio() -> MemorySession {
    MemorySession::with_ports([
        PortSnapshot::audio_out("synth:voice_out").unwrap(),
        PortSnapshot::audio_out("synth:pad_out").unwrap(),
        PortSnapshot::midi_out("keys:midi_out").unwrap(),
        PortSnapshot::audio_in("recorder:ch1_in").unwrap(),
        PortSnapshot::audio_in("recorder:ch2_in").unwrap(),
        PortSnapshot::midi_in("sampler:midi_in").unwrap(),
        PortSnapshot::audio_in("sampler:audio_in").unwrap(),
    ])
}

/// Compile rules written as a rule file.
pub fn rules(toml: &str) -> RuleSet {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create rule file");
    file.write_all(toml.as_bytes()).expect("Failed to write rule file");
    let source = load_rules_file(file.path()).expect("Failed to load rule file");
    RuleSet::compile(&source).expect("Failed to compile rules")
}

pub fn new_plumber(graph: &MemorySession, toml: &str) -> Plumber<MemorySession> {
    Plumber::new(graph.clone(), rules(toml), PlumberOptions::default())
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
