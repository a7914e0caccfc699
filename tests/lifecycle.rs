use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kestrel_modding::{HookKind, ModEntry, ScriptHost, ScriptingConfig};
use rhai::INT;
use tempfile::NamedTempFile;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn write_script(contents: &str) -> NamedTempFile {
    let mut temp = NamedTempFile::new().expect("temp script");
    write!(temp, "{contents}").expect("write script");
    temp
}

fn host_for(entries: Vec<ModEntry>) -> ScriptHost {
    let mut config = ScriptingConfig { max_players: 2, seed: Some(3), ..Default::default() };
    config.mods.local = entries;
    ScriptHost::new(config)
}

fn enabled(script: &NamedTempFile) -> ModEntry {
    ModEntry::new(script.path(), true)
}

/// Keeps the level, target and message of every event.
#[derive(Clone, Default)]
struct RecordedEvents(Arc<Mutex<Vec<(Level, String, String)>>>);

impl RecordedEvents {
    fn messages(&self, level: Level, target: &str) -> Vec<String> {
        let events = self.0.lock().expect("recorded events");
        events.iter().filter(|(l, t, _)| *l == level && t == target).map(|(_, _, message)| message.clone()).collect()
    }
}

impl<S: Subscriber> Layer<S> for RecordedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageField(String::new());
        event.record(&mut message);
        let meta = event.metadata();
        self.0.lock().expect("recorded events").push((*meta.level(), meta.target().to_string(), message.0));
    }
}

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

fn int_global(host: &ScriptHost, script: &NamedTempFile, name: &str) -> Option<INT> {
    host.script_global(script.path(), name).and_then(|value| value.as_int().ok())
}

#[test]
fn disabled_entries_are_skipped_and_enabled_ones_load_in_order() {
    let a = write_script("log(\"a loaded\");");
    let b = write_script("log(\"b loaded\");");
    let c = write_script("log(\"c loaded\");");
    let mut host = host_for(vec![enabled(&a), ModEntry::new(b.path(), false), enabled(&c)]);

    let report = host.initialize();
    let expected: Vec<PathBuf> = vec![a.path().to_path_buf(), c.path().to_path_buf()];
    assert_eq!(report.attempted, expected);
    assert_eq!(report.loaded, expected);
    assert_eq!(report.skipped, vec![b.path().to_path_buf()]);
    assert_eq!(host.loaded_scripts(), expected);
    assert_eq!(host.take_logs(), vec!["a loaded".to_string(), "c loaded".to_string()]);
}

#[test]
fn load_attempts_are_logged_for_enabled_entries_only() {
    let a = write_script("let a = 1;");
    let b = write_script("let b = 1;");
    let c = write_script("let c = 1;");
    let mut host = host_for(vec![enabled(&a), ModEntry::new(b.path(), false), enabled(&c)]);

    let events = RecordedEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    tracing::subscriber::with_default(subscriber, || host.initialize());

    let listed = |script: &NamedTempFile| format!("    {}", script.path().display());
    let info = events.messages(Level::INFO, "scripting");
    let attempts: Vec<_> = info.iter().filter(|message| [&a, &b, &c].iter().any(|s| **message == listed(s))).collect();
    assert_eq!(attempts, vec![&listed(&a), &listed(&c)]);
    assert!(info.iter().all(|message| !message.contains(&b.path().display().to_string())));
}

#[test]
fn every_enabled_script_is_attempted_after_failures() {
    let broken = write_script("let oops = ;");
    let throws = write_script("let reached = 1; throw \"stop\";");
    let fine = write_script("let ready = true;");
    let missing = PathBuf::from("no/such/mod.rhai");
    let mut host = host_for(vec![
        enabled(&broken),
        ModEntry::new(&missing, true),
        enabled(&throws),
        enabled(&fine),
    ]);

    let report = host.initialize();
    assert!(host.is_active());
    assert_eq!(report.attempted.len(), 4);
    assert_eq!(report.loaded, vec![fine.path().to_path_buf()]);
    let kinds: Vec<_> = report.failures.iter().map(|err| err.label()).collect();
    assert_eq!(kinds, vec!["compile", "compile", "runtime"]);
    assert_eq!(int_global(&host, &throws, "reached"), Some(1), "partial definitions survive");
    assert_eq!(host.take_failures().len(), 3);
}

#[test]
fn update_hook_counter_counts_frames() {
    let script = write_script("let counter = 0; hook_event(HOOK_UPDATE, || { counter += 1; });");
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();

    host.tick();
    host.tick();
    assert_eq!(int_global(&host, &script, "counter"), Some(2));
}

#[test]
fn tick_without_a_session_does_nothing() {
    let script = write_script("let counter = 0; hook_event(HOOK_UPDATE, || { counter += 1; });");
    let mut host = host_for(vec![enabled(&script)]);

    let report = host.tick();
    assert_eq!(report.invoked, 0);
    assert!(!host.is_active());

    host.initialize();
    host.tick();
    host.shutdown();
    let report = host.tick();
    assert_eq!(report.invoked, 0);
    assert_eq!(host.hook_count(HookKind::Update), 0);
    assert!(host.loaded_scripts().is_empty());
    host.shutdown();
}

#[test]
fn reinitializing_does_not_leak_hooks() {
    let script = write_script("hook_event(HOOK_UPDATE, || log(\"tick\")); hook_event(HOOK_PLAYER_UPDATE, |p| {});");
    let mut host = host_for(vec![enabled(&script)]);

    host.initialize();
    assert_eq!(host.hook_count(HookKind::Update), 1);
    host.initialize();
    host.initialize();
    assert_eq!(host.hook_count(HookKind::Update), 1);
    assert_eq!(host.hook_count(HookKind::PlayerUpdate), 1);

    host.take_logs();
    let report = host.tick();
    assert_eq!(report.invoked, 1);
    assert_eq!(host.take_logs(), vec!["tick".to_string()]);
}

#[test]
fn reinitializing_starts_from_fresh_state() {
    let script = write_script("let counter = 0; hook_event(HOOK_UPDATE, || { counter += 1; });");
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();
    host.tick();
    host.tick();
    host.initialize();
    host.tick();
    assert_eq!(int_global(&host, &script, "counter"), Some(1));
}

#[test]
fn failing_callback_does_not_stop_later_callbacks() {
    let first = write_script("let calls = 0; hook_event(HOOK_UPDATE, || { calls += 1; });");
    let failing = write_script("hook_event(HOOK_UPDATE, || { throw \"broken hook\"; });");
    let last = write_script(
        "let calls = 0;\n\
         hook_event(HOOK_UPDATE, || { calls += 1; });\n\
         hook_event(HOOK_UPDATE, || undefined_function());\n\
         hook_event(HOOK_UPDATE, || { calls += 10; });",
    );
    let mut host = host_for(vec![enabled(&first), enabled(&failing), enabled(&last)]);
    host.initialize();

    let report = host.tick();
    assert_eq!(report.invoked, 5);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.succeeded(), 3);
    assert!(report.failures.iter().all(|err| err.label() == "runtime"));
    assert_eq!(int_global(&host, &first, "calls"), Some(1));
    assert_eq!(int_global(&host, &last, "calls"), Some(11));

    host.tick();
    assert_eq!(int_global(&host, &last, "calls"), Some(22), "failing hooks stay registered");
    assert_eq!(host.take_failures().len(), 4);
}

#[test]
fn runtime_failures_carry_a_stack() {
    let script = write_script(
        "fn inner() { throw \"deep failure\"; }\n\
         fn outer() { inner(); }\n\
         hook_event(HOOK_UPDATE, || outer());",
    );
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();
    let report = host.tick();
    let failure = report.failures.first().expect("hook failure");
    assert!(failure.stack().len() >= 2, "expected nested frames, got {:?}", failure.stack());
    assert!(failure.stack().iter().any(|frame| frame.contains("outer")));
}

#[test]
fn scripts_are_isolated_but_share_the_host_namespace() {
    let a = write_script("let name = \"a\"; let players = MAX_PLAYERS;");
    let b = write_script("let name = \"b\"; let has_a = false; hook_event(HOOK_UPDATE, || log(name));");
    let mut host = host_for(vec![enabled(&a), enabled(&b)]);
    host.initialize();

    let text = |script: &NamedTempFile, name: &str| {
        host.script_global(script.path(), name).and_then(|value| value.into_string().ok())
    };
    assert_eq!(text(&a, "name").as_deref(), Some("a"));
    assert_eq!(text(&b, "name").as_deref(), Some("b"));
    assert_eq!(int_global(&host, &a, "players"), Some(2));
    assert_eq!(int_global(&host, &b, "MAX_PLAYERS"), Some(2), "lookups fall back to the host");
    assert!(host.script_global(b.path(), "players").is_none());
    assert!(host.host_global("name").is_none(), "script writes stay local");
    assert!(host.host_global("HOOK_UPDATE").is_some());
}

#[test]
fn script_functions_resolve_host_globals() {
    let script = write_script(
        "fn describe() { MAX_PLAYERS * 10 }\n\
         let described = describe();",
    );
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();
    assert_eq!(int_global(&host, &script, "described"), Some(20));
}

#[test]
fn host_global_assignments_stay_in_the_unit() {
    let top_level = write_script("MAX_PLAYERS = 99; let seen = MAX_PLAYERS;");
    let callback = write_script(
        "let seen = 0;\n\
         hook_event(HOOK_UPDATE, || { MAX_PLAYERS += 1; seen = MAX_PLAYERS; });",
    );
    let bystander = write_script("let seen = 0; hook_event(HOOK_UPDATE, || { seen = MAX_PLAYERS; });");
    let mut host = host_for(vec![enabled(&top_level), enabled(&callback), enabled(&bystander)]);

    let report = host.initialize();
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);
    let frame = host.tick();
    assert!(frame.failures.is_empty(), "unexpected failures: {:?}", frame.failures);
    host.tick();

    assert_eq!(int_global(&host, &top_level, "seen"), Some(99));
    assert_eq!(int_global(&host, &callback, "seen"), Some(4), "callback writes persist in the unit");
    assert_eq!(int_global(&host, &callback, "MAX_PLAYERS"), Some(4));
    assert_eq!(int_global(&host, &bystander, "seen"), Some(2));
    assert_eq!(host.host_global("MAX_PLAYERS").and_then(|v| v.as_int().ok()), Some(2));
}

#[test]
fn named_function_hooks_read_their_unit_variables() {
    let script = write_script(
        "let counter = 5;\n\
         MAX_PLAYERS = 7;\n\
         fn on_update() { log(\"counter \" + counter + \" of \" + MAX_PLAYERS); }\n\
         hook_event(HOOK_UPDATE, Fn(\"on_update\"));\n\
         hook_event(HOOK_UPDATE, || { counter += 1; });",
    );
    let mut host = host_for(vec![enabled(&script)]);
    let report = host.initialize();
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);

    host.tick();
    host.tick();
    assert_eq!(host.take_logs(), vec!["counter 5 of 7".to_string(), "counter 6 of 7".to_string()]);
}

#[test]
fn named_function_hooks_cannot_assign_unit_variables() {
    let script = write_script(
        "let counter = 0;\n\
         fn on_update() { counter += 1; }\n\
         hook_event(HOOK_UPDATE, Fn(\"on_update\"));",
    );
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();

    let report = host.tick();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(int_global(&host, &script, "counter"), Some(0));
}

#[test]
fn operation_budget_stops_runaway_scripts() {
    let runaway = write_script("loop { }");
    let after = write_script("let ran = true;");
    let mut host = host_for(vec![enabled(&runaway), enabled(&after)]);
    host.config_mut().max_operations = Some(10_000);

    let report = host.initialize();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.loaded, vec![after.path().to_path_buf()]);
}

#[test]
fn named_functions_can_be_hooked() {
    let script = write_script(
        "fn on_update() { log(\"named hook\"); }\n\
         hook_event(HOOK_UPDATE, Fn(\"on_update\"));",
    );
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();
    host.tick();
    assert_eq!(host.take_logs(), vec!["named hook".to_string()]);
}

#[test]
fn hooks_registered_during_dispatch_run_from_the_next_frame() {
    let script = write_script(
        "let armed = false;\n\
         hook_event(HOOK_UPDATE, || {\n\
             if !armed {\n\
                 armed = true;\n\
                 hook_event(HOOK_UPDATE, || log(\"late hook\"));\n\
             }\n\
         });",
    );
    let mut host = host_for(vec![enabled(&script)]);
    host.initialize();

    assert_eq!(host.tick().invoked, 1);
    assert!(host.take_logs().is_empty());
    assert_eq!(host.tick().invoked, 2);
    assert_eq!(host.take_logs(), vec!["late hook".to_string()]);
}

#[test]
fn unknown_hook_kinds_fail_the_registering_script() {
    let script = write_script("let before = 1; hook_event(42, || log(\"never\"));");
    let mut host = host_for(vec![enabled(&script)]);
    let report = host.initialize();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(host.hook_count(HookKind::Update), 0);
}
