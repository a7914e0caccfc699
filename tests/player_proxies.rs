use std::io::Write;

use kestrel_modding::proxy::ObjectProxy;
use kestrel_modding::{HookKind, ModEntry, ScriptHost, ScriptingConfig};
use rhai::INT;
use tempfile::NamedTempFile;

fn write_script(contents: &str) -> NamedTempFile {
    let mut temp = NamedTempFile::new().expect("temp script");
    write!(temp, "{contents}").expect("write script");
    temp
}

fn host_with(script: &NamedTempFile, players: usize) -> ScriptHost {
    let mut config = ScriptingConfig { max_players: players, ..Default::default() };
    config.mods.local = vec![ModEntry::new(script.path(), true)];
    ScriptHost::new(config)
}

#[test]
fn proxies_read_and_write_through_to_host_records() {
    let script = write_script(
        "let seen = -1;\n\
         hook_event(HOOK_UPDATE, || {\n\
             let p = gPlayerStates[1];\n\
             seen = p.coins;\n\
             p.coins = p.coins * 2;\n\
             p[\"pos_y\"] = 12.5;\n\
         });",
    );
    let mut host = host_with(&script, 2);
    host.initialize();

    host.players().with_player_mut(1, |p| p.coins = 21).expect("slot 1");
    let report = host.tick();
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);

    let seen = host.script_global(script.path(), "seen").and_then(|v| v.as_int().ok());
    assert_eq!(seen, Some(21), "script observes host writes made before the frame");
    let state = host.players().get(1).expect("slot 1");
    assert_eq!(state.coins, 42, "host observes script writes immediately");
    assert_eq!(state.pos.y, 12.5);
    assert_eq!(host.players().get(0).map(|p| p.coins), Some(0));
}

#[test]
fn writes_through_the_published_array_reach_host_records() {
    let script = write_script(
        "gPlayerStates[0].coins = 5;\n\
         gPlayerStates[0][\"stars\"] = 2;\n\
         hook_event(HOOK_UPDATE, || { gPlayerStates[1].coins += 3; });",
    );
    let mut host = host_with(&script, 2);
    let report = host.initialize();
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);
    assert_eq!(host.players().get(0).map(|p| (p.coins, p.stars)), Some((5, 2)), "top-level writes");

    let frame = host.tick();
    assert!(frame.failures.is_empty(), "unexpected failures: {:?}", frame.failures);
    assert_eq!(host.players().get(1).map(|p| p.coins), Some(3), "callback writes");
}

#[test]
fn player_table_is_published_once_per_slot() {
    let script = write_script(
        "let count = gPlayerStates.len();\n\
         let same = gPlayerStates[0] == gPlayerStates[0];\n\
         let different = gPlayerStates[0] == gPlayerStates[1];\n\
         let third_index = gPlayerStates[2].index;",
    );
    let mut host = host_with(&script, 3);
    let report = host.initialize();
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);

    let global = |name: &str| host.script_global(script.path(), name).expect(name);
    assert_eq!(global("count").as_int().ok(), Some(3));
    assert_eq!(global("same").as_bool().ok(), Some(true));
    assert_eq!(global("different").as_bool().ok(), Some(false));
    assert_eq!(global("third_index").as_int().ok(), Some(2 as INT));
}

#[test]
fn invalid_field_access_is_a_script_error() {
    let unknown = write_script("let p = gPlayerStates[0]; let x = p[\"jetpack\"];");
    let read_only = write_script("let p = gPlayerStates[0]; p[\"index\"] = 3;");
    let too_big = write_script("let p = gPlayerStates[0]; p.lives = 1000;");
    let wrong_type = write_script("let p = gPlayerStates[0]; p.coins = \"lots\";");

    for script in [&unknown, &read_only, &too_big, &wrong_type] {
        let mut host = host_with(script, 1);
        let report = host.initialize();
        assert_eq!(report.failures.len(), 1, "{} should fail", script.path().display());
        assert_eq!(host.players().get(0).map(|p| (p.index, p.lives, p.coins)), Some((0, 4, 0)));
    }
}

#[test]
fn proxies_die_with_their_session() {
    let script = write_script("let kept = gPlayerStates[0];");
    let mut host = host_with(&script, 1);
    host.initialize();

    let proxy = host
        .script_global(script.path(), "kept")
        .and_then(|value| value.try_cast::<ObjectProxy>())
        .expect("proxy global");
    assert!(proxy.is_valid());
    proxy.set("coins", rhai::Dynamic::from(5 as INT)).expect("write while live");
    assert_eq!(host.players().get(0).map(|p| p.coins), Some(5));

    host.shutdown();
    assert!(!proxy.is_valid());
    assert!(proxy.get("coins").is_err());
    assert_eq!(host.players().get(0).map(|p| p.coins), Some(5), "host storage outlives the session");
}

#[test]
fn shrinking_the_table_invalidates_out_of_range_proxies() {
    let script = write_script("let last = gPlayerStates[3];");
    let mut host = host_with(&script, 4);
    host.initialize();
    let proxy = host
        .script_global(script.path(), "last")
        .and_then(|value| value.try_cast::<ObjectProxy>())
        .expect("proxy global");

    host.players().resize(2);
    assert!(!proxy.is_valid());
    assert!(proxy.get("health").is_err());
}

#[test]
fn player_hooks_see_each_slot_in_order() {
    let script = write_script(
        "let order = [];\n\
         hook_event(HOOK_BEFORE_PLAYER_UPDATE, |p| { order.push(p.index); });\n\
         hook_event(HOOK_PLAYER_UPDATE, |p| { p.face_yaw = p.index * 100; });",
    );
    let mut host = host_with(&script, 3);
    host.initialize();

    let report = host.run_frame();
    assert_eq!(report.invoked, 6);
    let order = host
        .script_global(script.path(), "order")
        .and_then(|value| value.into_typed_array::<INT>().ok())
        .expect("order array");
    assert_eq!(order, vec![0, 1, 2]);
    let yaws: Vec<_> = host.players().snapshot().iter().map(|p| p.face_yaw).collect();
    assert_eq!(yaws, vec![0, 100, 200]);
    assert_eq!(host.hook_count(HookKind::BeforePlayerUpdate), 1);
}
