use kestrel_modding::{HookKind, ScriptHost, ScriptingConfig};

#[test]
fn bundled_mods_load_cleanly() {
    let mut config = ScriptingConfig::load("config/scripting.json").expect("bundled config should parse");
    config.hot_reload = false;
    let mut host = ScriptHost::new(config);
    let report = host.initialize();
    assert!(report.is_active(), "setup failed: {:?}", report.setup_error);
    assert!(report.failures.is_empty(), "bundled mods failed: {:?}", report.failures);
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(host.hook_count(HookKind::Update), 2);

    for _ in 0..60 {
        let frame = host.run_frame();
        assert!(frame.failures.is_empty(), "frame failed: {:?}", frame.failures);
    }
    let coins: i16 = host.players().snapshot().iter().map(|p| p.coins).sum();
    assert_eq!(coins, 0, "nobody is idle on a fresh table");
}
