//! The bundled demo modules and configuration stay loadable.

use std::path::PathBuf;
use std::sync::Arc;

use modhost::config::HostConfig;
use modhost::loader::ModuleLoader;
use modhost::runtime::{HostServices, ModuleRuntime};
use modhost::script::ScriptSource;
use modhost::store::MemoryStore;
use modhost::transport::NullSink;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos")
}

#[test]
fn test_demo_scripts_compile_and_load() {
    let config = HostConfig::load_from(demos().join("modhost.toml")).unwrap();
    let services = HostServices::new(Arc::new(NullSink))
        .with_store(Arc::new(MemoryStore::seeded(config.store_seed())))
        .with_config(config.runtime_config());
    let loader = ModuleLoader::new(demos().join("modules")).with_source(ScriptSource::new());
    let mut runtime = ModuleRuntime::new(loader, services);

    let report = runtime.load_all().unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(
        report.loaded,
        vec!["local.afk_timer", "local.heartbeat", "chatbox.typing_echo"]
    );
    assert!(runtime.modules().iter().all(|m| m.enabled));

    let afk = runtime.module("local.afk_timer").unwrap();
    assert_eq!(
        afk.parameters().get_by_name("Seconds").unwrap().wire_name,
        "avatar/parameters/AFKTime"
    );
}
