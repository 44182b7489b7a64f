//! Criterion benchmarks for the hot paths: cache admission, neighbor
//! queries, and tick throughput.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use wyrld_core::config::{CacheConfig, SimulationConfig};
use wyrld_core::lazy::LazyGenerator;
use wyrld_core::oracle::{ContentKind, OracleRequest, ScriptedOracle};
use wyrld_core::store::{KvStore, MemoryKvStore};
use wyrld_core::{
    EventLog, MapTopologyEngine, NodeId, NpcId, NpcState, RegionState, RiskLevel, SessionId,
    Weather, WorldStateManager, WorldTickSimulator,
};

fn bench_cache_exact_hit(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let lazy = LazyGenerator::new(Arc::new(ScriptedOracle::new()), &CacheConfig::default());
    let request = OracleRequest::new(
        ContentKind::Location,
        "salt warehouse",
        vec!["harbor district".into()],
        vec!["nautical".into()],
    );
    rt.block_on(lazy.get_or_generate(&request)).expect("warm");

    c.bench_function("cache_exact_hit", |b| {
        b.iter(|| {
            let generated = rt
                .block_on(lazy.get_or_generate(black_box(&request)))
                .expect("hit");
            assert!(generated.from_cache);
        });
    });
}

fn bench_get_neighbors(c: &mut Criterion) {
    let lazy = Arc::new(LazyGenerator::new(
        Arc::new(ScriptedOracle::new()),
        &CacheConfig::default(),
    ));
    let map = MapTopologyEngine::new(
        SessionId::from("bench"),
        Arc::new(MemoryKvStore::new()),
        lazy,
    );
    let root = map
        .create_root(
            NodeId::from("hub"),
            "Hub",
            Some("Spokes everywhere.".into()),
            vec![],
            RiskLevel::MIN,
            0,
        )
        .expect("root");
    for i in 0..100 {
        map.create_dynamic_sub_location(&root.id, &format!("spoke {i}"), 0)
            .expect("spoke");
    }

    c.bench_function("get_neighbors_100", |b| {
        b.iter(|| {
            let neighbors = map.get_neighbors(black_box(&root.id)).expect("neighbors");
            assert_eq!(neighbors.len(), 100);
        });
    });
}

fn bench_tick(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let session = SessionId::from("bench-tick");
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let lazy = Arc::new(LazyGenerator::new(
        Arc::new(ScriptedOracle::new()),
        &CacheConfig::default(),
    ));
    let map = MapTopologyEngine::new(session.clone(), kv.clone(), lazy.clone());
    let log = EventLog::new(session.clone(), kv.clone());
    let mut world = WorldStateManager::load(session, kv).expect("world");
    let sim = WorldTickSimulator::new(SimulationConfig::default(), lazy);

    let root = map
        .create_root(
            NodeId::from("town"),
            "Town",
            Some("A town.".into()),
            vec![],
            RiskLevel::new(3),
            0,
        )
        .expect("root");
    for i in 0..4 {
        map.create_dynamic_sub_location(&root.id, &format!("district {i}"), 0)
            .expect("district");
    }
    world.upsert_region(RegionState {
        id: root.id.clone(),
        name: "Town".into(),
        weather: Weather::Clear,
        risk: RiskLevel::new(3),
        discovered: true,
    });
    for i in 0..10 {
        world.register_npc(NpcState::new(
            NpcId::new(format!("npc_{i:03}")),
            format!("Townsfolk {i}"),
            NodeId::from("town"),
        ));
    }

    c.bench_function("tick_60_minutes_10_npcs", |b| {
        b.iter(|| {
            let events = rt
                .block_on(sim.tick(&mut world, &map, &log, black_box(60), None))
                .expect("tick");
            black_box(events);
        });
    });
}

criterion_group!(
    benches,
    bench_cache_exact_hit,
    bench_get_neighbors,
    bench_tick
);
criterion_main!(benches);
