use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use url::Url;
use uuid::Uuid;
use vellum::application::content::SaveContentCommand;
use vellum::application::context::NodeContext;
use vellum::application::structure::ContentTypeCommand;
use vellum::cache::{CacheConfig, Dependency, FragmentCache, FragmentKey};
use vellum::cluster::{DispatchWorker, LoopbackTransport, PeerAddress, StaticPeerDirectory};
use vellum::domain::types::{ContentId, ItemType, Preview};
use vellum::infra::memory::InMemoryContentStore;

#[tokio::test]
async fn cache_and_cluster_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Fragment hit/miss/evict
    let fragments = FragmentCache::new(&CacheConfig {
        fragment_limit: 1,
        ..Default::default()
    });
    let first = FragmentKey::new("page", ContentId(1), Preview::Published);
    let second = FragmentKey::new("page", ContentId(2), Preview::Published);
    assert!(fragments.get(&first).is_none());
    let generation = fragments.generation();
    let dependencies: HashSet<Dependency> =
        [Dependency::Content(ContentId(1))].into_iter().collect();
    assert!(fragments.put(first.clone(), Arc::from("<p>one</p>"), dependencies, generation));
    assert!(fragments.get(&first).is_some());
    assert!(fragments.put(second, Arc::from("<p>two</p>"), HashSet::new(), generation));

    // Projection, flush and delivery through two nodes
    let store = Arc::new(InMemoryContentStore::new());
    let templates = tempfile::tempdir().expect("template dir");
    let (a, outbox) = NodeContext::build(
        Uuid::new_v4(),
        Arc::clone(&store),
        &CacheConfig::default(),
        templates.path(),
        Vec::new(),
    )
    .expect("node a");
    let (b, _) = NodeContext::build(
        Uuid::new_v4(),
        Arc::clone(&store),
        &CacheConfig::default(),
        templates.path(),
        Vec::new(),
    )
    .expect("node b");

    let reachable = Url::parse("http://b.cluster.test/").expect("url");
    let unreachable = Url::parse("http://gone.cluster.test/").expect("url");
    let transport = Arc::new(LoopbackTransport::new());
    transport.connect(reachable.clone(), Arc::clone(&b.receiver));
    let mut dispatch = DispatchWorker::new(
        a.node_id,
        None,
        outbox,
        Arc::new(StaticPeerDirectory::new(vec![
            PeerAddress::new(reachable),
            PeerAddress::new(unreachable),
        ])),
        transport,
    );

    let page = a
        .structure
        .save_content_type(ContentTypeCommand::new("page", ItemType::Content))
        .await
        .expect("content type")
        .id;
    let home = a
        .content
        .save("editor", SaveContentCommand::create(None, page, "Home"))
        .await
        .expect("save");
    a.content.publish(home.id, false).await.expect("publish");

    for _ in 0..2 {
        let read = a
            .caches
            .projection
            .get_by_id(Preview::Published, home.id)
            .await
            .expect("read");
        assert!(read.is_some());
    }

    let summary = dispatch.drain_pending().await;
    assert!(summary.delivered > 0);
    assert!(summary.failed > 0);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "vellum_fragment_hit_total",
        "vellum_fragment_miss_total",
        "vellum_fragment_evict_total",
        "vellum_projection_hit_total",
        "vellum_projection_miss_total",
        "vellum_projection_purged_total",
        "vellum_cache_apply_ms",
        "vellum_flush_ms",
        "vellum_cluster_delivered_total",
        "vellum_cluster_delivery_failed_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
