use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;
use vellum::application::content::SaveContentCommand;
use vellum::application::context::NodeContext;
use vellum::application::structure::ContentTypeCommand;
use vellum::cache::{CacheConfig, ChangeBatch, ChannelId, TemplateChange};
use vellum::cluster::{
    DispatchWorker, LoopbackTransport, PeerAddress, PeerTransport, ReceiveError, ReceiveOutcome,
    StaticPeerDirectory,
};
use vellum::domain::types::{ContentId, ContentTypeId, ItemType, Preview};
use vellum::infra::memory::InMemoryContentStore;
use vellum_wire::{IdChangeEntry, NotificationEnvelope, TemplateChangeEntry, change_bits};

struct Node {
    context: NodeContext,
    outbox: Option<mpsc::UnboundedReceiver<NotificationEnvelope>>,
    _templates: tempfile::TempDir,
}

fn node(store: &Arc<InMemoryContentStore>) -> Node {
    let templates = tempfile::tempdir().expect("template dir");
    let (context, outbox) = NodeContext::build(
        Uuid::new_v4(),
        Arc::clone(store),
        &CacheConfig::default(),
        templates.path(),
        Vec::new(),
    )
    .expect("node");
    Node {
        context,
        outbox: Some(outbox),
        _templates: templates,
    }
}

fn endpoint(name: &str) -> Url {
    Url::parse(&format!("http://{name}.cluster.test/")).expect("url")
}

/// Worker delivering `from`'s outbox to each endpoint in `peers`.
fn worker(from: &mut Node, transport: Arc<LoopbackTransport>, peers: Vec<Url>) -> DispatchWorker {
    DispatchWorker::new(
        from.context.node_id,
        None,
        from.outbox.take().expect("outbox"),
        Arc::new(StaticPeerDirectory::new(
            peers.into_iter().map(PeerAddress::new).collect(),
        )),
        transport as Arc<dyn PeerTransport>,
    )
}

async fn page_type(node: &Node) -> ContentTypeId {
    node.context
        .structure
        .save_content_type(ContentTypeCommand::new("page", ItemType::Content))
        .await
        .expect("content type")
        .id
}

async fn published_name(node: &Node, id: ContentId) -> Option<String> {
    node.context
        .caches
        .projection
        .get_by_id(Preview::Published, id)
        .await
        .expect("projection read")
        .map(|content| content.name.clone())
}

#[tokio::test]
async fn remote_node_converges_after_dispatch() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut a = node(&store);
    let b = node(&store);

    let transport = Arc::new(LoopbackTransport::new());
    transport.connect(endpoint("b"), Arc::clone(&b.context.receiver));
    let mut dispatch = worker(&mut a, Arc::clone(&transport), vec![endpoint("b")]);

    let page = page_type(&a).await;
    let home = a
        .context
        .content
        .save("editor", SaveContentCommand::create(None, page, "Home"))
        .await
        .expect("save");
    dispatch.drain_pending().await;

    // B caches that nothing is published yet.
    assert_eq!(published_name(&b, home.id).await, None);

    a.context.content.publish(home.id, false).await.expect("publish");
    assert_eq!(published_name(&a, home.id).await.as_deref(), Some("Home"));
    assert_eq!(published_name(&b, home.id).await, None);

    let summary = dispatch.drain_pending().await;
    assert!(summary.delivered >= 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(published_name(&b, home.id).await.as_deref(), Some("Home"));

    a.context.content.unpublish(home.id).await.expect("unpublish");
    dispatch.drain_pending().await;
    assert_eq!(published_name(&b, home.id).await, None);
}

#[tokio::test]
async fn unreachable_peer_does_not_fail_the_write() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut a = node(&store);
    let b = node(&store);

    let transport = Arc::new(LoopbackTransport::new());
    transport.connect(endpoint("b"), Arc::clone(&b.context.receiver));
    let mut dispatch = worker(
        &mut a,
        Arc::clone(&transport),
        vec![endpoint("b"), endpoint("gone")],
    );

    let page = page_type(&a).await;
    let home = a
        .context
        .content
        .save("editor", SaveContentCommand::create(None, page, "Home"))
        .await
        .expect("save");
    let outcome = a.context.content.publish(home.id, false).await.expect("publish");
    assert!(outcome.is_success());

    let summary = dispatch.drain_pending().await;
    assert!(summary.failed >= 1);
    assert_eq!(summary.delivered, summary.failed);
    assert_eq!(published_name(&b, home.id).await.as_deref(), Some("Home"));

    transport.disconnect(&endpoint("b"));
    a.context
        .content
        .save("editor", SaveContentCommand::update(home.id, "Welcome"))
        .await
        .expect("edit while b is down");
    let summary = dispatch.drain_pending().await;
    assert_eq!(summary.delivered, 0);
}

fn content_envelope(origin: Uuid, sequence: u64, id: i32) -> NotificationEnvelope {
    NotificationEnvelope::new(
        origin,
        ChannelId::CONTENT.as_uuid(),
        sequence,
        &[IdChangeEntry {
            id,
            change_types: change_bits::REFRESH_NODE | change_bits::REFRESH_PUBLISHED,
        }],
    )
    .expect("envelope")
}

#[tokio::test]
async fn sequence_gap_refreshes_the_channel() {
    let store = Arc::new(InMemoryContentStore::new());
    let b = node(&store);
    let origin = Uuid::new_v4();
    let receiver = &b.context.receiver;

    let first = receiver.receive(content_envelope(origin, 1, 5)).expect("first");
    assert!(matches!(first, ReceiveOutcome::Applied(ref scope) if !scope.refreshed_all));

    let repeated = receiver.receive(content_envelope(origin, 1, 5)).expect("repeat");
    assert_eq!(repeated, ReceiveOutcome::Duplicate);

    let gap = receiver.receive(content_envelope(origin, 4, 6)).expect("gap");
    assert!(matches!(gap, ReceiveOutcome::Resynced(ref scope) if scope.refreshed_all));
    assert_eq!(receiver.last_sequence(origin, ChannelId::CONTENT), Some(4));

    let own = receiver
        .receive(content_envelope(b.context.node_id, 9, 5))
        .expect("self");
    assert_eq!(own, ReceiveOutcome::SelfOrigin);
}

#[tokio::test]
async fn template_changes_stay_on_the_node() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut a = node(&store);
    let b = node(&store);

    let transport = Arc::new(LoopbackTransport::new());
    transport.connect(endpoint("b"), Arc::clone(&b.context.receiver));
    let mut dispatch = worker(&mut a, transport, vec![endpoint("b")]);

    let mut batch = ChangeBatch::new();
    batch.template(TemplateChange::refreshed("page"));
    let report = a.context.messenger.flush(batch).expect("flush");
    assert_eq!(report.channels(), vec![ChannelId::TEMPLATE]);
    assert_eq!(report.enqueued, 0);
    assert_eq!(dispatch.drain_pending().await.delivered, 0);

    let forged = NotificationEnvelope::new(
        a.context.node_id,
        ChannelId::TEMPLATE.as_uuid(),
        1,
        &[TemplateChangeEntry {
            alias: Some("page".to_string()),
            change_types: change_bits::REFRESH_NODE,
        }],
    )
    .expect("envelope");
    assert!(matches!(
        b.context.receiver.receive(forged),
        Err(ReceiveError::LocalOnly(channel)) if channel == ChannelId::TEMPLATE
    ));
}

#[tokio::test]
async fn resync_drops_remote_caches() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut a = node(&store);
    let b = node(&store);

    let transport = Arc::new(LoopbackTransport::new());
    transport.connect(endpoint("b"), Arc::clone(&b.context.receiver));
    let mut dispatch = worker(&mut a, transport, vec![endpoint("b")]);

    let page = page_type(&a).await;
    let home = a
        .context
        .content
        .save("editor", SaveContentCommand::create(None, page, "Home"))
        .await
        .expect("save");
    a.context.content.publish(home.id, false).await.expect("publish");
    dispatch.drain_pending().await;

    assert_eq!(published_name(&b, home.id).await.as_deref(), Some("Home"));
    assert!(!b.context.caches.projection.is_empty());
    let before = b
        .context
        .receiver
        .last_sequence(a.context.node_id, ChannelId::CONTENT)
        .expect("content envelopes seen");

    a.context
        .messenger
        .refresh_all(ChannelId::CONTENT)
        .expect("refresh");
    let summary = dispatch.drain_pending().await;
    assert_eq!(summary.delivered, 1);
    assert!(b.context.caches.projection.is_empty());
    assert_eq!(
        b.context
            .receiver
            .last_sequence(a.context.node_id, ChannelId::CONTENT),
        Some(before + 1)
    );
}
