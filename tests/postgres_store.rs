use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use vellum::application::content::SaveContentCommand;
use vellum::application::context::NodeContext;
use vellum::application::repos::{ContentReader, ContentStore};
use vellum::application::structure::ContentTypeCommand;
use vellum::cache::CacheConfig;
use vellum::domain::types::{ContentId, ItemType, Preview};
use vellum::infra::db::PostgresContentStore;

struct PgNode {
    node: NodeContext,
    _templates: tempfile::TempDir,
}

fn pg_node(pool: PgPool) -> PgNode {
    let templates = tempfile::tempdir().expect("template dir");
    let (node, _outbox) = NodeContext::build(
        Uuid::new_v4(),
        Arc::new(PostgresContentStore::new(pool)),
        &CacheConfig::default(),
        templates.path(),
        Vec::new(),
    )
    .expect("node");
    PgNode {
        node,
        _templates: templates,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn publish_lifecycle_round_trips_through_postgres(pool: PgPool) {
    let PgNode { node, _templates } = pg_node(pool);
    node.store.health_check().await.expect("health");

    let text = node
        .structure
        .save_data_type(None, None, "Text", "textbox")
        .await
        .expect("data type");
    let page = node
        .structure
        .save_content_type(
            ContentTypeCommand::new("page", ItemType::Content).with_property("title", text.id, true),
        )
        .await
        .expect("content type")
        .id;

    let home = node
        .content
        .save(
            "editor",
            SaveContentCommand::create(None, page, "Home")
                .with_value("title", json!("Welcome"))
                .with_tag("front"),
        )
        .await
        .expect("save home");
    let about = node
        .content
        .save(
            "editor",
            SaveContentCommand::create(Some(home.id), page, "About")
                .with_value("title", json!("About us")),
        )
        .await
        .expect("save about");

    let outcome = node
        .content
        .publish_with_children(home.id, false)
        .await
        .expect("branch publish");
    assert!(outcome.all_succeeded());
    assert_eq!(outcome.published_ids(), vec![home.id, about.id]);

    let projection = &node.caches.projection;
    let routed = projection
        .get_by_route(Preview::Published, "/home/about")
        .await
        .expect("route")
        .map(|content| content.id);
    assert_eq!(routed, Some(about.id));

    let descendants: Vec<ContentId> = node
        .store
        .descendants(home.id)
        .await
        .expect("descendants")
        .iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(descendants, vec![about.id]);
    assert_eq!(node.store.tagged("front").await.expect("tagged"), vec![home.id]);

    node.content
        .save(
            "editor",
            SaveContentCommand::update(about.id, "About")
                .with_value("title", json!("About the team")),
        )
        .await
        .expect("edit");
    let versions = node.store.list_versions(about.id).await.expect("versions");
    assert_eq!(versions.len(), 2);

    let published_title = projection
        .get_by_id(Preview::Published, about.id)
        .await
        .expect("published")
        .and_then(|content| content.values.get("title").cloned());
    assert_eq!(published_title, Some(json!("About us")));

    assert!(node.content.unpublish(home.id).await.expect("unpublish"));
    let masked = projection
        .get_by_id(Preview::Published, about.id)
        .await
        .expect("masked");
    assert!(masked.is_none());

    assert!(node.content.move_to_recycle_bin(home.id).await.expect("trash"));
    let trashed = node
        .store
        .find_content(home.id)
        .await
        .expect("find")
        .expect("still stored");
    assert!(trashed.trashed);
    assert!(trashed.published_version_id.is_none());

    let removed = node.content.empty_recycle_bin().await.expect("empty bin");
    assert_eq!(removed, 2);
    assert!(node.store.find_content(about.id).await.expect("find").is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn content_types_in_use_cannot_be_deleted(pool: PgPool) {
    let PgNode { node, _templates } = pg_node(pool);

    let page = node
        .structure
        .save_content_type(ContentTypeCommand::new("page", ItemType::Content))
        .await
        .expect("content type")
        .id;
    node.content
        .save("editor", SaveContentCommand::create(None, page, "Home"))
        .await
        .expect("save");

    assert!(node.structure.delete_content_type(page).await.is_err());
    let still_there = node.store.find_content_type(page).await.expect("lookup");
    assert!(still_there.is_some());
}
