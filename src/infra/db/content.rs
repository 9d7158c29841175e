//! Queries over the content tree and its versions.
//!
//! Every function takes a bare connection so the pool-backed reader and the
//! transaction share one set of statements.

use sqlx::PgConnection;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{NewContent, NewVersion, RepoError};
use crate::domain::entities::{ContentRecord, ContentVersionRecord};
use crate::domain::path::ContentPath;
use crate::domain::types::{ContentId, ContentKind, ContentTypeId, VersionId};

use super::map_sqlx_error;
use super::rows::{ContentRow, VersionRow, content_columns, version_columns};

pub(super) async fn find_content(
    conn: &mut PgConnection,
    id: ContentId,
) -> Result<Option<ContentRecord>, RepoError> {
    let row = sqlx::query_as::<_, ContentRow>(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content c WHERE c.id = $1"
    ))
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(ContentRecord::from))
}

pub(super) async fn find_content_by_key(
    conn: &mut PgConnection,
    key: Uuid,
) -> Result<Option<ContentRecord>, RepoError> {
    let row = sqlx::query_as::<_, ContentRow>(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content c WHERE c.key = $1"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(ContentRecord::from))
}

pub(super) async fn find_version(
    conn: &mut PgConnection,
    id: ContentId,
    version: VersionId,
) -> Result<Option<ContentVersionRecord>, RepoError> {
    let row = sqlx::query_as::<_, VersionRow>(concat!(
        "SELECT ",
        version_columns!(),
        " FROM content_versions v WHERE v.content_id = $1 AND v.version_id = $2"
    ))
    .bind(id.get())
    .bind(version.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(ContentVersionRecord::from))
}

pub(super) async fn list_versions(
    conn: &mut PgConnection,
    id: ContentId,
) -> Result<Vec<ContentVersionRecord>, RepoError> {
    let rows = sqlx::query_as::<_, VersionRow>(concat!(
        "SELECT ",
        version_columns!(),
        " FROM content_versions v WHERE v.content_id = $1 ORDER BY v.version_id DESC"
    ))
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentVersionRecord::from).collect())
}

pub(super) async fn children(
    conn: &mut PgConnection,
    parent: Option<ContentId>,
    kind: ContentKind,
) -> Result<Vec<ContentRecord>, RepoError> {
    let rows = sqlx::query_as::<_, ContentRow>(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content c \
          WHERE c.parent_id IS NOT DISTINCT FROM $1 AND c.kind = $2 \
          ORDER BY c.sort_order, c.id"
    ))
    .bind(parent.map(ContentId::get))
    .bind(kind)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentRecord::from).collect())
}

/// Descendants in document order: each row carries the `(sort_order, id)`
/// pairs of its branch, and arrays compare element-wise.
pub(super) async fn descendants(
    conn: &mut PgConnection,
    id: ContentId,
) -> Result<Vec<ContentRecord>, RepoError> {
    let rows = sqlx::query_as::<_, ContentRow>(concat!(
        "WITH RECURSIVE branch AS ( \
            SELECT c.id, ARRAY[c.sort_order, c.id] AS order_key \
            FROM content c WHERE c.parent_id = $1 \
            UNION ALL \
            SELECT c.id, b.order_key || ARRAY[c.sort_order, c.id] \
            FROM content c INNER JOIN branch b ON c.parent_id = b.id \
        ) \
        SELECT ",
        content_columns!(),
        " FROM branch b INNER JOIN content c ON c.id = b.id ORDER BY b.order_key"
    ))
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentRecord::from).collect())
}

pub(super) async fn trashed_roots(
    conn: &mut PgConnection,
    kind: ContentKind,
) -> Result<Vec<ContentRecord>, RepoError> {
    let rows = sqlx::query_as::<_, ContentRow>(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content c \
          LEFT JOIN content p ON p.id = c.parent_id \
          WHERE c.kind = $1 AND c.trashed AND (p.id IS NULL OR NOT p.trashed) \
          ORDER BY c.id"
    ))
    .bind(kind)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentRecord::from).collect())
}

pub(super) async fn tagged(conn: &mut PgConnection, tag: &str) -> Result<Vec<ContentId>, RepoError> {
    let ids: Vec<i32> = sqlx::query_scalar(
        "SELECT c.id FROM content c \
         INNER JOIN content_versions v ON v.version_id = c.published_version_id \
         WHERE NOT c.trashed AND $1 = ANY(v.tags) \
         ORDER BY c.id",
    )
    .bind(tag)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(ids.into_iter().map(ContentId).collect())
}

pub(super) async fn due_for_release(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> Result<Vec<ContentId>, RepoError> {
    let ids: Vec<i32> = sqlx::query_scalar(
        "SELECT c.id FROM content c \
         WHERE c.kind = 'document' AND NOT c.trashed \
           AND c.published_version_id IS DISTINCT FROM c.newest_version_id \
           AND c.release_date <= $1 \
         ORDER BY c.id",
    )
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(ids.into_iter().map(ContentId).collect())
}

pub(super) async fn due_for_expiry(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> Result<Vec<ContentId>, RepoError> {
    let ids: Vec<i32> = sqlx::query_scalar(
        "SELECT c.id FROM content c \
         WHERE c.kind = 'document' AND c.published_version_id IS NOT NULL \
           AND c.expire_date <= $1 \
         ORDER BY c.id",
    )
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(ids.into_iter().map(ContentId).collect())
}

pub(super) async fn content_of_type(
    conn: &mut PgConnection,
    content_type_id: ContentTypeId,
) -> Result<Vec<ContentRecord>, RepoError> {
    let rows = sqlx::query_as::<_, ContentRow>(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content c WHERE c.content_type_id = $1 ORDER BY c.id"
    ))
    .bind(content_type_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentRecord::from).collect())
}

async fn next_id(conn: &mut PgConnection, table: &str, column: &str) -> Result<i64, RepoError> {
    sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence($1, $2))")
        .bind(table)
        .bind(column)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)
}

/// Ids are drawn up front so the path and the first version can be written
/// alongside the row.
pub(super) async fn insert_content(
    conn: &mut PgConnection,
    params: NewContent,
) -> Result<(ContentRecord, ContentVersionRecord), RepoError> {
    let parent_path = match params.parent_id {
        Some(parent_id) => Some(
            find_content(conn, parent_id)
                .await?
                .map(|parent| parent.path)
                .ok_or_else(|| RepoError::InvalidInput {
                    message: format!("parent {parent_id} does not exist"),
                })?,
        ),
        None => None,
    };

    let raw_id = next_id(conn, "content", "id").await?;
    let id = ContentId(
        i32::try_from(raw_id)
            .map_err(|_| RepoError::from_persistence("content id exceeds supported range"))?,
    );
    let version_id = VersionId(next_id(conn, "content_versions", "version_id").await?);
    let path = match parent_path {
        Some(path) => path.child(id),
        None => ContentPath::root(id),
    };

    let row = sqlx::query_as::<_, ContentRow>(
        "INSERT INTO content (id, key, kind, content_type_id, parent_id, path, sort_order, name, \
             newest_version_id, published_version_id, trashed, release_date, expire_date, \
             created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, FALSE, $10, $11, $12, $12) \
         RETURNING id, key, kind, content_type_id, parent_id, path, sort_order, name, \
             newest_version_id, published_version_id, trashed, release_date, expire_date, \
             created_at, updated_at",
    )
    .bind(id.get())
    .bind(params.key)
    .bind(params.kind)
    .bind(params.content_type_id.get())
    .bind(params.parent_id.map(ContentId::get))
    .bind(path.to_raw())
    .bind(params.sort_order)
    .bind(&params.name)
    .bind(version_id.get())
    .bind(params.release_date)
    .bind(params.expire_date)
    .bind(params.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let version = insert_version_row(
        conn,
        Some(version_id),
        NewVersion {
            content_id: id,
            name: params.name,
            values: params.values,
            tags: params.tags,
            author: params.author,
            created_at: params.created_at,
        },
    )
    .await?;

    Ok((ContentRecord::from(row), version))
}

pub(super) async fn insert_version(
    conn: &mut PgConnection,
    params: NewVersion,
) -> Result<ContentVersionRecord, RepoError> {
    if find_content(conn, params.content_id).await?.is_none() {
        return Err(RepoError::NotFound);
    }
    insert_version_row(conn, None, params).await
}

async fn insert_version_row(
    conn: &mut PgConnection,
    version_id: Option<VersionId>,
    params: NewVersion,
) -> Result<ContentVersionRecord, RepoError> {
    let tags: Vec<String> = params.tags.into_iter().collect();
    let row = sqlx::query_as::<_, VersionRow>(
        "INSERT INTO content_versions \
             (version_id, content_id, name, property_values, tags, author, created_at) \
         VALUES (COALESCE($1, nextval(pg_get_serial_sequence('content_versions', 'version_id'))), \
             $2, $3, $4, $5, $6, $7) \
         RETURNING version_id, content_id, name, property_values, tags, author, created_at",
    )
    .bind(version_id.map(VersionId::get))
    .bind(params.content_id.get())
    .bind(&params.name)
    .bind(Json(&params.values))
    .bind(&tags)
    .bind(&params.author)
    .bind(params.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(ContentVersionRecord::from(row))
}

pub(super) async fn replace_version(
    conn: &mut PgConnection,
    version: &ContentVersionRecord,
) -> Result<(), RepoError> {
    let tags: Vec<&str> = version.tags.iter().map(String::as_str).collect();
    let result = sqlx::query(
        "UPDATE content_versions \
         SET name = $3, property_values = $4, tags = $5, author = $6, created_at = $7 \
         WHERE version_id = $1 AND content_id = $2",
    )
    .bind(version.version_id.get())
    .bind(version.content_id.get())
    .bind(&version.name)
    .bind(Json(&version.values))
    .bind(&tags)
    .bind(&version.author)
    .bind(version.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn update_content(
    conn: &mut PgConnection,
    record: &ContentRecord,
) -> Result<(), RepoError> {
    let result = sqlx::query(
        "UPDATE content \
         SET content_type_id = $2, parent_id = $3, path = $4, sort_order = $5, name = $6, \
             newest_version_id = $7, published_version_id = $8, trashed = $9, \
             release_date = $10, expire_date = $11, updated_at = $12 \
         WHERE id = $1",
    )
    .bind(record.id.get())
    .bind(record.content_type_id.get())
    .bind(record.parent_id.map(ContentId::get))
    .bind(record.path.to_raw())
    .bind(record.sort_order)
    .bind(&record.name)
    .bind(record.newest_version_id.get())
    .bind(record.published_version_id.map(VersionId::get))
    .bind(record.trashed)
    .bind(record.release_date)
    .bind(record.expire_date)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

/// Versions and domains rooted at the entity go with it through cascades.
pub(super) async fn delete_content(conn: &mut PgConnection, id: ContentId) -> Result<(), RepoError> {
    let has_children: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM content WHERE parent_id = $1)")
            .bind(id.get())
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    if has_children {
        return Err(RepoError::integrity(format!(
            "content {id} still has children"
        )));
    }

    let result = sqlx::query("DELETE FROM content WHERE id = $1")
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn delete_versions(
    conn: &mut PgConnection,
    id: ContentId,
    versions: &[VersionId],
) -> Result<u64, RepoError> {
    let raw: Vec<i64> = versions.iter().map(|version| version.get()).collect();
    let result =
        sqlx::query("DELETE FROM content_versions WHERE content_id = $1 AND version_id = ANY($2)")
            .bind(id.get())
            .bind(&raw)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

    Ok(result.rows_affected())
}
