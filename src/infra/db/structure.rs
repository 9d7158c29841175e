//! Content types, data types and domains.

use sqlx::PgConnection;
use sqlx::types::Json;

use crate::application::repos::{RepoError, SaveContentType, SaveDataType, SaveDomain};
use crate::domain::entities::{ContentTypeRecord, DataTypeRecord, DomainRecord};
use crate::domain::types::{ContentTypeId, DataTypeId, DomainId};

use super::map_sqlx_error;
use super::rows::{ContentTypeRow, DataTypeRow, DomainRow};

const CONTENT_TYPE_COLUMNS: &str = "id, alias, item_type, properties, updated_at";

pub(super) async fn find_content_type(
    conn: &mut PgConnection,
    id: ContentTypeId,
) -> Result<Option<ContentTypeRecord>, RepoError> {
    let row = sqlx::query_as::<_, ContentTypeRow>(
        "SELECT id, alias, item_type, properties, updated_at FROM content_types WHERE id = $1",
    )
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(ContentTypeRecord::from))
}

pub(super) async fn content_types_using(
    conn: &mut PgConnection,
    data_type_id: DataTypeId,
) -> Result<Vec<ContentTypeRecord>, RepoError> {
    let rows = sqlx::query_as::<_, ContentTypeRow>(
        "SELECT id, alias, item_type, properties, updated_at FROM content_types \
         WHERE properties @> jsonb_build_array(jsonb_build_object('data_type_id', $1::int4)) \
         ORDER BY id",
    )
    .bind(data_type_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ContentTypeRecord::from).collect())
}

pub(super) async fn save_content_type(
    conn: &mut PgConnection,
    params: SaveContentType,
) -> Result<ContentTypeRecord, RepoError> {
    let properties = Json(&params.properties);
    let row = match params.id {
        Some(id) => sqlx::query_as::<_, ContentTypeRow>(&format!(
            "UPDATE content_types SET alias = $2, item_type = $3, properties = $4, updated_at = $5 \
             WHERE id = $1 RETURNING {CONTENT_TYPE_COLUMNS}"
        ))
        .bind(id.get())
        .bind(&params.alias)
        .bind(params.item_type)
        .bind(properties)
        .bind(params.updated_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?,
        None => sqlx::query_as::<_, ContentTypeRow>(&format!(
            "INSERT INTO content_types (alias, item_type, properties, updated_at) \
             VALUES ($1, $2, $3, $4) RETURNING {CONTENT_TYPE_COLUMNS}"
        ))
        .bind(&params.alias)
        .bind(params.item_type)
        .bind(properties)
        .bind(params.updated_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?,
    };

    Ok(ContentTypeRecord::from(row))
}

pub(super) async fn delete_content_type(
    conn: &mut PgConnection,
    id: ContentTypeId,
) -> Result<(), RepoError> {
    let in_use: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM content WHERE content_type_id = $1)")
            .bind(id.get())
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    if in_use {
        return Err(RepoError::integrity(format!(
            "content type {id} is still in use"
        )));
    }

    let result = sqlx::query("DELETE FROM content_types WHERE id = $1")
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn find_data_type(
    conn: &mut PgConnection,
    id: DataTypeId,
) -> Result<Option<DataTypeRecord>, RepoError> {
    let row = sqlx::query_as::<_, DataTypeRow>(
        "SELECT id, key, name, editor_alias FROM data_types WHERE id = $1",
    )
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(DataTypeRecord::from))
}

pub(super) async fn save_data_type(
    conn: &mut PgConnection,
    params: SaveDataType,
) -> Result<DataTypeRecord, RepoError> {
    let row = match params.id {
        Some(id) => sqlx::query_as::<_, DataTypeRow>(
            "UPDATE data_types SET key = $2, name = $3, editor_alias = $4 \
             WHERE id = $1 RETURNING id, key, name, editor_alias",
        )
        .bind(id.get())
        .bind(params.key)
        .bind(&params.name)
        .bind(&params.editor_alias)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?,
        None => sqlx::query_as::<_, DataTypeRow>(
            "INSERT INTO data_types (key, name, editor_alias) VALUES ($1, $2, $3) \
             RETURNING id, key, name, editor_alias",
        )
        .bind(params.key)
        .bind(&params.name)
        .bind(&params.editor_alias)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?,
    };

    Ok(DataTypeRecord::from(row))
}

pub(super) async fn delete_data_type(
    conn: &mut PgConnection,
    id: DataTypeId,
) -> Result<(), RepoError> {
    if !content_types_using(conn, id).await?.is_empty() {
        return Err(RepoError::integrity(format!(
            "data type {id} is referenced by a content type"
        )));
    }

    let result = sqlx::query("DELETE FROM data_types WHERE id = $1")
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn find_domain(
    conn: &mut PgConnection,
    id: DomainId,
) -> Result<Option<DomainRecord>, RepoError> {
    let row = sqlx::query_as::<_, DomainRow>(
        "SELECT id, host, root_content_id FROM domains WHERE id = $1",
    )
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(DomainRecord::from))
}

pub(super) async fn list_domains(conn: &mut PgConnection) -> Result<Vec<DomainRecord>, RepoError> {
    let rows = sqlx::query_as::<_, DomainRow>(
        "SELECT id, host, root_content_id FROM domains ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(DomainRecord::from).collect())
}

pub(super) async fn save_domain(
    conn: &mut PgConnection,
    params: SaveDomain,
) -> Result<DomainRecord, RepoError> {
    let row = match params.id {
        Some(id) => sqlx::query_as::<_, DomainRow>(
            "UPDATE domains SET host = $2, root_content_id = $3 \
             WHERE id = $1 RETURNING id, host, root_content_id",
        )
        .bind(id.get())
        .bind(&params.host)
        .bind(params.root_content_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?,
        None => sqlx::query_as::<_, DomainRow>(
            "INSERT INTO domains (host, root_content_id) VALUES ($1, $2) \
             RETURNING id, host, root_content_id",
        )
        .bind(&params.host)
        .bind(params.root_content_id.get())
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?,
    };

    Ok(DomainRecord::from(row))
}

pub(super) async fn delete_domain(conn: &mut PgConnection, id: DomainId) -> Result<(), RepoError> {
    let result = sqlx::query("DELETE FROM domains WHERE id = $1")
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}
