use common::storage::ContentHash;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};

use crate::entity::media_item;
use crate::error::VaultError;

/// Id of the item `author_id` already stored with this content in this
/// community, if any.
///
/// A database error surfaces as [`VaultError::Unavailable`]; it is never read
/// as "not a duplicate".
pub async fn find_existing<C: ConnectionTrait>(
    conn: &C,
    content_hash: &ContentHash,
    author_id: &str,
    community_id: &str,
) -> Result<Option<String>, VaultError> {
    let id: Option<String> = media_item::Entity::find()
        .select_only()
        .column(media_item::Column::Id)
        .filter(media_item::Column::ContentHash.eq(content_hash.to_hex()))
        .filter(media_item::Column::AuthorId.eq(author_id))
        .filter(media_item::Column::CommunityId.eq(community_id))
        .into_tuple()
        .one(conn)
        .await?;
    Ok(id)
}

pub async fn exists<C: ConnectionTrait>(
    conn: &C,
    content_hash: &ContentHash,
    author_id: &str,
    community_id: &str,
) -> Result<bool, VaultError> {
    Ok(find_existing(conn, content_hash, author_id, community_id)
        .await?
        .is_some())
}
