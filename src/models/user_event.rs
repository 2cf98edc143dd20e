//! User event entity model
//!
//! This module contains the SeaORM entity model for the `user_events` table,
//! the single fact table holding one row per tracked user interaction.

use sea_orm::ActiveModelBehavior;
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use crate::source::SourceEvent;

/// User event entity representing one tracked interaction
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_events")]
pub struct Model {
    /// Auto-assigned identifier; orders rows by insertion
    #[sea_orm(primary_key)]
    pub id: i64,

    /// When the interaction happened, as recorded in the source
    pub event_date: DateTime,

    pub session: Option<String>,

    pub user: Option<String>,

    /// Page classification, e.g. product_page, listing_page
    pub page_type: Option<String>,

    /// Interaction kind, e.g. view, add_to_cart, order
    pub event_type: Option<String>,

    pub product: Option<i64>,

    /// Filled by the store at insertion time
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&SourceEvent> for ActiveModel {
    fn from(event: &SourceEvent) -> Self {
        Self {
            event_date: Set(event.event_date),
            session: Set(event.session.clone()),
            user: Set(event.user.clone()),
            page_type: Set(event.page_type.clone()),
            event_type: Set(event.event_type.clone()),
            product: Set(event.product),
            ..Default::default()
        }
    }
}
