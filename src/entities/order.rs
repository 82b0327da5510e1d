use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Fiscal-year scoped, e.g. "2526-00001". Unique across the table.
    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    // Customer snapshot, copied at creation. Not a live reference: later
    // member edits must not rewrite historical orders.
    pub customer_name: String,
    pub customer_mobile: String,
    #[sea_orm(nullable)]
    pub customer_email: Option<String>,
    pub address_line: String,
    #[sea_orm(nullable)]
    pub city: Option<String>,
    #[sea_orm(nullable)]
    pub pincode: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub wallet_amount_applied: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub payable_amount: Decimal,

    pub payment_status: PaymentStatus,
    #[sea_orm(nullable)]
    pub payment_mode: Option<String>,
    #[sea_orm(nullable)]
    pub payment_reference: Option<String>,
    #[sea_orm(nullable)]
    pub payment_date: Option<DateTime<Utc>>,

    #[sea_orm(nullable)]
    pub depot_id: Option<Uuid>,
    /// Nullable for guest orders.
    #[sea_orm(nullable)]
    pub member_id: Option<Uuid>,

    #[sea_orm(nullable)]
    pub invoice_no: Option<String>,
    #[sea_orm(nullable)]
    pub invoice_path: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::depot::Entity",
        from = "Column::DepotId",
        to = "super::depot::Column::Id"
    )]
    Depot,
    #[sea_orm(
        belongs_to = "super::member::Entity",
        from = "Column::MemberId",
        to = "super::member::Column::Id"
    )]
    Member,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::depot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Depot.def()
    }
}

impl Related<super::member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Member.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Ok(self)
    }
}

/// Payment lifecycle of an order. Transitions are one-way: nothing leaves
/// `Cancelled`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Paid, PaymentStatus::Cancelled)
        )
    }
}
