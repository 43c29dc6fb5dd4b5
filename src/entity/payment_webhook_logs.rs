use sea_orm::entity::prelude::*;

pub const KIND_CALLBACK: &str = "callback";
pub const KIND_RETRY: &str = "retry";

/// One row per inbound callback attempt or retry, including rejected ones.
/// At most one row per (`merchant_oid`, `attempt`) has `processed = true`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payment_webhook_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_id: Option<Uuid>,
    pub merchant_oid: String,
    pub attempt: i32,
    pub kind: String,
    pub payload: Json,
    pub processed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub processed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payments::Entity",
        from = "Column::PaymentId",
        to = "super::payments::Column::Id"
    )]
    Payments,
}

impl Related<super::payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
