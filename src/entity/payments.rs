use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(unique)]
    pub merchant_oid: String,
    pub gateway_token: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub installment_count: i32,
    /// Internal payment status text, see `domain::payment_status`.
    pub status: String,
    pub hash: Option<String>,
    pub user_ip: Option<String>,
    pub gateway_metadata: Option<Json>,
    pub error_message: Option<String>,
    /// Bumped by every retry, which also issues a fresh `merchant_oid`.
    pub attempt: i32,
    pub expires_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::orders::Entity",
        from = "Column::OrderId",
        to = "super::orders::Column::Id"
    )]
    Orders,
    #[sea_orm(has_many = "super::payment_webhook_logs::Entity")]
    PaymentWebhookLogs,
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::payment_webhook_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentWebhookLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
