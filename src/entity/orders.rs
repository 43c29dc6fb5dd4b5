use sea_orm::entity::prelude::*;

use crate::domain::order_status::OrderStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    #[sea_orm(unique)]
    pub cart_id: Uuid,
    pub user_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub billing_type: String,
    pub tax_id: String,
    pub tax_office: Option<String>,
    pub company_name: Option<String>,
    pub shipping_address: Json,
    pub delivery_date: Option<Date>,
    pub delivery_slot: Option<String>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub grand_total: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: Option<String>,
    pub payment_status: String,
    pub notes: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    OrderStatusHistory,
    #[sea_orm(has_many = "super::payments::Entity")]
    Payments,
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderStatusHistory.def()
    }
}

impl Related<super::payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
