use order_payments_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;
    let pool = create_pool(&config.database_url).await?;

    let product_ids = seed_products(&pool).await?;
    let cart_id = seed_guest_cart(&pool, &product_ids).await?;

    println!("Seed completed. Demo guest cart: {cart_id}");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<Vec<(Uuid, Decimal)>> {
    let products = vec![
        ("Red Roses Bouquet", "Twelve long-stem roses", dec!(100.00), 50),
        ("Orchid in Ceramic Pot", "White phalaenopsis", dec!(450.00), 20),
        ("Greeting Card", "Handwritten message card", dec!(25.00), 500),
        ("Chocolate Box", "Assorted pralines, 250g", dec!(180.50), 75),
    ];

    let mut seeded = Vec::with_capacity(products.len());
    for (name, desc, price, stock) in products {
        let existing: Option<(Uuid, Decimal)> =
            sqlx::query_as("SELECT id, price FROM products WHERE name = $1")
                .bind(name)
                .fetch_optional(pool)
                .await?;
        if let Some(row) = existing {
            seeded.push(row);
            continue;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
        seeded.push((id, price));
    }

    println!("Seeded {} products", seeded.len());
    Ok(seeded)
}

/// A guest cart holding three of the first product, ready for checkout.
async fn seed_guest_cart(pool: &sqlx::PgPool, products: &[(Uuid, Decimal)]) -> anyhow::Result<Uuid> {
    let Some(&(product_id, price)) = products.first() else {
        anyhow::bail!("no products to put in the demo cart");
    };

    let cart_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO carts (id, guest_cart_id, status, expires_at)
        VALUES ($1, $2, 'active', NOW() + INTERVAL '72 hours')
        "#,
    )
    .bind(cart_id)
    .bind(cart_id.simple().to_string())
    .execute(&mut *tx)
    .await?;

    let quantity = 3;
    sqlx::query(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity, unit_price, line_total)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart_id)
    .bind(product_id)
    .bind(quantity)
    .bind(price)
    .bind(price * Decimal::from(quantity))
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(cart_id)
}
