use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartList, UpdateCartItemRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem, Product},
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct CartWithProductRow {
    item_id: Uuid,
    quantity: i32,
    price_at_add: i64,
    product_id: Uuid,
    name: String,
    sku: Option<String>,
    category: Option<String>,
    metal: Option<String>,
    price: i64,
    stock: i32,
    weight_grams: Option<f64>,
    description: Option<String>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}

/// Fetch the user's cart, creating it on first access. Idempotent under
/// concurrency: the insert races on the carts.user_id unique constraint and
/// the loser falls through to the re-select.
pub async fn get_or_create_cart(pool: &DbPool, user_id: Uuid) -> AppResult<Cart> {
    if let Some(cart) = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
    {
        return Ok(cart);
    }

    sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
        .bind(Uuid::new_v4())
        .bind(user_id)
        .execute(pool)
        .await?;

    let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(cart)
}

pub async fn list_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let cart = get_or_create_cart(pool, user.user_id).await?;

    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS item_id, ci.quantity, ci.price_at_add,
               p.id AS product_id, p.name, p.sku, p.category, p.metal, p.price,
               p.stock, p.weight_grams, p.description, p.image_url, p.created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.created_at
        "#,
    )
    .bind(cart.id)
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            id: row.item_id,
            product: Product {
                id: row.product_id,
                name: row.name,
                sku: row.sku,
                category: row.category,
                metal: row.metal,
                price: row.price,
                stock: row.stock,
                weight_grams: row.weight_grams,
                description: row.description,
                image_url: row.image_url,
                created_at: row.created_at,
            },
            quantity: row.quantity,
            price_at_add: row.price_at_add,
        })
        .collect();

    let data = CartList {
        cart_id: cart.id,
        items,
    };
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product: Option<(i64, i32)> =
        sqlx::query_as("SELECT price, stock FROM products WHERE id = $1")
            .bind(payload.product_id)
            .fetch_optional(pool)
            .await?;
    let (price, stock) = match product {
        Some(p) => p,
        None => return Err(AppError::BadRequest("product not found".to_string())),
    };

    // Advisory only; checkout re-validates stock inside its transaction.
    if stock < payload.quantity {
        return Err(AppError::OutOfStock(payload.product_id));
    }

    let cart = get_or_create_cart(pool, user.user_id).await?;

    // Single upsert so concurrent adds for the same (cart, product) serialize
    // in the store. An existing line keeps its original price_at_add.
    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity, price_at_add)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (cart_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart.id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .bind(price)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Added to cart", cart_item, None))
}

pub async fn update_cart_item(
    pool: &DbPool,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let cart: Option<Cart> = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let cart = match cart {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let updated = sqlx::query_as::<_, CartItem>(
        r#"
        UPDATE cart_items
        SET quantity = $3
        WHERE id = $1 AND cart_id = $2
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(cart.id)
    .bind(payload.quantity)
    .fetch_optional(pool)
    .await?;
    let cart_item = match updated {
        Some(item) => item,
        None => return Err(AppError::NotFound),
    };

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Quantity updated", cart_item, None))
}

pub async fn remove_cart_item(
    pool: &DbPool,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart: Option<Cart> = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let cart = match cart {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
        .bind(item_id)
        .bind(cart.id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Item removed",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
