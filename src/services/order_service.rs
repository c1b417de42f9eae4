use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::orders::{CheckoutRequest, OrderItemDetail, OrderList, OrderWithItems},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
};

#[derive(Debug, FromRow)]
struct CheckoutLine {
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    price_at_add: i64,
    stock: i32,
}

/// Turn the caller's cart into an order: validate stock, total up the locked
/// line prices, write the order and its items, decrement stock and clear the
/// cart. Everything happens inside one transaction, so a failed step leaves
/// no partial effects.
pub async fn checkout(
    pool: &DbPool,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let shipping_address = payload
        .shipping_address
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "Not provided".to_string());
    let payment_mode = payload
        .payment_mode
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "COD".to_string());

    let mut txn = pool.begin().await?;

    let cart: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM carts WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_optional(&mut *txn)
        .await?;
    let (cart_id,) = match cart {
        Some(c) => c,
        None => return Err(AppError::NoCart),
    };

    // Lock the product rows so concurrent checkouts over the same products
    // serialize; the stock read here is the stock the commit applies to.
    let lines = sqlx::query_as::<_, CheckoutLine>(
        r#"
        SELECT ci.product_id, p.name AS product_name, ci.quantity,
               ci.price_at_add, p.stock
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.created_at
        FOR UPDATE OF p
        "#,
    )
    .bind(cart_id)
    .fetch_all(&mut *txn)
    .await?;

    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut order_total: i64 = 0;
    for line in &lines {
        if line.quantity > line.stock {
            return Err(AppError::OutOfStock(line.product_id));
        }
        // Charged at the price shown when the item was added, not the
        // current catalog price.
        order_total += line.price_at_add * (line.quantity as i64);
    }

    // Payment processing is stubbed, so the order is recorded as paid.
    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (id, user_id, order_total, status, payment_mode, payment_status, shipping_address)
        VALUES ($1, $2, $3, 'Processing', $4, 'Success', $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(order_total)
    .bind(&payment_mode)
    .bind(&shipping_address)
    .fetch_one(&mut *txn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (id, order_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(line.product_id)
        .bind(line.quantity)
        .bind(line.price_at_add)
        .fetch_one(&mut *txn)
        .await?;

        // Conditional decrement: with the rows locked above this can only
        // report zero rows if stock moved underneath us, and then the whole
        // transaction rolls back.
        let updated =
            sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
                .bind(line.product_id)
                .bind(line.quantity)
                .execute(&mut *txn)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::OutOfStock(line.product_id));
        }

        items.push(OrderItemDetail {
            id: item.id,
            product_id: item.product_id,
            product_name: line.product_name.clone(),
            quantity: item.quantity,
            price: item.price,
        });
    }

    // clear cart
    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
        .bind(cart_id)
        .execute(&mut *txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_total": order_total })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<OrderList>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let total = orders.len() as i64;
    let data = OrderList { items: orders };
    Ok(ApiResponse::success(
        "Ok",
        data,
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn get_order(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = sqlx::query_as::<_, OrderItemDetail>(
        r#"
        SELECT oi.id, oi.product_id, p.name AS product_name, oi.quantity, oi.price
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = $1
        ORDER BY oi.created_at
        "#,
    )
    .bind(order.id)
    .fetch_all(pool)
    .await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let mut txn = pool.begin().await?;

    let order: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM orders WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user.user_id)
            .fetch_optional(&mut *txn)
            .await?;
    if order.is_none() {
        return Err(AppError::NotFound);
    }

    // Stock consumed by the order is not returned to the shelf on cancel.
    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
        .bind(id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM orders WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .execute(&mut *txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        serde_json::json!({ "order_id": id }),
        Some(Meta::empty()),
    ))
}
