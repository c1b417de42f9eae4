use uuid::Uuid;

use crate::{
    db::DbPool,
    dto::products::ProductList,
    error::{AppError, AppResult},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
};

pub async fn list_products(
    pool: &DbPool,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let pattern = query
        .q
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));
    let category = query
        .category
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str());

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    // Sort column and direction come from a fixed vocabulary, never from the
    // raw query string.
    let sql = format!(
        r#"
        SELECT * FROM products
        WHERE ($1::text IS NULL OR name ILIKE $1 OR description ILIKE $1)
          AND ($2::text IS NULL OR category = $2)
          AND ($3::bigint IS NULL OR price >= $3)
          AND ($4::bigint IS NULL OR price <= $4)
        ORDER BY {} {}
        LIMIT $5 OFFSET $6
        "#,
        sort_by.as_sql(),
        sort_order.as_sql()
    );

    let items = sqlx::query_as::<_, Product>(&sql)
        .bind(pattern.as_deref())
        .bind(category)
        .bind(query.min_price)
        .bind(query.max_price)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let total: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM products
        WHERE ($1::text IS NULL OR name ILIKE $1 OR description ILIKE $1)
          AND ($2::text IS NULL OR category = $2)
          AND ($3::bigint IS NULL OR price >= $3)
          AND ($4::bigint IS NULL OR price <= $4)
        "#,
    )
    .bind(pattern.as_deref())
    .bind(category)
    .bind(query.min_price)
    .bind(query.max_price)
    .fetch_one(pool)
    .await?;

    let meta = Meta::new(page, limit, total.0);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(pool: &DbPool, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let result = match result {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", result, None))
}
