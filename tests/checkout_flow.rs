use gemstore_api::{
    db::{DbPool, create_pool},
    dto::cart::{AddToCartRequest, UpdateCartItemRequest},
    dto::orders::CheckoutRequest,
    error::AppError,
    middleware::auth::AuthUser,
    services::{cart_service, order_service},
};
use uuid::Uuid;

// Integration tests against a live Postgres. Each test seeds its own users
// and products, so they are safe to run in parallel and need no cleanup
// between runs.
async fn setup_pool() -> anyhow::Result<Option<DbPool>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(Some(pool))
}

async fn create_user(pool: &DbPool, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind("Test Customer")
    .bind(format!("{}@example.com", Uuid::new_v4()))
    .bind("dummy")
    .bind(role)
    .execute(pool)
    .await?;

    Ok(AuthUser {
        user_id: id,
        role: role.into(),
    })
}

async fn create_product(pool: &DbPool, price: i64, stock: i32) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO products (id, name, category, metal, price, stock) VALUES ($1, $2, 'Ring', 'Gold', $3, $4)")
        .bind(id)
        .bind(format!("Test Gem {id}"))
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn product_stock(pool: &DbPool, id: Uuid) -> anyhow::Result<i32> {
    let row: (i32,) = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

async fn cart_line_count(pool: &DbPool, user: &AuthUser) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM cart_items ci
        JOIN carts c ON c.id = ci.cart_id
        WHERE c.user_id = $1
        "#,
    )
    .bind(user.user_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

// Repeated adds merge into one line; checkout charges the price locked at
// first add, clears the cart and decrements stock.
#[tokio::test]
async fn checkout_locks_prices_and_clears_cart() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let user = create_user(&pool, "user").await?;
    let product_a = create_product(&pool, 100_00, 5).await?;
    let product_b = create_product(&pool, 50_00, 1).await?;

    let first = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product_a,
            quantity: 1,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(first.quantity, 1);
    assert_eq!(first.price_at_add, 100_00);

    let merged = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product_a,
            quantity: 1,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(merged.id, first.id, "repeated add must not create a new line");
    assert_eq!(merged.quantity, 2);
    assert_eq!(merged.price_at_add, 100_00);

    // A later catalog price change must not affect the locked line price.
    sqlx::query("UPDATE products SET price = $2 WHERE id = $1")
        .bind(product_a)
        .bind(999_00i64)
        .execute(&pool)
        .await?;

    cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product_b,
            quantity: 1,
        },
    )
    .await?;

    let placed = order_service::checkout(
        &pool,
        &user,
        CheckoutRequest {
            shipping_address: Some("12 Marine Drive".into()),
            payment_mode: Some("COD".into()),
        },
    )
    .await?
    .data
    .unwrap();

    assert_eq!(placed.order.order_total, 2 * 100_00 + 50_00);
    assert_eq!(placed.order.status, "Processing");
    assert_eq!(placed.order.payment_status, "Success");
    assert_eq!(placed.order.shipping_address, "12 Marine Drive");
    assert_eq!(placed.items.len(), 2);

    assert_eq!(product_stock(&pool, product_a).await?, 3);
    assert_eq!(product_stock(&pool, product_b).await?, 0);
    assert_eq!(cart_line_count(&pool, &user).await?, 0);

    let fetched = order_service::get_order(&pool, &user, placed.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.id, placed.order.id);
    assert_eq!(fetched.items.len(), 2);
    assert!(fetched.items.iter().all(|i| !i.product_name.is_empty()));

    let listed = order_service::list_orders(&pool, &user).await?.data.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].id, placed.order.id);

    Ok(())
}

// A stock shortfall discovered at checkout aborts the whole thing: no order,
// no stock movement, cart untouched.
#[tokio::test]
async fn failed_checkout_has_no_partial_effects() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let user = create_user(&pool, "user").await?;
    let product = create_product(&pool, 10_00, 5).await?;

    cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 3,
        },
    )
    .await?;

    // Stock shrinks between add-to-cart and checkout.
    sqlx::query("UPDATE products SET stock = 1 WHERE id = $1")
        .bind(product)
        .execute(&pool)
        .await?;

    let err = order_service::checkout(&pool, &user, CheckoutRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OutOfStock(p) if p == product));

    assert_eq!(product_stock(&pool, product).await?, 1);
    assert_eq!(cart_line_count(&pool, &user).await?, 1);

    let line_qty: (i32,) = sqlx::query_as(
        r#"
        SELECT ci.quantity
        FROM cart_items ci
        JOIN carts c ON c.id = ci.cart_id
        WHERE c.user_id = $1
        "#,
    )
    .bind(user.user_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(line_qty.0, 3);

    let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(orders.0, 0);

    Ok(())
}

#[tokio::test]
async fn checkout_rejects_missing_or_empty_cart() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let no_cart_user = create_user(&pool, "user").await?;
    let err = order_service::checkout(&pool, &no_cart_user, CheckoutRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoCart));

    let empty_cart_user = create_user(&pool, "user").await?;
    cart_service::get_or_create_cart(&pool, empty_cart_user.user_id).await?;
    let err = order_service::checkout(&pool, &empty_cart_user, CheckoutRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));

    Ok(())
}

// Two checkouts race for the last unit; exactly one wins and stock never
// goes negative.
#[tokio::test]
async fn concurrent_checkouts_never_oversell() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let product = create_product(&pool, 75_00, 1).await?;
    let alice = create_user(&pool, "user").await?;
    let bob = create_user(&pool, "user").await?;

    for user in [&alice, &bob] {
        cart_service::add_to_cart(
            &pool,
            user,
            AddToCartRequest {
                product_id: product,
                quantity: 1,
            },
        )
        .await?;
    }

    let (first, second) = tokio::join!(
        order_service::checkout(&pool, &alice, CheckoutRequest::default()),
        order_service::checkout(&pool, &bob, CheckoutRequest::default()),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of the two checkouts must win");
    for result in [first, second] {
        if let Err(err) = result {
            assert!(matches!(err, AppError::OutOfStock(p) if p == product));
        }
    }

    assert_eq!(product_stock(&pool, product).await?, 0);

    let committed: (Option<i64>,) = sqlx::query_as(
        "SELECT SUM(quantity)::bigint FROM order_items WHERE product_id = $1",
    )
    .bind(product)
    .fetch_one(&pool)
    .await?;
    assert_eq!(committed.0.unwrap_or(0), 1);

    Ok(())
}

#[tokio::test]
async fn get_or_create_cart_is_idempotent() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let user = create_user(&pool, "user").await?;

    let (first, second) = tokio::join!(
        cart_service::get_or_create_cart(&pool, user.user_id),
        cart_service::get_or_create_cart(&pool, user.user_id),
    );
    let first = first?;
    let second = second?;
    assert_eq!(first.id, second.id);

    let again = cart_service::get_or_create_cart(&pool, user.user_id).await?;
    assert_eq!(again.id, first.id);

    Ok(())
}

// Cancelling deletes the order and its items but deliberately leaves stock
// where checkout put it.
#[tokio::test]
async fn cancel_order_does_not_restock() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let user = create_user(&pool, "user").await?;
    let product = create_product(&pool, 20_00, 4).await?;

    cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 2,
        },
    )
    .await?;
    let placed = order_service::checkout(&pool, &user, CheckoutRequest::default())
        .await?
        .data
        .unwrap();
    assert_eq!(product_stock(&pool, product).await?, 2);

    order_service::cancel_order(&pool, &user, placed.order.id).await?;

    let err = order_service::get_order(&pool, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let listed = order_service::list_orders(&pool, &user).await?.data.unwrap();
    assert!(listed.items.is_empty());

    assert_eq!(product_stock(&pool, product).await?, 2);

    // Cancelling someone else's order is NotFound, not Forbidden.
    let stranger = create_user(&pool, "user").await?;
    let err = order_service::cancel_order(&pool, &stranger, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}

#[tokio::test]
async fn cart_mutations_validate_input_and_ownership() -> anyhow::Result<()> {
    let Some(pool) = setup_pool().await? else {
        return Ok(());
    };

    let user = create_user(&pool, "user").await?;
    let product = create_product(&pool, 10_00, 10).await?;

    let err = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: Uuid::new_v4(),
            quantity: 1,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Advisory stock check at add time.
    let err = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 11,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::OutOfStock(p) if p == product));

    let line = cart_service::add_to_cart(
        &pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 2,
        },
    )
    .await?
    .data
    .unwrap();

    let updated = cart_service::update_cart_item(
        &pool,
        &user,
        line.id,
        UpdateCartItemRequest { quantity: 5 },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.quantity, 5);
    assert_eq!(updated.price_at_add, line.price_at_add);

    let err = cart_service::update_cart_item(
        &pool,
        &user,
        line.id,
        UpdateCartItemRequest { quantity: 0 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = cart_service::update_cart_item(
        &pool,
        &user,
        Uuid::new_v4(),
        UpdateCartItemRequest { quantity: 1 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Another user cannot touch this line through their own cart.
    let stranger = create_user(&pool, "user").await?;
    let err = cart_service::update_cart_item(
        &pool,
        &stranger,
        line.id,
        UpdateCartItemRequest { quantity: 1 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    cart_service::remove_cart_item(&pool, &user, line.id).await?;
    let err = cart_service::remove_cart_item(&pool, &user, line.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}
