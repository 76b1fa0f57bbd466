//! PostgreSQL store tests
//!
//! Run with `TEST_DATABASE_URL` pointing at a scratch database:
//! `cargo test --test pg_store_tests -- --ignored`

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use afftrack_server::db::run_migrations;
use afftrack_server::models::{ConversionStatus, NewClick, NewConversion};
use afftrack_server::store::{PgStore, Store, StoreError};

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/afftrack_test".to_string());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Seed a user enrolled in one offer; returns (user, offer, user_offer)
async fn seed_enrollment(pool: &PgPool) -> (Uuid, Uuid, Uuid) {
    let user_id = Uuid::new_v4();
    let offer_id = Uuid::new_v4();
    let user_offer_id = Uuid::new_v4();

    sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
        .bind(user_id)
        .bind(format!("promoter-{}", user_id))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO offers (id, title, destination_url, commission) VALUES ($1, 'Sale', 'https://shop.example.com', 500)",
    )
    .bind(offer_id)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO user_offers (id, user_id, offer_id, affiliate_link) VALUES ($1, $2, $3, 'https://shop.example.com')",
    )
    .bind(user_offer_id)
    .bind(user_id)
    .bind(offer_id)
    .execute(pool)
    .await
    .unwrap();

    (user_id, offer_id, user_offer_id)
}

fn new_conversion(
    user_id: Uuid,
    offer_id: Uuid,
    user_offer_id: Uuid,
    status: ConversionStatus,
) -> NewConversion {
    NewConversion {
        user_offer_id,
        offer_id,
        user_id,
        click_id: None,
        external_conversion_id: format!("pg-{}", Uuid::new_v4()),
        network_id: None,
        amount: 2500,
        commission: 500,
        currency: "USD".to_string(),
        status,
        rejection_reason: None,
        fraud_score: 0,
        fraud_flags: vec![],
        auto_rejected: false,
        country: Some("GB".to_string()),
        converted_at: Utc::now(),
        postback_blob: json!({ "source": "pg_store_tests" }),
    }
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_conversion_updates_counters_atomically() {
    let pool = setup_test_db().await;
    let store = PgStore::new(pool.clone());
    let (user_id, offer_id, user_offer_id) = seed_enrollment(&pool).await;

    let approved = store
        .record_conversion(new_conversion(
            user_id,
            offer_id,
            user_offer_id,
            ConversionStatus::Approved,
        ))
        .await
        .unwrap();
    assert!(approved.approved_at.is_some());

    let pending = store
        .record_conversion(new_conversion(
            user_id,
            offer_id,
            user_offer_id,
            ConversionStatus::Pending,
        ))
        .await
        .unwrap();

    let user = store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.total_conversions, 2);
    assert_eq!(user.total_earnings, 500);

    store.approve_conversion(pending.id, Utc::now()).await.unwrap();
    let user = store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.total_conversions, 2);
    assert_eq!(user.total_earnings, 1000);

    let again = store.approve_conversion(pending.id, Utc::now()).await;
    assert!(matches!(again, Err(StoreError::InvalidTransition(_))));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_duplicate_external_id_rolls_back() {
    let pool = setup_test_db().await;
    let store = PgStore::new(pool.clone());
    let (user_id, offer_id, user_offer_id) = seed_enrollment(&pool).await;

    let first = new_conversion(user_id, offer_id, user_offer_id, ConversionStatus::Approved);
    let mut second = new_conversion(user_id, offer_id, user_offer_id, ConversionStatus::Approved);
    second.external_conversion_id = first.external_conversion_id.clone();

    store.record_conversion(first).await.unwrap();
    let err = store.record_conversion(second).await.unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)));

    let user = store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.total_conversions, 1);
    assert_eq!(user.total_earnings, 500);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_click_and_tracking_link_round_trip() {
    let pool = setup_test_db().await;
    let store = PgStore::new(pool.clone());
    let (user_id, offer_id, user_offer_id) = seed_enrollment(&pool).await;

    let code = format!("code-{}", &user_offer_id.to_string()[..8]);
    store
        .set_tracking_link(user_offer_id, &code, "https://go.example/r/x")
        .await
        .unwrap();
    let enrollment = store
        .find_enrollment_by_tracking_code(&code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enrollment.user_offer.id, user_offer_id);

    let click = store
        .record_click(
            NewClick {
                user_offer_id,
                clicked_at: Utc::now(),
                ip_hash: "abcdef0123456789".to_string(),
                user_agent_hash: "0123456789abcdef".to_string(),
                country: Some("GB".to_string()),
                fraud_score: 30,
                fraud_flags: vec!["datacenter_ip".to_string()],
                is_bot: false,
                is_vpn: true,
            },
            offer_id,
            user_id,
        )
        .await
        .unwrap();

    let loaded = store.get_click(click.id).await.unwrap().unwrap();
    assert_eq!(loaded.fraud_score, 30);
    assert!(loaded.is_vpn);

    let user = store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.total_clicks, 1);
}
