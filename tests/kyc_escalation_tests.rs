//! Background KYC escalation driven by click ingestion

mod common;

use chrono::{Duration, Utc};

use afftrack_server::clicks::ClickTarget;
use afftrack_server::models::KycStatus;

use common::{browser_context, Harness};

#[tokio::test]
async fn test_vpn_clicks_escalate_to_kyc_once() {
    let h = Harness::new().await;
    let target = ClickTarget::UserOffer(h.user_offer.id);
    let start = Utc::now() - Duration::days(1);

    for i in 0..10 {
        let outcome = h
            .state
            .clicks
            .ingest(
                target.clone(),
                browser_context(&format!("45.76.1.{}", i + 1)),
                start + Duration::minutes(i * 90),
            )
            .await;
        assert!(outcome.click.unwrap().is_vpn);
    }
    h.state.jobs.wait_idle().await;

    let user = h.user().await;
    assert_eq!(user.kyc_status, KycStatus::None);
    assert!(!user.requires_kyc());

    // The eleventh VPN click crosses the threshold
    h.state
        .clicks
        .ingest(
            target.clone(),
            browser_context("45.76.1.11"),
            start + Duration::minutes(11 * 90),
        )
        .await;
    h.state.jobs.wait_idle().await;

    let user = h.user().await;
    assert_eq!(user.kyc_status, KycStatus::Required);
    assert!(user.requires_kyc());
    let required_at = user.kyc_required_at.expect("stamped");

    // Further clicks leave the status and stamp alone
    h.state
        .clicks
        .ingest(
            target,
            browser_context("45.76.1.12"),
            start + Duration::minutes(12 * 90),
        )
        .await;
    h.state.jobs.wait_idle().await;

    let user = h.user().await;
    assert_eq!(user.kyc_status, KycStatus::Required);
    assert_eq!(user.kyc_required_at, Some(required_at));
}

#[tokio::test]
async fn test_shared_ip_escalates() {
    let h = Harness::new().await;
    let start = Utc::now() - Duration::hours(2);
    let shared_ip = "81.2.69.200";

    for (n, name) in ["alice", "bob", "carol"].iter().enumerate() {
        let other = h.enroll_other_user(name).await;
        h.state
            .clicks
            .ingest(
                ClickTarget::UserOffer(other.id),
                browser_context(shared_ip),
                start + Duration::minutes(n as i64 * 2),
            )
            .await;
    }
    h.state.jobs.wait_idle().await;
    assert_eq!(h.user().await.kyc_status, KycStatus::None);

    h.state
        .clicks
        .ingest(
            ClickTarget::UserOffer(h.user_offer.id),
            browser_context(shared_ip),
            start + Duration::minutes(10),
        )
        .await;
    h.state.jobs.wait_idle().await;

    assert_eq!(h.user().await.kyc_status, KycStatus::Required);
}
