//! MFA enrolment and login

mod common;

use common::{ENCRYPTION_KEY, config, setup};
use warden::{Clock, Error, LoginOutcome, MfaError, TokenType};
use warden_core::totp;

fn code_for(secret: &str, now: chrono::DateTime<chrono::Utc>, offset: i64) -> String {
    let step = totp::current_step(now) as i64 + offset;
    totp::code_at(secret, step as u64).unwrap()
}

#[tokio::test]
async fn test_code_four_steps_away_does_not_enable() {
    let t = setup(config()).await;
    let user_id = t.add_user("mfa@example.com").await;

    let enrollment = t.warden.mfa().generate_secret(&user_id).await.unwrap();
    assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));

    let stale = code_for(&enrollment.secret, t.clock.now(), -4);
    let err = t
        .warden
        .mfa()
        .verify_and_enable(&user_id, &stale)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mfa(MfaError::InvalidCode)));
    assert!(!t.warden.mfa().status(&user_id).await.unwrap().enabled);

    let current = code_for(&enrollment.secret, t.clock.now(), 0);
    t.warden
        .mfa()
        .verify_and_enable(&user_id, &current)
        .await
        .unwrap();

    let status = t.warden.mfa().status(&user_id).await.unwrap();
    assert!(status.enabled);
    assert!(status.enrolled);
    assert_eq!(t.events.count("mfa_verification_failed"), 1);
    assert_eq!(t.events.count("mfa_enabled"), 1);
}

#[tokio::test]
async fn test_login_with_mfa() {
    let t = setup(config()).await;
    let user_id = t.add_user("two-factor@example.com").await;

    let enrollment = t.warden.mfa().generate_secret(&user_id).await.unwrap();
    let code = code_for(&enrollment.secret, t.clock.now(), 0);
    t.warden
        .mfa()
        .verify_and_enable(&user_id, &code)
        .await
        .unwrap();

    let outcome = t.warden.complete_login(&user_id, None).await.unwrap();
    let LoginOutcome::MfaRequired { mfa_token, .. } = outcome else {
        panic!("expected MFA to be required");
    };

    // The pending token is not an access token
    assert!(t.warden.authenticate(&mfa_token).await.is_err());

    let wrong = t
        .warden
        .verify_mfa_login(&mfa_token, "000000")
        .await;
    if code != "000000" {
        assert!(matches!(wrong, Err(Error::Mfa(MfaError::InvalidCode))));
    }

    let pair = t.warden.verify_mfa_login(&mfa_token, &code).await.unwrap();
    let claims = t.warden.authenticate(&pair.access_token).await.unwrap();
    assert_eq!(claims.user_id(), user_id);
    assert_eq!(claims.typ, TokenType::Access);
    assert!(t.record(&user_id).await.last_login_at.is_some());

    // Single use
    assert!(t.warden.verify_mfa_login(&mfa_token, &code).await.is_err());
}

/// A six digit code accepted by no step near `now`.
fn wrong_code(secret: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let valid: Vec<_> = (-2..=2).map(|offset| code_for(secret, now, offset)).collect();
    ["000000", "111111", "222222", "333333", "444444", "555555"]
        .into_iter()
        .find(|candidate| !valid.iter().any(|code| code == candidate))
        .unwrap()
        .to_string()
}

async fn pending_login(t: &common::TestWarden, email: &str) -> (warden::UserId, String, String) {
    let user_id = t.add_user(email).await;
    let enrollment = t.warden.mfa().generate_secret(&user_id).await.unwrap();
    let code = code_for(&enrollment.secret, t.clock.now(), 0);
    t.warden
        .mfa()
        .verify_and_enable(&user_id, &code)
        .await
        .unwrap();

    let LoginOutcome::MfaRequired { mfa_token, .. } =
        t.warden.complete_login(&user_id, None).await.unwrap()
    else {
        panic!("expected MFA to be required");
    };
    (user_id, mfa_token, enrollment.secret)
}

#[tokio::test]
async fn test_repeated_wrong_codes_block_the_mfa_step() {
    let t = setup(config()).await;
    let (_user_id, mfa_token, secret) = pending_login(&t, "guessed@example.com").await;
    let wrong = wrong_code(&secret, t.clock.now());

    for _ in 0..5 {
        let err = t
            .warden
            .verify_mfa_login(&mfa_token, &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Mfa(MfaError::InvalidCode)));
    }

    // Even the right code is refused once the threshold is reached
    let code = code_for(&secret, t.clock.now(), 0);
    let err = t
        .warden
        .verify_mfa_login(&mfa_token, &code)
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert!(t.warden.guard().is_blocked("guessed@example.com").await);
    assert_eq!(t.events.count("brute_force_detected"), 1);
}

#[tokio::test]
async fn test_blocked_identity_cannot_finish_mfa_login() {
    let t = setup(config()).await;
    let (_user_id, mfa_token, secret) = pending_login(&t, "held@example.com").await;
    t.warden
        .guard()
        .block_ip("held@example.com", "manual", chrono::Duration::minutes(30))
        .await
        .unwrap();

    let code = code_for(&secret, t.clock.now(), 0);
    let err = t
        .warden
        .verify_mfa_login(&mfa_token, &code)
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(t.events.count("blocked_request"), 1);

    // The pending token was not consumed and works after an unblock
    t.warden.unblock("held@example.com").await.unwrap();
    t.warden.verify_mfa_login(&mfa_token, &code).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_mfa_logins_issue_one_pair() {
    let t = setup(config()).await;
    let (_user_id, mfa_token, secret) = pending_login(&t, "racer@example.com").await;
    let code = code_for(&secret, t.clock.now(), 0);

    let (first, second) = tokio::join!(
        t.warden.verify_mfa_login(&mfa_token, &code),
        t.warden.verify_mfa_login(&mfa_token, &code)
    );
    assert_eq!([&first, &second].iter().filter(|r| r.is_ok()).count(), 1);
    let err = first.err().or(second.err()).unwrap();
    assert!(err.is_token_error());
}

#[tokio::test]
async fn test_login_without_mfa_returns_tokens() {
    let t = setup(config()).await;
    let user_id = t.add_user("plain@example.com").await;

    let outcome = t.warden.complete_login(&user_id, None).await.unwrap();
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected a token pair");
    };
    assert_eq!(pair.expires_in, 900);
    t.warden.authenticate(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn test_failure_classes() {
    let t = setup(config()).await;
    let user_id = t.add_user("classes@example.com").await;
    let unknown = warden::UserId::new("usr_unknown");

    let mfa = t.warden.mfa();
    assert!(matches!(
        mfa.verify_and_enable(&user_id, "12ab56").await,
        Err(Error::Mfa(MfaError::InvalidCodeFormat))
    ));
    assert!(matches!(
        mfa.verify_and_enable(&user_id, "123456").await,
        Err(Error::Mfa(MfaError::NotEnrolled))
    ));
    assert!(matches!(
        mfa.generate_secret(&unknown).await,
        Err(Error::Mfa(MfaError::UnknownIdentity))
    ));
    assert!(matches!(
        mfa.verify_login(&user_id, "123456").await,
        Err(Error::Mfa(MfaError::NotEnabled))
    ));

    let enrollment = mfa.generate_secret(&user_id).await.unwrap();
    let code = code_for(&enrollment.secret, t.clock.now(), 0);
    mfa.verify_and_enable(&user_id, &code).await.unwrap();
    assert!(matches!(
        mfa.generate_secret(&user_id).await,
        Err(Error::Mfa(MfaError::AlreadyEnabled))
    ));

    mfa.disable(&user_id, &code).await.unwrap();
    let status = mfa.status(&user_id).await.unwrap();
    assert!(!status.enabled);
    assert!(!status.enrolled);
}

#[tokio::test]
async fn test_secret_is_encrypted_at_rest() {
    let mut encrypted = config();
    encrypted.encryption_key = Some(ENCRYPTION_KEY.to_string());
    let t = setup(encrypted).await;
    let user_id = t.add_user("vault@example.com").await;

    let enrollment = t.warden.mfa().generate_secret(&user_id).await.unwrap();
    let stored = t.record(&user_id).await.mfa_secret.unwrap();
    assert_ne!(stored, enrollment.secret);
    assert_eq!(t.warden.encryption().decrypt(&stored), enrollment.secret);

    let code = code_for(&enrollment.secret, t.clock.now(), 1);
    t.warden
        .mfa()
        .verify_and_enable(&user_id, &code)
        .await
        .unwrap();
}
